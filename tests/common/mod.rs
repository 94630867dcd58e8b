//! A scripted HTTP/1.1 origin for integration tests.
//!
//! Accepts TCP connections, parses one request per connection with
//! `httparse`, records it, and writes back whatever the route closure
//! returns. Event-stream bodies are written frame by frame, then the
//! connection is closed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

/// A request as seen by the mock origin.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length,
    Chunked,
    Close,
}

/// A scripted reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    parts: Vec<Vec<u8>>,
    framing: Framing,
    hang_up: bool,
    stall: bool,
}

impl MockResponse {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/plain".into())],
            parts: vec![body.as_bytes().to_vec()],
            framing: Framing::Length,
            hang_up: false,
            stall: false,
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            headers: vec![("Location".into(), location.into())],
            parts: Vec::new(),
            framing: Framing::Length,
            hang_up: false,
            stall: false,
        }
    }

    /// A close-delimited `text/event-stream` body, one write per frame.
    pub fn event_stream(frames: &[&str]) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".into(), "text/event-stream".into()),
                ("Cache-Control".into(), "no-cache".into()),
            ],
            parts: frames.iter().map(|f| f.as_bytes().to_vec()).collect(),
            framing: Framing::Close,
            hang_up: false,
            stall: false,
        }
    }

    /// Like [`event_stream`](Self::event_stream) but chunk-encoded.
    pub fn chunked_event_stream(frames: &[&str]) -> Self {
        Self {
            framing: Framing::Chunked,
            ..Self::event_stream(frames)
        }
    }

    /// Closes the connection without answering.
    pub fn hang_up() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            parts: Vec::new(),
            framing: Framing::Close,
            hang_up: true,
            stall: false,
        }
    }

    /// Reads the request, then never answers.
    pub fn silent() -> Self {
        Self {
            stall: true,
            ..Self::hang_up()
        }
    }

    /// Announces `declared` body bytes, sends only `partial`, then keeps the
    /// connection open without writing anything else.
    pub fn stalled_body(declared: usize, partial: &str) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".into(), "text/plain".into()),
                ("Content-Length".into(), declared.to_string()),
            ],
            parts: vec![partial.as_bytes().to_vec()],
            framing: Framing::Close,
            hang_up: false,
            stall: true,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    async fn write_to(self, stream: &mut TcpStream) -> std::io::Result<()> {
        if self.hang_up {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            return Ok(());
        }

        let mut head = format!("HTTP/1.1 {} Mock\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        match self.framing {
            Framing::Length => {
                let len: usize = self.parts.iter().map(Vec::len).sum();
                head.push_str(&format!("Content-Length: {len}\r\n"));
            }
            Framing::Chunked => head.push_str("Transfer-Encoding: chunked\r\n"),
            Framing::Close => {}
        }
        head.push_str("Connection: close\r\n\r\n");
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;

        for part in &self.parts {
            match self.framing {
                Framing::Chunked => {
                    stream
                        .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                        .await?;
                    stream.write_all(part).await?;
                    stream.write_all(b"\r\n").await?;
                }
                _ => stream.write_all(part).await?,
            }
            stream.flush().await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.framing == Framing::Chunked {
            stream.write_all(b"0\r\n\r\n").await?;
        }
        if self.stall {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        stream.flush().await
    }
}

type Route = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static;

/// The running mock origin. The accept loop lives until the test ends.
pub struct MockOrigin {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockOrigin {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let route = Arc::clone(&route);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, route, recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn origin(&self) -> Url {
        self.url("/")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Polls until at least `count` requests to `path` were recorded, for
    /// requests sent from background tasks. Gives up after two seconds.
    pub async fn wait_for(&self, path: &str, count: usize) -> Vec<RecordedRequest> {
        for _ in 0..200 {
            let seen = self.requests_to(path);
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests_to(path)
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    route: Arc<Route>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);

    let request = loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut raw = httparse::Request::new(&mut headers);
        match raw.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                break RecordedRequest {
                    method: raw.method.unwrap_or_default().to_owned(),
                    path: raw.path.unwrap_or_default().to_owned(),
                    headers: raw
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_owned(),
                                String::from_utf8_lossy(h.value).into_owned(),
                            )
                        })
                        .collect(),
                };
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Ok(()),
        }
    };

    recorded.lock().unwrap().push(request.clone());
    let response = route(&request);
    response.write_to(&mut stream).await?;
    stream.shutdown().await
}
