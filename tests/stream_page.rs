//! End-to-end tests against a scripted origin on localhost.

mod common;

use std::time::Duration;

use futures::StreamExt;
use url::Url;

use common::{MockOrigin, MockResponse};
use streamprobe::client::HttpClient;
use streamprobe::config::{ClientSettings, ConnectionConfig};
use streamprobe::http::{Headers, Request};
use streamprobe::page::{ClientState, MessageList, StreamPageClient};
use streamprobe::security::CorsCheck;
use streamprobe::sse::EventSource;
use streamprobe::ConnectionError;

const RESOURCE: &str = "63d61a5319a9f178d5652b4b";
const PAGE_ORIGIN: &str = "http://localhost:8000";

fn stream_path() -> String {
    format!("/stream/{RESOURCE}")
}

fn page_origin() -> Url {
    Url::parse(PAGE_ORIGIN).unwrap()
}

#[tokio::test]
async fn renders_each_message_in_order() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| match req.path.as_str() {
        "/" => MockResponse::text(200, "hello"),
        p if p == path => MockResponse::event_stream(&["data: foo\n\n", "data: bar\n\n"]),
        _ => MockResponse::text(404, "not found"),
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    let rendered = page.run().await.unwrap();

    assert_eq!(rendered, 2);
    assert_eq!(page.state(), ClientState::Streaming);
    assert_eq!(page.container().texts(), vec!["message: foo", "message: bar"]);

    let startup = origin.wait_for("/", 1).await;
    assert_eq!(startup.len(), 1);
    assert_eq!(startup[0].method, "GET");

    let stream = &origin.requests_to(&stream_path())[0];
    assert_eq!(stream.header("accept"), Some("text/event-stream"));
    assert_eq!(stream.header("authorization"), None);
}

#[tokio::test]
async fn message_split_across_writes_is_reassembled() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            MockResponse::event_stream(&["da", "ta: hel", "lo\r", "\n\r\n", "data: x\n\n"])
        } else {
            MockResponse::text(200, "")
        }
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    page.run().await.unwrap();

    assert_eq!(page.container().texts(), vec!["message: hello", "message: x"]);
}

#[tokio::test]
async fn chunked_stream_filters_other_event_types() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            MockResponse::chunked_event_stream(&[
                ": keepalive\n\n",
                "event: ping\ndata: ignored\n\n",
                "id: 1\ndata: line one\ndata: line two\n\n",
                "data: trailing without terminator",
            ])
        } else {
            MockResponse::text(200, "")
        }
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    let rendered = page.run().await.unwrap();

    assert_eq!(rendered, 1);
    assert_eq!(
        page.container().texts(),
        vec!["message: line one\nline two"]
    );
}

#[tokio::test]
async fn header_priming_opens_stream_on_resolved_url_without_token() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| match req.path.as_str() {
        "/" => MockResponse::text(200, "ok"),
        p if p == path && req.header("authorization").is_some() => {
            MockResponse::redirect(302, "/live/feed")
        }
        p if p == path => MockResponse::text(401, "no token"),
        "/live/feed" => MockResponse::event_stream(&["data: primed\n\n"]),
        _ => MockResponse::text(404, ""),
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE).with_header_priming("secret");
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    page.run().await.unwrap();

    assert_eq!(page.container().texts(), vec!["message: primed"]);

    let priming = origin.requests_to(&stream_path());
    assert_eq!(priming.len(), 1);
    assert_eq!(priming[0].header("authorization"), Some("Bearer secret"));

    // One hop during priming (body dropped), one when the stream opens.
    let feed = origin.requests_to("/live/feed");
    assert_eq!(feed.len(), 2);
    let stream = feed.last().unwrap();
    assert_eq!(stream.header("accept"), Some("text/event-stream"));
    assert_eq!(stream.header("authorization"), None);
}

#[tokio::test]
async fn forward_authorization_sends_token_on_stream() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            match req.header("accept") {
                Some("text/event-stream") => MockResponse::event_stream(&["data: ok\n\n"]),
                _ => MockResponse::text(200, "primed"),
            }
        } else {
            MockResponse::text(200, "")
        }
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE)
        .with_header_priming("secret")
        .with_forward_authorization(true);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    page.run().await.unwrap();

    let requests = origin.requests_to(&stream_path());
    assert_eq!(requests.len(), 2);
    assert!(
        requests
            .iter()
            .all(|r| r.header("authorization") == Some("Bearer secret"))
    );
    assert_eq!(page.container().texts(), vec!["message: ok"]);
}

#[tokio::test]
async fn failed_startup_request_does_not_block_stream() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            MockResponse::event_stream(&["data: still here\n\n"])
        } else {
            MockResponse::hang_up()
        }
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    assert!(page.probe().await.is_err());
    page.run().await.unwrap();
    assert_eq!(page.container().texts(), vec!["message: still here"]);
}

#[tokio::test]
async fn stalled_startup_response_does_not_block_stream() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            MockResponse::event_stream(&["data: foo\n\n"])
        } else {
            MockResponse::stalled_body(100, "partial")
        }
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    let rendered = tokio::time::timeout(Duration::from_secs(3), page.run())
        .await
        .expect("stream must not wait for the startup response")
        .unwrap();
    assert_eq!(rendered, 1);
    assert_eq!(page.container().texts(), vec!["message: foo"]);
    assert_eq!(origin.wait_for("/", 1).await.len(), 1);
}

#[tokio::test]
async fn unanswered_startup_request_does_not_delay_stream() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.path == path {
            MockResponse::event_stream(&["data: quick\n\n"])
        } else {
            MockResponse::silent()
        }
    })
    .await;

    // The startup request would wait out the full 30 s response timeout.
    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    let rendered = tokio::time::timeout(Duration::from_secs(3), page.run())
        .await
        .expect("stream must not wait for the startup response head")
        .unwrap();
    assert_eq!(rendered, 1);
    assert_eq!(page.container().texts(), vec!["message: quick"]);
}

#[tokio::test]
async fn second_open_is_rejected_even_after_failure() {
    let origin = MockOrigin::start(|_| MockResponse::text(404, "gone")).await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    let first = page.open_stream().await;
    assert!(matches!(
        first,
        Err(ConnectionError::UnexpectedStatus { status, .. }) if status.as_u16() == 404
    ));
    assert_eq!(page.state(), ClientState::Connecting);

    assert!(matches!(
        page.open_stream().await,
        Err(ConnectionError::AlreadySubscribed)
    ));
    assert_eq!(origin.requests_to(&stream_path()).len(), 1);
}

#[tokio::test]
async fn wrong_content_type_is_not_an_event_stream() {
    let origin = MockOrigin::start(|_| MockResponse::text(200, "data: nope\n\n")).await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    match page.open_stream().await {
        Err(ConnectionError::NotEventStream { content_type, .. }) => {
            assert_eq!(content_type.as_deref(), Some("text/plain"));
        }
        other => panic!("expected NotEventStream, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_origin_fails_to_connect() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let origin = Url::parse(&format!("http://{addr}/")).unwrap();
    let config = ConnectionConfig::new(origin, RESOURCE);
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    assert!(matches!(
        page.run().await,
        Err(ConnectionError::Connect { .. })
    ));
    assert!(page.container().texts().is_empty());
}

#[tokio::test]
async fn redirect_loop_hits_limit() {
    let origin = MockOrigin::start(|req| match req.path.as_str() {
        "/a" => MockResponse::redirect(307, "/b"),
        _ => MockResponse::redirect(307, "/a"),
    })
    .await;

    let client = HttpClient::new(ClientSettings {
        max_redirects: 3,
        ..ClientSettings::default()
    });
    let result = client.fetch(Request::get(origin.url("/a"))).await;

    assert!(matches!(
        result,
        Err(ConnectionError::TooManyRedirects { limit: 3 })
    ));
    assert_eq!(origin.requests().len(), 4);
}

#[tokio::test]
async fn see_other_rewrites_post_to_get() {
    let origin = MockOrigin::start(|req| match req.path.as_str() {
        "/submit" => MockResponse::redirect(303, "/result"),
        _ => MockResponse::text(200, "done"),
    })
    .await;

    let client = HttpClient::default();
    let request = Request::new(streamprobe::http::Method::Post, origin.url("/submit"))
        .header("Content-Type", "text/plain")
        .body("payload");
    let response = client.fetch(request).await.unwrap();

    assert!(response.redirected);
    assert_eq!(response.url.path(), "/result");
    assert_eq!(response.text(), "done");

    let result = &origin.requests_to("/result")[0];
    assert_eq!(result.method, "GET");
    assert_eq!(result.header("content-length"), None);
}

#[tokio::test]
async fn cross_origin_redirect_drops_authorization() {
    let target = MockOrigin::start(|_| MockResponse::text(200, "landed")).await;
    let landing = target.url("/landing");
    let origin = MockOrigin::start(move |_| MockResponse::redirect(302, landing.as_str())).await;

    let client = HttpClient::default();
    let response = client
        .fetch(Request::get(origin.url("/start")).bearer_auth("secret"))
        .await
        .unwrap();

    assert_eq!(response.text(), "landed");
    assert_eq!(
        origin.requests()[0].header("authorization"),
        Some("Bearer secret")
    );
    assert_eq!(target.requests()[0].header("authorization"), None);
}

#[tokio::test]
async fn cors_rejects_response_without_allow_origin() {
    let origin = MockOrigin::start(|_| MockResponse::event_stream(&["data: x\n\n"])).await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE).with_page_origin(page_origin());
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    assert!(matches!(
        page.open_stream().await,
        Err(ConnectionError::Cors { .. })
    ));
    let stream = &origin.requests_to(&stream_path())[0];
    assert_eq!(stream.header("origin"), Some(PAGE_ORIGIN));
}

#[tokio::test]
async fn cors_direct_stream_needs_no_preflight() {
    let origin = MockOrigin::start(|req| match req.path.as_str() {
        "/" => MockResponse::text(200, "ok").header("Access-Control-Allow-Origin", "*"),
        _ => MockResponse::event_stream(&["data: allowed\n\n"])
            .header("Access-Control-Allow-Origin", PAGE_ORIGIN),
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE).with_page_origin(page_origin());
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    page.run().await.unwrap();

    assert_eq!(page.container().texts(), vec!["message: allowed"]);
    assert!(origin.requests().iter().all(|r| r.method != "OPTIONS"));
}

#[tokio::test]
async fn cors_preflight_rejects_authorization_when_only_content_type_allowed() {
    let origin = MockOrigin::start(|req| match req.method.as_str() {
        "OPTIONS" => MockResponse::text(204, "")
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Headers", "content-type"),
        _ => MockResponse::text(200, "").header("Access-Control-Allow-Origin", "*"),
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE)
        .with_header_priming("secret")
        .with_page_origin(page_origin());
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();

    match page.open_stream().await {
        Err(ConnectionError::Cors { reason, .. }) => assert!(reason.contains("authorization")),
        other => panic!("expected CORS failure, got {other:?}"),
    }

    let preflight = &origin.requests()[0];
    assert_eq!(preflight.method, "OPTIONS");
    assert_eq!(
        preflight.header("access-control-request-headers"),
        Some("authorization")
    );
    // The actual priming request is never sent.
    assert_eq!(origin.requests().len(), 1);
}

#[tokio::test]
async fn cors_preflight_accepts_listed_authorization() {
    let path = stream_path();
    let origin = MockOrigin::start(move |req| {
        if req.method == "OPTIONS" {
            return MockResponse::text(204, "")
                .header("Access-Control-Allow-Origin", PAGE_ORIGIN)
                .header("Access-Control-Allow-Headers", "Content-Type, Authorization");
        }
        let response = if req.path == path && req.header("authorization").is_none() {
            MockResponse::event_stream(&["data: via cors\n\n"])
        } else {
            MockResponse::text(200, "primed")
        };
        response.header("Access-Control-Allow-Origin", PAGE_ORIGIN)
    })
    .await;

    let config = ConnectionConfig::new(origin.origin(), RESOURCE)
        .with_header_priming("secret")
        .with_page_origin(page_origin());
    let mut page = StreamPageClient::new(config, MessageList::new()).unwrap();
    let source = page.open_stream().await.unwrap();
    let messages: Vec<_> = source.into_stream().collect().await;

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].as_ref().unwrap().data, "via cors");
    assert_eq!(
        origin
            .requests()
            .iter()
            .filter(|r| r.method == "OPTIONS")
            .count(),
        1
    );
}

#[tokio::test]
async fn event_source_direct_with_extra_headers() {
    let origin = MockOrigin::start(|_| {
        MockResponse::event_stream(&["retry: 1500\n", "id: 7\ndata: one\n\n", "data: two\n\n"])
    })
    .await;

    let mut extra = Headers::new();
    extra.insert("X-Probe", "1");
    let client = HttpClient::new(ClientSettings::default()).with_cors(CorsCheck::new(PAGE_ORIGIN));
    // No ACAO on the mock; use a plain client for the actual read.
    assert!(
        EventSource::connect(&client, origin.url("/events"), extra.clone())
            .await
            .is_err()
    );

    let client = HttpClient::default();
    let mut source = EventSource::connect(&client, origin.url("/events"), extra)
        .await
        .unwrap();
    assert_eq!(source.next_message().await.unwrap().unwrap().data, "one");
    assert_eq!(source.last_event_id(), "7");
    assert_eq!(source.next_message().await.unwrap().unwrap().data, "two");
    assert!(source.next_message().await.is_none());
    assert_eq!(source.retry(), Some(Duration::from_millis(1500)));

    let sent = origin.requests();
    assert_eq!(sent.last().unwrap().header("x-probe"), Some("1"));
    assert_eq!(sent.last().unwrap().header("cache-control"), Some("no-cache"));
}
