use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use streamprobe::config::{
    ClientSettings, ConfigError, ConnectionConfig, DEFAULT_ORIGIN, StreamMode,
};
use streamprobe::page::{ListContainer, RenderedListItem, StreamPageClient};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// Open the stream directly, no custom headers.
    Direct,
    /// Send a bearer-token request first, then open the stream on its resolved URL.
    HeaderPriming,
}

impl From<ModeArg> for StreamMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => StreamMode::Direct,
            ModeArg::HeaderPriming => StreamMode::HeaderPriming,
        }
    }
}

/// Probe a remote origin for CORS and Server-Sent Events.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file holding a connection config; flags override its fields.
    #[arg(long, env = "STREAMPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Remote API origin.
    #[arg(long, env = "STREAMPROBE_ORIGIN")]
    origin: Option<Url>,

    /// Stream identifier; the stream lives at `<origin>/stream/<id>`.
    #[arg(long, env = "STREAMPROBE_RESOURCE_ID")]
    resource_id: Option<String>,

    /// Bearer token for header-priming mode.
    #[arg(long, env = "STREAMPROBE_TOKEN")]
    token: Option<String>,

    #[arg(long, value_enum, env = "STREAMPROBE_MODE")]
    mode: Option<ModeArg>,

    /// Also send the bearer token on the stream connection.
    #[arg(long, env = "STREAMPROBE_FORWARD_AUTHORIZATION")]
    forward_authorization: bool,

    /// Origin of the page to emulate; enables CORS enforcement.
    #[arg(long, env = "STREAMPROBE_PAGE_ORIGIN")]
    page_origin: Option<Url>,

    /// Redirects followed per request.
    #[arg(long, env = "STREAMPROBE_MAX_REDIRECTS", default_value_t = 20)]
    max_redirects: usize,

    /// TCP connect timeout in milliseconds.
    #[arg(long, env = "STREAMPROBE_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "STREAMPROBE_LOG", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::from_json_file(path)?,
            None => {
                let origin = match &self.origin {
                    Some(origin) => origin.clone(),
                    None => Url::parse(DEFAULT_ORIGIN).map_err(|e| ConfigError::Invalid {
                        field: "origin",
                        reason: e.to_string(),
                    })?,
                };
                let resource_id = self.resource_id.clone().ok_or_else(|| ConfigError::Invalid {
                    field: "resource_id",
                    reason: "pass --resource-id or --config".to_owned(),
                })?;
                ConnectionConfig::new(origin, resource_id)
            }
        };

        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        if let Some(resource_id) = &self.resource_id {
            config.resource_id = resource_id.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if self.forward_authorization {
            config.forward_authorization = true;
        }
        if let Some(page_origin) = &self.page_origin {
            config.page_origin = Some(page_origin.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            max_redirects: self.max_redirects,
            connect_timeout_ms: self.connect_timeout_ms,
            ..ClientSettings::default()
        }
    }
}

/// Prints each rendered item to stdout as it arrives.
#[derive(Debug, Default)]
struct StdoutList {
    count: usize,
}

impl ListContainer for StdoutList {
    fn append(&mut self, item: RenderedListItem) {
        println!("{}", item.text);
        self.count += 1;
    }

    fn len(&self) -> usize {
        self.count
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match cli.connection_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let settings = cli.client_settings();
    let mut page = match StreamPageClient::with_settings(config, settings, StdoutList::default()) {
        Ok(page) => page,
        Err(e) => {
            tracing::error!(error = %e, "failed to build page client");
            return ExitCode::FAILURE;
        }
    };

    match page.run().await {
        Ok(rendered) => {
            tracing::info!(rendered, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "stream failed");
            ExitCode::FAILURE
        }
    }
}
