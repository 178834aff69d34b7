//! ensimd — the edge node simulator daemon.
//!
//! Single binary that runs a simulated edge node fleet:
//! - Node store and fleet service
//! - Per-node onboarding, token manager and agents
//! - REST API with a server-sent node event stream
//!
//! # Usage
//!
//! ```text
//! ensimd serve --config ensim.toml --orch-fqdn orch.example.com
//! ensimd serve --loopback --port 5001
//! ensimd config --config ensim.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ensim_agents::{FleetConnector, GrpcConnector, LocalTokenProvider, LoopbackFleet};
use ensim_api::FleetService;
use ensim_core::SimConfig;
use ensim_node::{LocalOnboarder, NodeCollaborators};
use ensim_store::Store;

#[derive(Parser)]
#[command(name = "ensimd", about = "Edge node simulator daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the simulator and serve its API.
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Answer agent calls in-process instead of dialing the orchestrator.
        #[arg(long)]
        loopback: bool,
    },
    /// Print the effective configuration and exit.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ConfigArgs {
    /// Path to ensim.toml. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// HTTP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Folder holding one sub-folder per simulated node.
    #[arg(long)]
    base_folder: Option<PathBuf>,

    /// Orchestrator domain name.
    #[arg(long)]
    orch_fqdn: Option<String>,
}

impl ConfigArgs {
    /// Load the config file (if any) and apply command-line overrides.
    fn load(&self) -> anyhow::Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SimConfig::default(),
        };
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(folder) = &self.base_folder {
            config.base_folder = folder.clone();
        }
        if let Some(fqdn) = &self.orch_fqdn {
            config.orch_fqdn = fqdn.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { config, loopback } => serve(config.load()?, loopback).await,
        Command::Config { config } => {
            print!("{}", toml::to_string_pretty(&config.load()?)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ensimd=debug,ensim=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn build_service(config: SimConfig, loopback: bool) -> anyhow::Result<FleetService> {
    let connector: Arc<dyn FleetConnector> = if loopback {
        info!("agents report to the in-process control plane");
        Arc::new(LoopbackFleet::new())
    } else {
        Arc::new(GrpcConnector::default())
    };
    let tenant = uuid::Uuid::new_v4().to_string();
    info!(%tenant, "issuing node tokens");

    let collaborators = NodeCollaborators {
        onboarder: Arc::new(LocalOnboarder::new()),
        connector,
        tokens: Arc::new(LocalTokenProvider::new(tenant)),
    };
    Ok(FleetService::new(Store::new(), config, collaborators)?)
}

async fn serve(config: SimConfig, loopback: bool) -> anyhow::Result<()> {
    info!(orch_fqdn = %config.orch_fqdn, base_folder = ?config.base_folder, "edge node simulator starting");

    std::fs::create_dir_all(&config.base_folder)
        .with_context(|| format!("creating {}", config.base_folder.display()))?;
    let addr = config.listen_addr();
    let service = build_service(config, loopback)?;

    // ── Start API server ───────────────────────────────────────

    let router = ensim_api::build_router(service.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    // Watches close as soon as the signal arrives so that open event
    // streams do not hold graceful shutdown open.
    let watches = service.shutdown_token();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            watches.cancel();
        })
        .await?;

    // ── Shutdown ───────────────────────────────────────────────

    service.shutdown().await;
    info!("edge node simulator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn serve_flags_override_config() {
        let cli = Cli::try_parse_from([
            "ensimd",
            "--log-format",
            "json",
            "serve",
            "--loopback",
            "--port",
            "6001",
            "--orch-fqdn",
            "orch.test",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Serve { config, loopback } = cli.command else {
            panic!("expected serve");
        };
        assert!(loopback);
        let config = config.load().unwrap();
        assert_eq!(config.http_port, 6001);
        assert_eq!(config.orch_fqdn, "orch.test");
        assert_eq!(config.listen_addr(), "0.0.0.0:6001");
    }

    #[test]
    fn config_file_is_read_before_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensim.toml");
        std::fs::write(&path, "http_port = 7000\norch_fqdn = \"from.file\"\n").unwrap();

        let args = ConfigArgs {
            config: Some(path),
            orch_fqdn: Some("from.flag".into()),
            ..Default::default()
        };
        let config = args.load().unwrap();
        assert_eq!(config.http_port, 7000);
        assert_eq!(config.orch_fqdn, "from.flag");
    }

    #[test]
    fn empty_fqdn_override_is_rejected() {
        let args = ConfigArgs {
            orch_fqdn: Some(" ".into()),
            ..Default::default()
        };
        assert!(args.load().is_err());
    }

    #[tokio::test]
    async fn loopback_service_serves_health() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimConfig {
            base_folder: dir.path().to_path_buf(),
            ..SimConfig::default()
        };
        let service = build_service(config, true).unwrap();
        let router = ensim_api::build_router(service);

        let resp = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["nodes"], 0);
    }
}
