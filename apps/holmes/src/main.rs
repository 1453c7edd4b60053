use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use holmes_client::app::Holmes;
use holmes_client::config::ClientConfig;
use holmes_client::input;
use holmes_client::render::TracingRenderer;
use holmes_client::telemetry::{self, LogConfig, LogLevel};
use holmes_link::WsConnector;
use holmes_runtime::{FileStore, Runtime};
use tokio::io::BufReader;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "holmes",
    about = "Headless HOLMES dashboard client. Reads one JSON event per line on stdin."
)]
struct Cli {
    /// Dashboard server host and port
    #[arg(long, env = "HOLMES_SERVER")]
    server: Option<String>,

    /// Connect with `wss` instead of `ws`
    #[arg(long)]
    secure: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info, env = "HOLMES_LOG_LEVEL")]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr
    #[arg(long, env = "HOLMES_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("failed to initialise logging")?;

    let config = ClientConfig::from_env().with_overrides(cli.server, cli.secure);
    info!(
        server = %config.server,
        secure = config.secure,
        state = %config.state_file().display(),
        "starting holmes client"
    );

    let store = FileStore::open(config.state_file());
    let runtime = Runtime::new(
        Holmes,
        TracingRenderer::default(),
        Box::new(store),
        WsConnector,
        config.policy,
        config.origin(),
    );

    let (input_done, input_closed) = oneshot::channel();
    let dispatcher = runtime.dispatcher();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        let end = input::read_events(stdin, dispatcher).await;
        let _ = input_done.send(end);
    });

    let state = runtime
        .run_until(async {
            tokio::pin!(input_closed);
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("interrupted"),
                    Err(error) => {
                        warn!(%error, "failed to listen for ctrl-c");
                        let end = input_closed.await;
                        info!(?end, "input closed");
                    }
                },
                end = &mut input_closed => {
                    info!(?end, "input closed");
                }
            }
        })
        .await;

    info!(
        page = %state.page,
        offline = ?state.offline_services(),
        notifications = state.notifications.items().len(),
        "holmes client stopped"
    );
    Ok(())
}
