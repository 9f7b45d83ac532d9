use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use loragate::log_format::UptimeFormat;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "loragate",
    version,
    about = "LoRa APRS iGate and digipeater"
)]
struct Cli {
    /// Gateway config file (default: $LORAGATE_CONFIG, then ./gateway.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway until SIGINT/SIGTERM
    Run {
        /// Override station.callsign
        #[arg(long, env = "LORAGATE_CALLSIGN")]
        callsign: Option<String>,

        /// Override station.passcode
        #[arg(long, env = "LORAGATE_PASSCODE", hide_env_values = true)]
        passcode: Option<String>,
    },
    /// Parse a TNC2 frame and show what the gateway would do with it
    Check {
        /// Frame text, e.g. "N0CALL>APRS,WIDE1-1:!payload"
        frame: String,

        /// Digipeater callsign to evaluate the path against
        #[arg(long, default_value = "N0CALL")]
        callsign: String,
    },
    /// Print the login, beacon and telemetry lines for the current config
    Beacon,
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("LORAGATE_ENV").ok().map(Into::into),
            attach_stacktrace: true,
            ..Default::default()
        },
    )))
}

fn init_tracing(with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().event_format(UptimeFormat::new());

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
    if with_sentry {
        registry.with(sentry_tracing::layer()).init();
    } else {
        registry.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let sentry_guard = init_sentry();
    init_tracing(sentry_guard.is_some());

    let config_path = cli
        .config
        .unwrap_or_else(loragate::config::gateway_config_path);

    match cli.command {
        Commands::Run { callsign, passcode } => {
            commands::handle_run(&config_path, callsign, passcode).await
        }
        Commands::Check { frame, callsign } => commands::handle_check(&frame, &callsign),
        Commands::Beacon => commands::handle_beacon(&config_path),
    }
}
