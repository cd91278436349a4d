use clap::Parser;
use imposter_engine::logging::{init_logging, LogFormat};
use imposter_engine::{load_plugin_configs, DispatchMode, EngineSettings, ImposterServer};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "imposter", version, about = "Configurable mock-API engine")]
struct Args {
    /// Configuration file or directory of `*-config.{yaml,yml,json}` files
    #[arg(short, long, env = "IMPOSTER_CONFIG_DIR")]
    config: PathBuf,

    #[arg(long, env = "IMPOSTER_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(short, long, env = "IMPOSTER_PORT", default_value = "8080")]
    port: u16,

    #[arg(long, env = "IMPOSTER_DISPATCH_MODE", value_enum, default_value_t = DispatchMode::Inline)]
    dispatch_mode: DispatchMode,

    /// Concurrent pipelines in offloaded mode
    #[arg(long, env = "IMPOSTER_WORKERS", default_value = "64")]
    workers: usize,

    /// Add X-Imposter-Request and Server headers to responses
    #[arg(long, env = "IMPOSTER_ENGINE_HEADERS", default_value = "true", action = clap::ArgAction::Set)]
    engine_headers: bool,

    #[arg(long, env = "IMPOSTER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[arg(long, env = "IMPOSTER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(args.log_format, &args.log_level)?;

    let configs = load_plugin_configs(&args.config)?;
    let settings = EngineSettings {
        listen: SocketAddr::new(args.host, args.port),
        dispatch_mode: args.dispatch_mode,
        workers: args.workers,
        add_engine_headers: args.engine_headers,
        ..EngineSettings::default()
    };

    let server = ImposterServer::build(&configs, &settings).await?;
    info!(
        "Loaded {} configuration file(s) from {}",
        configs.len(),
        args.config.display()
    );

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
