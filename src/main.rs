use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use hf_hub::api::sync::Api;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::AppState;
use crate::config::Config;
use crate::inference::chat_model::ChatModel;
use crate::inference::model_config::SamplingConfig;

mod api;
mod config;
mod error;
mod inference;
mod telemetry;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = "ChatServer.toml")]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {{
        error!($fmt $(, $arg)*);
        std::process::exit($code);
    }};
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    telemetry::init_telemetry();

    let args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(conf) => conf.merge(args.opt_config),
        Err(err) => {
            if args.config_file == "ChatServer.toml" {
                Config::default().merge(args.opt_config)
            } else {
                exit_err!(
                    1,
                    "Failed to read configuration file {} with error: {}",
                    args.config_file,
                    err
                );
            }
        }
    };

    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    // Eager load: a cold start pays the download here instead of on the
    // first request.
    info!("Loading model weights");
    let load_start = std::time::Instant::now();
    let model = ChatModel::load(Api::new()?, SamplingConfig::default())?;
    info!(
        "Model ready after {:.1}s",
        load_start.elapsed().as_secs_f64()
    );

    let state = AppState {
        generator: Arc::new(Mutex::new(model)),
    };
    let router = api::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
