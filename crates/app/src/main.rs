mod annotation;
mod cli;
mod config;
mod query;
mod server;
mod session;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use infer_core::InferenceEngine;
use tracing::info;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::parse_args()?;
    let metrics_handle = telemetry::init();

    let config = config::ServerConfig::resolve(&cli.overrides)?;

    info!("building the GPU inference engine");
    let engine = Arc::new(
        InferenceEngine::build(config.inference.clone()).context("engine build failed")?,
    );
    info!(
        priors = engine.prior_count(),
        classes = engine.class_count(),
        input_width = engine.input_width(),
        input_height = engine.input_height(),
        "inference engine ready"
    );

    actix_web::rt::System::new().block_on(server::run(config, engine, metrics_handle))
}
