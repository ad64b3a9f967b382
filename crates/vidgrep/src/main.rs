use std::num::NonZeroUsize;
use std::str::FromStr;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vidgrep::backend::{ExecutionPlan, display_available_backends};
use vidgrep::cli::parse_cli;
use vidgrep::pipeline::{PipelineConfig, RunError};
use vidgrep::settings::resolve_settings;
use vidgrep_decoder::{Backend, Configuration};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let (args, sources) = parse_cli();

    if args.list_backends {
        display_available_backends();
        return;
    }

    // The progress bar owns the terminal, so logging defaults to warnings.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match resolve_settings(&args, &sources) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let backend_pinned_by_env = std::env::var("VIDGREP_BACKEND").is_ok();
    let mut configuration = match Configuration::from_env() {
        Ok(configuration) => configuration,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    if let Some(name) = settings.backend.as_deref() {
        match Backend::from_str(name) {
            Ok(backend) => configuration.backend = backend,
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
        }
    }
    if let Some(input) = args.input.clone() {
        configuration.input = Some(input);
    }
    if let Some(capacity) = settings.decoder_channel_capacity {
        if let Some(value) = NonZeroUsize::new(capacity) {
            configuration.channel_capacity = Some(value);
        }
    }
    let backend_locked = settings.backend.is_some() || backend_pinned_by_env;

    let mut pipeline = PipelineConfig::from_settings(&settings);
    if let Some(name) = args
        .input
        .as_ref()
        .and_then(|path| path.file_name())
        .and_then(|name| name.to_str())
    {
        pipeline.label = name.to_string();
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let plan = ExecutionPlan::new(configuration, backend_locked, pipeline);
    match plan.run(cancel_rx).await {
        Ok(_) => {}
        Err(RunError::Cancelled) => {
            eprintln!("cancelled");
            std::process::exit(130);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
