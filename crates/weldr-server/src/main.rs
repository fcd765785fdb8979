use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use weldr_backend::LocalWorker;
use weldr_core::Weldr;
use weldr_server::{Cli, ServerError, Settings};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.log_level() {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), ServerError> {
    weldr_core::install_signal_handler();
    let settings = Settings::resolve(cli)?;
    let (adapters, queue) = settings.adapters()?;

    info!("state directory: {}", settings.state_dir.display());
    let weldr = Arc::new(Weldr::open(&settings.weldr_config(), adapters)?);

    let worker = if settings.local_worker {
        Some(LocalWorker::new(queue.clone()).spawn()?)
    } else {
        None
    };

    let result = weldr_server::run_server(&weldr, &settings.listener);
    if let Some(worker) = worker {
        worker.stop();
    }
    queue.close();
    result
}
