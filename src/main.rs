use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use fsevent_watch::cli::Cli;
use fsevent_watch::config::{Configuration, Settings};
use fsevent_watch::watcher::{NotifySource, RunLoop};
use fsevent_watch::{HostCapabilities, logging, process};

fn main() -> ExitCode {
    if let Err(e) = process::detach_process_group() {
        eprintln!("Unable to set new process group. ({e})");
        return ExitCode::FAILURE;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fsevent_watch: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    logging::init_with_config(&settings.logging);

    let config = Configuration::build(cli.into_request(), &HostCapabilities)?;
    config.log_summary();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let shutdown = process::shutdown_signal().context("Failed to install signal handlers")?;
        let source = NotifySource::new(settings.queue_capacity);
        let stdout = std::io::stdout().lock();

        let summary = RunLoop::new(&config, stdout)
            .run(&source, shutdown)
            .await?;

        fsevent_watch::log_event!(
            "run_loop",
            "finished",
            "{} batches, {} events",
            summary.batches,
            summary.events
        );
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
