use anyhow::{Context, Result};
use relayscan::{CancelToken, run_scan_with_cancel};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod output;

use args::Cli;

fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // exit codes: 0 no relay, 2 open relay found, 1 fatal
    match run(&cli) {
        Ok(true) => std::process::exit(2),
        Ok(false) => {}
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let options = cli.scan_options()?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, stopping scan");
            cancel.cancel();
        })
        .context("install Ctrl-C handler")?;
    }

    let report = match run_scan_with_cancel(&options, &cancel) {
        Ok(report) => report,
        Err(err) => {
            // hosts checked before the abort are still worth reporting
            if let Some(report) = err.partial_report() {
                let rows = output::select_rows(report, cli);
                output::write_reports(&rows, report, cli)?;
            }
            return Err(err).context("scan failed");
        }
    };
    let rows = output::select_rows(&report, cli);
    output::write_reports(&rows, &report, cli)?;
    Ok(report.vulnerable().next().is_some())
}
