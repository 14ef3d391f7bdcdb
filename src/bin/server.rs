use anyhow::{Context, Result};
use std::sync::Arc;

use filedrop::cli::{parse_or_exit, ServerOpts};
use filedrop::error::{EXIT_IO, EXIT_USAGE};
use filedrop::log::TransferLog;
use filedrop::logger::{Logger, NoopLogger, TextLogger};
use filedrop::server::{Server, Shutdown};

fn main() {
    let opts: ServerOpts = parse_or_exit();

    let cfg = match opts.to_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    // Choose logger once; NoopLogger keeps the hot path free
    let logger: Arc<dyn Logger> = match opts.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("warning: log file {} unavailable: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };
    let journal = opts.journal.as_ref().map(|p| Arc::new(TransferLog::new(p)));

    // SIGINT/SIGTERM/SIGHUP request a graceful stop; a second one skips the drain
    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            if shutdown.request() {
                eprintln!("\nTermination signal received. Shutting down...");
            } else {
                eprintln!("\nSecond signal received. Exiting without waiting for transfers.");
                std::process::exit(130);
            }
        }) {
            eprintln!("warning: unable to install signal handler: {}", e);
        }
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(EXIT_IO);
        }
    };

    let result: Result<()> = rt.block_on(async move {
        let server = Server::bind(&cfg, logger, journal)
            .await
            .with_context(|| format!("start server on {}", cfg.bind_addr()))?;
        let summary = server.run(async move { shutdown.wait().await }).await?;
        eprintln!(
            "Stopped after {} connection(s); {} finished during shutdown, {} aborted",
            summary.accepted, summary.drained, summary.aborted
        );
        Ok(())
    });

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(EXIT_IO);
        }
    }
}
