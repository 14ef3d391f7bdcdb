//! filedrop client: push one file to a filedrop server
//!
//! Exit codes: 1 usage, 2 resolve/connect/open, 3 I/O during transfer.

use anyhow::{Context, Result};
use std::time::Instant;

use filedrop::cli::{parse_or_exit, ClientOpts};
use filedrop::config::ClientConfig;
use filedrop::error::{exit_code_for, EXIT_IO};
use filedrop::progress::SendProgress;
use filedrop::transfer::{self, TransferSummary};
use filedrop::connector;

fn main() {
    // Set up Ctrl-C handler
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    }) {
        eprintln!("warning: unable to install Ctrl-C handler: {}", e);
    }

    let opts: ClientOpts = parse_or_exit();
    let cfg = opts.to_config();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ERROR: failed to build tokio runtime: {}", e);
            std::process::exit(EXIT_IO);
        }
    };

    match rt.block_on(run(&cfg)) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

async fn run(cfg: &ClientConfig) -> Result<TransferSummary> {
    let started = Instant::now();
    let addr = format!("{}:{}", cfg.host, cfg.port);
    eprintln!("Connecting {}...", addr);
    let mut stream = connector::connect(cfg)
        .await
        .with_context(|| format!("connect {}", addr))?;

    let total = tokio::fs::metadata(&cfg.file).await.map(|m| m.len()).unwrap_or(0);
    let progress = if cfg.progress {
        SendProgress::new(total)
    } else {
        SendProgress::hidden()
    };

    let result = transfer::send_file(&cfg.file, &mut stream, &progress).await;
    match &result {
        Ok(summary) => progress.finish_success(summary.bytes_sent),
        Err(e) => progress.finish_error(&e.to_string()),
    }
    let summary = result.with_context(|| format!("send {}", cfg.file.display()))?;
    eprintln!(
        "Sent {} ({} bytes, {} chunks) in {:.2}s",
        cfg.file.display(),
        summary.bytes_sent,
        summary.chunks,
        started.elapsed().as_secs_f64()
    );
    Ok(summary)
}
