//! Client side connection setup: resolve once, then retry the candidate
//! list once per tick until something answers or the window closes.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout};

use crate::config::ClientConfig;
use crate::error::UploadError;

/// Resolve `host:port` into candidates, in resolver order. Not retried.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, UploadError> {
    let resolved = lookup_host((host, port))
        .await
        .map_err(|e| UploadError::Resolve {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        })?;
    let candidates: Vec<SocketAddr> = resolved.collect();
    if candidates.is_empty() {
        return Err(UploadError::Resolve {
            host: host.to_string(),
            port,
            reason: "no addresses".to_string(),
        });
    }
    Ok(candidates)
}

/// Try every candidate in order; the first to connect wins. A failed pass
/// sleeps one tick. After `max_passes` failed passes the connect times out.
///
/// Each attempt is itself bounded by one tick so a black-holed address
/// cannot hold up the pass.
pub async fn connect_with_retry(
    candidates: &[SocketAddr],
    tick: Duration,
    max_passes: u32,
) -> Result<TcpStream, UploadError> {
    let started = Instant::now();
    let mut passes = 0u32;
    while passes < max_passes {
        for addr in candidates {
            if let Ok(Ok(stream)) = timeout(tick, TcpStream::connect(addr)).await {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
        }
        passes += 1;
        sleep(tick).await;
    }
    Err(UploadError::ConnectTimeout {
        attempts: passes,
        elapsed: started.elapsed(),
    })
}

pub async fn connect(cfg: &ClientConfig) -> Result<TcpStream, UploadError> {
    let candidates = resolve(&cfg.host, cfg.port).await?;
    connect_with_retry(&candidates, cfg.tick, cfg.connect_ticks).await
}
