//! Shared protocol constants for the filedrop byte stream
//!
//! There is no framing on the wire: the client writes the file body and
//! closes, the server persists whatever arrives until EOF or idle timeout.

// Largest single receive on the server side
pub const CHUNK_SIZE: usize = 1024;

// Client reads one byte less than a full chunk per source read
pub const SEND_CHUNK_SIZE: usize = CHUNK_SIZE - 1;

// Written over partial content when a transfer stalls
pub const SENTINEL: &[u8] = b"ERROR";

// Artifact file suffix
pub const ARTIFACT_SUFFIX: &str = ".file";

// Ports at or below this are reserved and rejected by both binaries
pub const MAX_RESERVED_PORT: u16 = 1023;

// Listen backlog for the server socket
pub const LISTEN_BACKLOG: u32 = 1;

// Default cap on concurrently running connection workers
pub const DEFAULT_MAX_WORKERS: usize = 256;

// Centralized timeout constants shared by client and server
pub mod timeouts {
    use std::time::Duration;

    // One idle tick / retry pass (ms)
    pub const TICK_MS: u64 = 1000;

    // Consecutive idle ticks before the server gives up on a connection
    pub const IDLE_TICKS: u32 = 15;

    // Failed connect passes before the client gives up
    pub const CONNECT_TICKS: u32 = 15;

    pub fn tick() -> Duration {
        Duration::from_millis(TICK_MS)
    }

    // How long a full idle timeout lasts for a given tick length
    pub fn idle_window(tick: Duration, ticks: u32) -> Duration {
        tick * ticks
    }
}
