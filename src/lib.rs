//! filedrop library
//!
//! One file per TCP connection: the client retries its connect, streams the
//! file in small chunks and closes; the server stores each connection as a
//! numbered artifact and gives up on idle peers.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod log;
pub mod logger;
pub mod progress;
pub mod protocol;
pub mod sequencer;
pub mod server;
pub mod transfer;
pub mod worker;
