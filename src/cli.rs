//! Shared CLI helpers and the Clap definitions for both binaries

use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{ClientConfig, ServerConfig};
use crate::error::EXIT_USAGE;
use crate::protocol::MAX_RESERVED_PORT;

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s
        .parse()
        .map_err(|_| format!("invalid port number: {}", s))?;
    if port <= MAX_RESERVED_PORT {
        return Err(format!(
            "invalid port number: {} (must be greater than {})",
            port, MAX_RESERVED_PORT
        ));
    }
    Ok(port)
}

fn non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("value must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

/// Upload one file to a filedrop server
#[derive(Clone, Debug, Parser)]
#[command(name = "client", version)]
pub struct ClientOpts {
    /// hostname or IP address of the server to connect with
    #[arg(value_name = "HOSTNAME-OR-IP", value_parser = non_empty)]
    pub host: String,

    /// port number of the server to connect with
    #[arg(value_name = "PORT", value_parser = parse_port)]
    pub port: u16,

    /// name of the file to transfer to the server
    #[arg(value_name = "FILENAME")]
    pub filename: PathBuf,

    /// Show a progress bar while sending
    #[arg(long)]
    pub progress: bool,
}

impl ClientOpts {
    pub fn to_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new(self.host.clone(), self.port, self.filename.clone());
        cfg.progress = self.progress;
        cfg
    }
}

/// Receive uploads and store each one as a numbered file
#[derive(Clone, Debug, Parser)]
#[command(name = "server", version)]
pub struct ServerOpts {
    /// port number to listen on connections
    #[arg(value_name = "PORT", value_parser = parse_port)]
    pub port: u16,

    /// directory name where to save the received files
    #[arg(value_name = "FILE-DIR", value_parser = non_empty)]
    pub file_dir: String,

    /// TOML file with server tunables (tick_ms, idle_ticks, max_workers, ...)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append timestamped server events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per finished transfer to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Cap on concurrently running transfers
    #[arg(long = "max-workers")]
    pub max_workers: Option<usize>,
}

impl ServerOpts {
    /// Defaults, then the config file, then command-line values.
    pub fn to_config(&self) -> anyhow::Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(p) => ServerConfig::load(p)?,
            None => ServerConfig::default(),
        };
        cfg.port = self.port;
        cfg.file_dir = self.file_dir.clone();
        if let Some(n) = self.max_workers {
            cfg.max_workers = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Parse argv; usage errors print the Clap message and exit with code 1.
/// Help and version output exit 0 as usual.
pub fn parse_or_exit<P: Parser>() -> P {
    match P::try_parse() {
        Ok(p) => p,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(EXIT_USAGE);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_args() {
        let opts = ClientOpts::try_parse_from(["client", "localhost", "4000", "notes.txt"]).unwrap();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 4000);
        assert_eq!(opts.filename, PathBuf::from("notes.txt"));
        let cfg = opts.to_config();
        assert!(!cfg.progress);
        assert_eq!(cfg.connect_ticks, 15);
    }

    #[test]
    fn test_client_rejects_reserved_port() {
        assert!(ClientOpts::try_parse_from(["client", "localhost", "80", "f"]).is_err());
        assert!(ClientOpts::try_parse_from(["client", "localhost", "1023", "f"]).is_err());
        assert!(ClientOpts::try_parse_from(["client", "localhost", "1024", "f"]).is_ok());
        assert!(ClientOpts::try_parse_from(["client", "localhost", "http", "f"]).is_err());
    }

    #[test]
    fn test_client_requires_three_args() {
        assert!(ClientOpts::try_parse_from(["client", "localhost", "4000"]).is_err());
        assert!(ClientOpts::try_parse_from(["client", "a", "4000", "f", "extra"]).is_err());
    }

    #[test]
    fn test_server_args() {
        let opts = ServerOpts::try_parse_from(["server", "4000", "out", "--max-workers", "3"]).unwrap();
        let cfg = opts.to_config().unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.file_dir, "out");
        assert_eq!(cfg.max_workers, 3);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:4000");
    }

    #[test]
    fn test_server_rejects_bad_args() {
        assert!(ServerOpts::try_parse_from(["server", "4000"]).is_err());
        assert!(ServerOpts::try_parse_from(["server", "22", "out"]).is_err());
        assert!(ServerOpts::try_parse_from(["server", "4000", ""]).is_err());
    }

    #[test]
    fn test_server_config_file_then_flags() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "tick_ms = 100\nmax_workers = 10\nport = 9999").unwrap();
        f.flush().unwrap();
        let path = f.path().to_string_lossy().to_string();

        let opts = ServerOpts::try_parse_from(["server", "4000", "out", "--config", &path]).unwrap();
        let cfg = opts.to_config().unwrap();
        assert_eq!(cfg.tick_ms, 100);
        assert_eq!(cfg.max_workers, 10);
        // Positional port wins over the file
        assert_eq!(cfg.port, 4000);

        let opts = ServerOpts::try_parse_from([
            "server", "4000", "out", "--config", &path, "--max-workers", "2",
        ])
        .unwrap();
        assert_eq!(opts.to_config().unwrap().max_workers, 2);
    }
}
