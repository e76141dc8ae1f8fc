pub mod args;
pub mod run;

use tracing_subscriber::EnvFilter;

/// Exit codes for different error conditions
pub mod exit_codes {
    /// Successful execution
    pub const SUCCESS: u8 = 0;
    /// Network/connection error (e.g., host unreachable, connection refused)
    pub const NETWORK_ERROR: u8 = 1;
    /// Authentication error (broker rejected the login)
    pub const AUTH_ERROR: u8 = 2;
    /// Protocol error (e.g., unexpected broker response)
    pub const PROTOCOL_ERROR: u8 = 3;
    /// Missing or invalid command-line arguments
    pub const USAGE_ERROR: u8 = 4;
    /// A received message could not be parsed
    pub const DATA_ERROR: u8 = 5;
    /// Local file could not be read or written
    pub const IO_ERROR: u8 = 6;
}

/// Install the stderr log subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
