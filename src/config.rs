//! Runtime configuration assembled from the command line.

use std::time::Duration;

use clap::ValueEnum;

/// Wait ceiling for the selection daemon's synchronous exchanges.
pub const DEFAULT_DAEMON_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait ceiling for reading the selection from another client.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which X selection to operate on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Selection {
    #[default]
    Clipboard,
    Primary,
}

impl Selection {
    /// Atom name of the selection.
    pub fn atom_name(self) -> &'static str {
        match self {
            Self::Clipboard => "CLIPBOARD",
            Self::Primary => "PRIMARY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub selection: Selection,
    pub daemon_timeout: Duration,
    pub client_timeout: Duration,
    /// Serve the selection from the calling process instead of detaching.
    pub foreground: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            selection: Selection::default(),
            daemon_timeout: DEFAULT_DAEMON_TIMEOUT,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            foreground: false,
        }
    }
}

impl Config {
    /// Apply one ceiling to both sides, as `--timeout-ms` does.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.daemon_timeout = timeout;
        self.client_timeout = timeout;
        self
    }
}
