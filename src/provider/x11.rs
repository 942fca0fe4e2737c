//! X11 clipboard provider: speaks the selection protocol directly.
//!
//! Reads run in the calling process. Writes hand the content to a
//! detached [`SelectionDaemon`] that keeps serving it after this process
//! exits.

use std::io::Write;
use std::time::Duration;

use crate::config::Config;
use crate::content::ClipboardContent;
use crate::detach::{Detach, Readiness};
use crate::provider::{ClipboardProvider, ProviderError};
use crate::selection::{SelectionDaemon, fetch, fetch_targets};
use crate::x11::{Connection, X11Error};

#[derive(Debug, Clone)]
pub struct X11ClipboardProvider {
    selection: &'static str,
    daemon_timeout: Duration,
    client_timeout: Duration,
    foreground: bool,
}

impl X11ClipboardProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            selection: config.selection.atom_name(),
            daemon_timeout: config.daemon_timeout,
            client_timeout: config.client_timeout,
            foreground: config.foreground,
        }
    }
}

impl ClipboardProvider for X11ClipboardProvider {
    fn read(&self) -> ClipboardContent {
        let fetched = Connection::open(self.client_timeout)
            .and_then(|conn| fetch(&conn, self.selection));
        or_empty(fetched)
    }

    fn write(&self, content: ClipboardContent) -> Result<(), ProviderError> {
        let selection = self.selection;
        let timeout = self.daemon_timeout;
        Detach::new()
            .before_detach(flush_std_streams)
            .on_fallback(move || tracing::info!(selection, "serving selection in the foreground"))
            .foreground(self.foreground)
            .spawn(move |readiness| {
                let conn = Connection::open(timeout)?;
                serve(&conn, selection, &content, readiness)
            })?;
        Ok(())
    }

    fn targets(&self) -> Result<Vec<String>, ProviderError> {
        let conn = Connection::open(self.client_timeout)?;
        Ok(fetch_targets(&conn, self.selection)?)
    }
}

/// Own `selection` for `content`, report readiness, and serve until
/// ownership is lost.
fn serve(
    conn: &Connection,
    selection: &str,
    content: &ClipboardContent,
    readiness: &mut Readiness,
) -> Result<(), X11Error> {
    let mut daemon = SelectionDaemon::new(conn, selection, content)?;
    tracing::info!(
        selection,
        window = daemon.window_id(),
        acquired_at = daemon.acquired_at(),
        detached = readiness.is_detached(),
        "serving selection"
    );
    readiness.ready();
    daemon.run()
}

/// Flush buffered output so the forked children do not write it again.
fn flush_std_streams() {
    if let Err(e) = std::io::stdout().flush() {
        tracing::debug!(error = %e, "failed to flush stdout before detaching");
    }
    if let Err(e) = std::io::stderr().flush() {
        tracing::debug!(error = %e, "failed to flush stderr before detaching");
    }
}

fn or_empty(fetched: Result<ClipboardContent, X11Error>) -> ClipboardContent {
    fetched.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to read selection, treating it as empty");
        ClipboardContent::Empty
    })
}
