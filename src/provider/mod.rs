//! Provider abstraction: the system clipboard as the rest of the tool
//! sees it.
//!
//! A provider offers two operations: read whatever the system clipboard
//! currently holds, and publish new content to it. Storage of content
//! between invocations is not a provider concern.

pub mod x11;

use crate::content::ClipboardContent;
use crate::detach::DetachError;
use crate::x11::X11Error;

pub use self::x11::X11ClipboardProvider;

/// Errors returned by clipboard providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The display could not be reached or misbehaved.
    #[error("display: {0}")]
    Display(#[from] X11Error),

    /// The background owner process could not be started or failed early.
    #[error("selection daemon: {0}")]
    Daemon(#[from] DetachError),
}

/// Reads and publishes the system clipboard.
pub trait ClipboardProvider {
    /// Current clipboard content. Failures read as [`ClipboardContent::Empty`].
    fn read(&self) -> ClipboardContent;

    /// Publish `content`. Returns once it is being served, not once
    /// anyone has read it.
    fn write(&self, content: ClipboardContent) -> Result<(), ProviderError>;

    /// Target names the current owner offers.
    fn targets(&self) -> Result<Vec<String>, ProviderError>;
}
