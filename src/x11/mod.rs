//! X11 protocol layer: connection, atoms, windows, properties.
//!
//! Everything above this module speaks in [`Atom`], [`Window`] and
//! [`Property`]; everything below it is a [`backend::Backend`]. The real backend
//! wraps `x11rb::rust_connection::RustConnection`; tests substitute a
//! scripted in-memory display.

pub mod atom;
pub mod backend;
pub mod connection;
pub mod property;
pub mod wait;
pub mod window;

use std::time::Duration;

pub use atom::Atom;
pub use backend::BackendError;
pub use connection::Connection;
pub use property::{Format, Property};
pub use window::{Window, WindowCache};

/// Errors raised by the X11 layer.
///
/// Refusals from other clients are not errors; they surface as `None`
/// or `false` from the operations that can be refused.
#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    /// A second display connection was opened while one is live.
    #[error("an X11 display connection is already open in this process")]
    AlreadyOpen,

    /// A protocol call was issued while another was still in flight.
    #[error("{attempted} called while {in_flight} is still in flight")]
    Reentrant {
        in_flight: &'static str,
        attempted: &'static str,
    },

    /// The display rejected a call or the connection failed during it.
    #[error("{call}: {source}")]
    Protocol {
        call: &'static str,
        #[source]
        source: BackendError,
    },

    /// A bounded wait ran out before the peer answered.
    #[error("timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("unknown property format: {0} bits")]
    UnknownFormat(u8),

    #[error("property of {len} bytes is not a multiple of the {format}-bit element size")]
    Misaligned { len: usize, format: u8 },

    #[error("{0} cannot be constructed from a null resource")]
    NullResource(&'static str),

    /// `get_property` left bytes undelivered; the request was sized wrong.
    #[error("property read left {bytes_after} bytes undelivered")]
    Truncated { bytes_after: u32 },

    /// `SetSelectionOwner` was accepted but another window owns the selection.
    #[error("failed to acquire ownership of {selection}")]
    OwnershipNotAcquired { selection: String },
}
