//! The selection protocol engine.
//!
//! [`SelectionDaemon`] owns a selection and answers other clients'
//! requests for it; [`fetch`] is the requesting side. Both speak in
//! [`registry::ClipboardType`]s and encode bodies with [`codec`].

pub mod codec;
pub mod daemon;
pub mod fetch;
pub mod registry;
pub mod request;
pub mod transfer;

pub use daemon::SelectionDaemon;
pub use fetch::{fetch, fetch_targets};

use crate::x11::{Atom, Connection, X11Error};

/// Protocol atoms shared by both sides.
#[derive(Debug, Clone)]
pub struct SelectionAtoms {
    pub targets: Atom,
    pub multiple: Atom,
    pub timestamp: Atom,
    pub atom: Atom,
    pub atom_pair: Atom,
    pub incr: Atom,
    pub integer: Atom,
}

impl SelectionAtoms {
    pub fn intern(conn: &Connection) -> Result<Self, X11Error> {
        Ok(Self {
            targets: conn.atom("TARGETS")?,
            multiple: conn.atom("MULTIPLE")?,
            timestamp: conn.atom("TIMESTAMP")?,
            atom: conn.atom("ATOM")?,
            atom_pair: conn.atom("ATOM_PAIR")?,
            incr: conn.atom("INCR")?,
            integer: conn.atom("INTEGER")?,
        })
    }
}

