//! Requesting side: read the current selection from its owner.

use x11rb::NONE;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::Property as PropertyState;

use super::registry::Registry;
use super::{SelectionAtoms, codec};
use crate::content::ClipboardContent;
use crate::x11::{Atom, Connection, Window, X11Error};

/// Property on our window that owners deliver replies into.
const REPLY_PROPERTY: &str = "CLIPSEL_SELECTION";

/// Fetch `selection` in the best target its owner offers.
///
/// An unowned selection, or one offering nothing we understand, is
/// `Empty`. So is a conversion the owner refuses.
pub fn fetch(conn: &Connection, selection: &str) -> Result<ClipboardContent, X11Error> {
    let Some(session) = Session::open(conn, selection)? else {
        return Ok(ClipboardContent::Empty);
    };
    let offered = session.targets()?;
    let Some(ty) = Registry::global().find_best(offered.iter().map(Atom::name)) else {
        tracing::debug!(offered = offered.len(), "no supported target offered");
        return Ok(ClipboardContent::Empty);
    };
    tracing::debug!(requested = ty.name(), "fetching selection");

    let target = conn.atom(ty.name())?;
    match session.receive(&target)? {
        Some(body) => Ok(codec::decode(&ty, &body)),
        None => Ok(ClipboardContent::Empty),
    }
}

/// Names of the targets the owner of `selection` offers.
pub fn fetch_targets(conn: &Connection, selection: &str) -> Result<Vec<String>, X11Error> {
    let Some(session) = Session::open(conn, selection)? else {
        return Ok(Vec::new());
    };
    Ok(session
        .targets()?
        .iter()
        .map(|atom| atom.name().to_owned())
        .collect())
}

struct Session<'c> {
    atoms: SelectionAtoms,
    selection: Atom,
    property: Atom,
    window: Window<'c>,
}

impl<'c> Session<'c> {
    /// `None` if nobody owns the selection.
    fn open(conn: &'c Connection, selection: &str) -> Result<Option<Self>, X11Error> {
        let selection = conn.atom(selection)?;
        if conn.selection_owner(&selection)? == NONE {
            tracing::debug!(selection = %selection, "selection has no owner");
            return Ok(None);
        }
        Ok(Some(Self {
            atoms: SelectionAtoms::intern(conn)?,
            property: conn.atom(REPLY_PROPERTY)?,
            window: Window::create(conn)?,
            selection,
        }))
    }

    fn targets(&self) -> Result<Vec<Atom>, X11Error> {
        let Some(reply) =
            self.window
                .convert_selection(&self.selection, &self.atoms.targets, &self.property)?
        else {
            return Ok(Vec::new());
        };
        let conn = self.window.connection();
        reply.iter().map(|value| conn.atom_by_value(value)).collect()
    }

    /// Convert to `target` and collect the body, following INCR if the
    /// owner starts one.
    fn receive(&self, target: &Atom) -> Result<Option<Vec<u8>>, X11Error> {
        let Some(first) = self
            .window
            .convert_selection(&self.selection, target, &self.property)?
        else {
            return Ok(None);
        };
        if *first.type_() != self.atoms.incr {
            return Ok(Some(first.data().to_vec()));
        }

        // Reading the announcement deleted it, which starts the transfer.
        tracing::debug!(announced = first.iter().next().unwrap_or(0), "receiving INCR");
        let mut body = Vec::new();
        let window = self.window.id();
        let property = &self.property;
        loop {
            self.window.wait_for_event("INCR chunk", &mut |e| match e {
                Event::PropertyNotify(p)
                    if p.window == window
                        && *property == p.atom
                        && p.state == PropertyState::NEW_VALUE =>
                {
                    Some(())
                }
                _ => None,
            })?;
            let Some(chunk) = self.window.take_property(property)? else {
                continue;
            };
            if chunk.is_empty() {
                break;
            }
            body.extend_from_slice(chunk.data());
        }
        Ok(Some(body))
    }
}
