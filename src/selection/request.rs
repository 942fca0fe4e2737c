use std::rc::Rc;

use x11rb::NONE;
use x11rb::protocol::xproto::{SELECTION_NOTIFY_EVENT, SelectionNotifyEvent, SelectionRequestEvent};

use crate::x11::{Atom, Window, WindowCache, X11Error};

/// One incoming conversion request, with atoms and requestor resolved.
///
/// Built per SelectionRequest event, and once more per pair when a
/// MULTIPLE batch is expanded. Sub-requests share the batch's requestor
/// handle.
#[derive(Debug, Clone)]
pub struct SelectionRequest<'c> {
    event: SelectionRequestEvent,
    requestor: Rc<Window<'c>>,
    target: Atom,
    property: Atom,
    multiple: bool,
}

impl<'c> SelectionRequest<'c> {
    /// Resolve `event`. A request naming no property gets its reply in a
    /// property named after the target.
    pub fn new(
        event: SelectionRequestEvent,
        windows: &mut WindowCache<'c>,
    ) -> Result<Self, X11Error> {
        let requestor = windows.get(event.requestor)?;
        let conn = requestor.connection();
        let target = conn.atom_by_value(event.target)?;
        let property = if event.property == NONE {
            target.clone()
        } else {
            conn.atom_by_value(event.property)?
        };
        Ok(Self {
            event,
            requestor,
            target,
            property,
            multiple: false,
        })
    }

    /// A sub-request of this MULTIPLE batch.
    pub fn with_pair(&self, target: Atom, property: Atom) -> Self {
        Self {
            event: self.event,
            requestor: Rc::clone(&self.requestor),
            target,
            property,
            multiple: true,
        }
    }

    pub fn requestor(&self) -> &Rc<Window<'c>> {
        &self.requestor
    }

    pub fn target(&self) -> &Atom {
        &self.target
    }

    pub fn property(&self) -> &Atom {
        &self.property
    }

    /// Whether this is one pair of a MULTIPLE batch.
    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// The SelectionNotify answering this request. Pass `None` to refuse.
    pub fn reply(&self, property: Option<&Atom>) -> SelectionNotifyEvent {
        SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: self.event.time,
            requestor: self.event.requestor,
            selection: self.event.selection,
            target: self.event.target,
            property: property.map_or(NONE, Atom::value),
        }
    }
}
