//! Multi-step transfers driven by requestor events.

use std::rc::Rc;

use x11rb::protocol::Event;
use x11rb::protocol::xproto::{EventMask, Property as PropertyState};

use crate::x11::{Atom, Property, Window, X11Error};

/// A transfer in progress with one requestor.
///
/// The daemon feeds every event to every live transfer; each one picks
/// out the events that concern it.
pub trait Transfer {
    fn is_done(&self) -> bool;

    fn handle(&mut self, event: &Event) -> Result<(), X11Error>;

    /// Window id of the requestor being served.
    fn requestor(&self) -> u32;

    /// Whether the transfer ended without the requestor receiving everything.
    fn is_abandoned(&self) -> bool;
}

/// INCR delivery of a property too large for one request.
///
/// The requestor deletes the reply property each time it has read it;
/// every deletion is answered with the next chunk. After the payload a
/// zero-length chunk is written, and the transfer is done once the
/// requestor deletes that too.
#[derive(Debug)]
pub struct IncrTransfer<'c> {
    requestor: Rc<Window<'c>>,
    property: Property,
    chunk_len: usize,
    offset: usize,
    final_sent: bool,
    done: bool,
    abandoned: bool,
}

impl<'c> IncrTransfer<'c> {
    /// Announce `property` to the requestor as an INCR transfer.
    ///
    /// The caller still has to send the SelectionNotify.
    pub fn start(
        requestor: Rc<Window<'c>>,
        property: Property,
        incr: &Atom,
    ) -> Result<Self, X11Error> {
        requestor.select_input(EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY)?;

        let size = u32::try_from(property.size()).unwrap_or(u32::MAX);
        let announce = Property::u32s(property.name().clone(), incr.clone(), &[size]);
        requestor.set_property(&announce)?;

        let chunk_bytes = requestor.connection().max_request_bytes() / 2;
        let chunk_len = (chunk_bytes / property.format().size()).max(1);
        tracing::debug!(
            requestor = requestor.id(),
            property = %property.name(),
            size,
            chunk_len,
            "starting INCR transfer"
        );
        Ok(Self {
            requestor,
            property,
            chunk_len,
            offset: 0,
            final_sent: false,
            done: false,
            abandoned: false,
        })
    }

    fn send_next(&mut self) -> Result<(), X11Error> {
        let chunk = self
            .property
            .range(self.offset, self.offset + self.chunk_len);
        self.offset += chunk.len();
        self.requestor.set_property(&chunk)?;
        if chunk.is_empty() {
            self.final_sent = true;
        }
        Ok(())
    }
}

impl Transfer for IncrTransfer<'_> {
    fn is_done(&self) -> bool {
        self.done
    }

    fn handle(&mut self, event: &Event) -> Result<(), X11Error> {
        if self.done {
            return Ok(());
        }
        match event {
            Event::PropertyNotify(e)
                if e.window == self.requestor.id()
                    && *self.property.name() == e.atom
                    && e.state == PropertyState::DELETE =>
            {
                if self.final_sent {
                    tracing::debug!(requestor = e.window, "INCR transfer complete");
                    self.done = true;
                    Ok(())
                } else {
                    self.send_next()
                }
            }
            Event::DestroyNotify(e) if e.window == self.requestor.id() => {
                tracing::warn!(
                    requestor = e.window,
                    sent = self.offset,
                    total = self.property.len(),
                    "requestor destroyed mid-transfer"
                );
                self.done = true;
                self.abandoned = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn requestor(&self) -> u32 {
        self.requestor.id()
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}
