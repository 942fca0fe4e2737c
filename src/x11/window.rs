//! Windows: our own scratch windows and other clients' requestor windows.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use x11rb::protocol::Event;
use x11rb::protocol::xproto::EventMask;
use x11rb::{CURRENT_TIME, NONE};

use super::{Atom, Connection, Format, Property, X11Error};

/// Property used to obtain a server timestamp on our own windows.
const TIMESTAMP_PROPERTY: &str = "CLIPSEL_TIMESTAMP";

/// A window bound to a [`Connection`].
///
/// Windows we create are destroyed on drop. Foreign windows (another
/// client's requestor) are only tracked, never destroyed.
#[derive(Debug)]
pub struct Window<'c> {
    conn: &'c Connection,
    id: u32,
    owned: bool,
}

impl<'c> Window<'c> {
    /// Create a window of our own, listening for property changes.
    pub fn create(conn: &'c Connection) -> Result<Self, X11Error> {
        let id = conn.call("create_window", |b| {
            b.create_window(EventMask::PROPERTY_CHANGE)
        })?;
        tracing::debug!(window = id, "created window");
        Ok(Self {
            conn,
            id,
            owned: true,
        })
    }

    /// Track a window owned by another client.
    pub fn foreign(conn: &'c Connection, id: u32) -> Result<Self, X11Error> {
        if id == NONE {
            return Err(X11Error::NullResource("window"));
        }
        Ok(Self {
            conn,
            id,
            owned: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn select_input(&self, events: EventMask) -> Result<(), X11Error> {
        self.conn
            .call("change_window_attributes", |b| b.select_input(self.id, events))
    }

    /// Read a property without deleting it. `None` if it does not exist.
    pub fn property(&self, name: &Atom) -> Result<Option<Property>, X11Error> {
        self.read_property(name, false)
    }

    /// Read and delete a property in one request.
    pub fn take_property(&self, name: &Atom) -> Result<Option<Property>, X11Error> {
        self.read_property(name, true)
    }

    fn read_property(&self, name: &Atom, delete: bool) -> Result<Option<Property>, X11Error> {
        let reply = self.conn.call("get_property", |b| {
            b.get_property(self.id, name.value(), delete)
        })?;
        if reply.bytes_after != 0 {
            return Err(X11Error::Truncated {
                bytes_after: reply.bytes_after,
            });
        }
        if reply.type_ == NONE {
            return Ok(None);
        }
        let type_ = self.conn.atom_by_value(reply.type_)?;
        let format = Format::from_bits(reply.format)?;
        Property::new(name.clone(), type_, format, reply.value).map(Some)
    }

    pub fn set_property(&self, property: &Property) -> Result<(), X11Error> {
        self.conn.call("change_property", |b| {
            b.change_property(
                self.id,
                property.name().value(),
                property.type_().value(),
                property.format().bits(),
                property.data(),
            )
        })
    }

    pub fn delete_property(&self, name: &Atom) -> Result<(), X11Error> {
        self.conn
            .call("delete_property", |b| b.delete_property(self.id, name.value()))
    }

    /// Assert ownership of `selection` from this window at `time`.
    pub fn own_selection(&self, selection: &Atom, time: u32) -> Result<(), X11Error> {
        self.conn.call("set_selection_owner", |b| {
            b.set_selection_owner(self.id, selection.value(), time)?;
            b.flush()
        })
    }

    /// Current server time, read from the PropertyNotify generated by a
    /// zero-length append to a property on this window.
    pub fn server_time(&self) -> Result<u32, X11Error> {
        let property = self.conn.atom(TIMESTAMP_PROPERTY)?;
        let type_ = self.conn.atom("INTEGER")?;
        self.conn.call("change_property", |b| {
            b.touch_property(self.id, property.value(), type_.value())?;
            b.flush()
        })?;

        let id = self.id;
        self.wait_for_event("server timestamp", &mut |e| match e {
            Event::PropertyNotify(p) if p.window == id && property == p.atom => Some(p.time),
            _ => None,
        })
    }

    /// Ask the owner of `selection` to convert it to `target` into
    /// `property` on this window, and read the result.
    ///
    /// Returns `None` if the owner refused.
    pub fn convert_selection(
        &self,
        selection: &Atom,
        target: &Atom,
        property: &Atom,
    ) -> Result<Option<Property>, X11Error> {
        self.delete_property(property)?;
        self.conn.call("convert_selection", |b| {
            b.convert_selection(
                self.id,
                selection.value(),
                target.value(),
                property.value(),
                CURRENT_TIME,
            )?;
            b.flush()
        })?;

        let id = self.id;
        let notify = self.wait_for_event("SelectionNotify", &mut |e| match e {
            Event::SelectionNotify(n)
                if n.requestor == id && *selection == n.selection && *target == n.target =>
            {
                Some(*n)
            }
            _ => None,
        })?;

        if notify.property == NONE {
            tracing::debug!(requested = %target, "conversion refused");
            return Ok(None);
        }
        let reply_property = self.conn.atom_by_value(notify.property)?;
        self.take_property(&reply_property)
    }

    /// Block until `select` accepts an event, failing after the
    /// connection's timeout.
    pub fn wait_for_event<T>(
        &self,
        waiting_for: &'static str,
        select: &mut dyn FnMut(&Event) -> Option<T>,
    ) -> Result<T, X11Error> {
        self.conn
            .wait_for_event(waiting_for, self.conn.timeout(), select)
    }
}

impl Drop for Window<'_> {
    fn drop(&mut self) {
        if !self.is_owned() {
            return;
        }
        let id = self.id;
        if let Err(e) = self.conn.call("destroy_window", |b| {
            b.destroy_window(id)?;
            b.flush()
        }) {
            tracing::debug!(window = id, error = %e, "failed to destroy window");
        }
    }
}

/// Shared handles to foreign windows, keyed by window id.
///
/// Holds only weak references: a requestor window lives as long as some
/// request or transfer still refers to it. Entries whose handle has gone
/// are replaced on the next lookup.
#[derive(Debug)]
pub struct WindowCache<'c> {
    conn: &'c Connection,
    windows: HashMap<u32, Weak<Window<'c>>>,
}

impl<'c> WindowCache<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            windows: HashMap::new(),
        }
    }

    /// The shared handle for window `id`, creating one if none is live.
    pub fn get(&mut self, id: u32) -> Result<Rc<Window<'c>>, X11Error> {
        if let Some(window) = self.windows.get(&id).and_then(Weak::upgrade) {
            return Ok(window);
        }
        self.windows.retain(|_, w| w.strong_count() > 0);

        let window = Rc::new(Window::foreign(self.conn, id)?);
        self.windows.insert(id, Rc::downgrade(&window));
        Ok(window)
    }

    /// Drop the entry for a window that no longer exists.
    pub fn forget(&mut self, id: u32) {
        self.windows.remove(&id);
    }
}
