//! Raw display primitives and the x11rb implementation of them.
//!
//! [`Backend`] is the seam between the protocol engine and the wire.
//! Every method maps to one X request (or one local operation on the
//! connection) and reports failures synchronously: void requests are
//! `check()`ed so an error is attributed to the call that caused it
//! rather than surfacing later in the event stream.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::connection::Connection as _;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, CreateWindowAux, EventMask, PropMode,
    SelectionNotifyEvent, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::{COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT};

use super::X11Error;

/// Failures reported by a [`Backend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    ReplyOrId(#[from] ReplyOrIdError),
    #[error("poll: {0}")]
    Poll(#[from] nix::Error),
    #[error("{0}")]
    Display(String),
}

/// A property value exactly as the display returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyReply {
    /// Type atom; `NONE` when the property does not exist.
    pub type_: u32,
    /// Element width in bits (0 when the property does not exist).
    pub format: u8,
    pub value: Vec<u8>,
    pub bytes_after: u32,
}

/// Raw display primitives funneled through [`super::Connection`].
pub trait Backend {
    /// Largest single request the server accepts, in bytes.
    fn max_request_bytes(&self) -> usize;

    fn intern_atom(&self, name: &str) -> Result<u32, BackendError>;

    fn atom_name(&self, atom: u32) -> Result<String, BackendError>;

    /// Create a 1x1 input window under the root with the given event mask.
    fn create_window(&self, events: EventMask) -> Result<u32, BackendError>;

    fn destroy_window(&self, window: u32) -> Result<(), BackendError>;

    fn select_input(&self, window: u32, events: EventMask) -> Result<(), BackendError>;

    /// Read a whole property, optionally deleting it in the same request.
    fn get_property(
        &self,
        window: u32,
        property: u32,
        delete: bool,
    ) -> Result<PropertyReply, BackendError>;

    /// Replace a property. `data.len()` is a multiple of the element size.
    fn change_property(
        &self,
        window: u32,
        property: u32,
        type_: u32,
        format: u8,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Append zero bytes to a property; used to obtain a server timestamp.
    fn touch_property(&self, window: u32, property: u32, type_: u32) -> Result<(), BackendError>;

    fn delete_property(&self, window: u32, property: u32) -> Result<(), BackendError>;

    fn convert_selection(
        &self,
        requestor: u32,
        selection: u32,
        target: u32,
        property: u32,
        time: u32,
    ) -> Result<(), BackendError>;

    fn set_selection_owner(&self, owner: u32, selection: u32, time: u32)
    -> Result<(), BackendError>;

    fn selection_owner(&self, selection: u32) -> Result<u32, BackendError>;

    /// Deliver a SelectionNotify to `event.requestor`.
    fn send_selection_notify(&self, event: SelectionNotifyEvent) -> Result<(), BackendError>;

    fn poll_for_event(&self) -> Result<Option<Event>, BackendError>;

    /// Block until the connection is readable or `timeout` elapses
    /// (`None` waits indefinitely). Returns whether it became readable.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, BackendError>;

    fn flush(&self) -> Result<(), BackendError>;
}

/// Set while an [`X11Backend`] is alive.
static DISPLAY_OPEN: AtomicBool = AtomicBool::new(false);

/// Proof that this process holds its single display connection.
///
/// Released on drop, so a later `connect()` succeeds once the previous
/// backend is gone.
#[derive(Debug)]
pub struct DisplayClaim {
    flag: &'static AtomicBool,
}

impl DisplayClaim {
    pub fn acquire() -> Result<Self, X11Error> {
        Self::acquire_on(&DISPLAY_OPEN)
    }

    fn acquire_on(flag: &'static AtomicBool) -> Result<Self, X11Error> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| X11Error::AlreadyOpen)?;
        Ok(Self { flag })
    }
}

impl Drop for DisplayClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// [`Backend`] over a live X server connection.
pub struct X11Backend {
    conn: RustConnection,
    root: u32,
    _claim: DisplayClaim,
}

impl X11Backend {
    /// Connect to `$DISPLAY`.
    ///
    /// Fails with [`X11Error::AlreadyOpen`] if another backend is alive.
    pub fn connect() -> Result<Self, X11Error> {
        let claim = DisplayClaim::acquire()?;

        let protocol = |source: BackendError| X11Error::Protocol {
            call: "connect",
            source,
        };
        let (conn, screen_num) =
            RustConnection::connect(None).map_err(|e| protocol(BackendError::from(e)))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| protocol(BackendError::Display(format!("no screen {screen_num}"))))?;

        tracing::debug!(screen = screen_num, root, "connected to X11 display");

        Ok(Self {
            conn,
            root,
            _claim: claim,
        })
    }
}

impl Backend for X11Backend {
    fn max_request_bytes(&self) -> usize {
        // Core limit in 4-byte units; BIG-REQUESTS is not consulted.
        usize::from(self.conn.setup().maximum_request_length) * 4
    }

    fn intern_atom(&self, name: &str) -> Result<u32, BackendError> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn atom_name(&self, atom: u32) -> Result<String, BackendError> {
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    fn create_window(&self, events: EventMask) -> Result<u32, BackendError> {
        let id = self.conn.generate_id()?;
        self.conn
            .create_window(
                COPY_DEPTH_FROM_PARENT,
                id,
                self.root,
                0,
                0,
                1,
                1,
                0,
                WindowClass::INPUT_OUTPUT,
                COPY_FROM_PARENT,
                &CreateWindowAux::new().event_mask(events),
            )?
            .check()?;
        Ok(id)
    }

    fn destroy_window(&self, window: u32) -> Result<(), BackendError> {
        self.conn.destroy_window(window)?.check()?;
        Ok(())
    }

    fn select_input(&self, window: u32, events: EventMask) -> Result<(), BackendError> {
        self.conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(events))?
            .check()?;
        Ok(())
    }

    fn get_property(
        &self,
        window: u32,
        property: u32,
        delete: bool,
    ) -> Result<PropertyReply, BackendError> {
        let reply = self
            .conn
            .get_property(delete, window, property, AtomEnum::ANY, 0, u32::MAX / 4)?
            .reply()?;
        Ok(PropertyReply {
            type_: reply.type_,
            format: reply.format,
            value: reply.value,
            bytes_after: reply.bytes_after,
        })
    }

    fn change_property(
        &self,
        window: u32,
        property: u32,
        type_: u32,
        format: u8,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let element_size = usize::from(format / 8).max(1);
        let data_len = u32::try_from(data.len() / element_size)
            .map_err(|_| BackendError::Display(format!("{} bytes exceed a property", data.len())))?;
        self.conn
            .change_property(
                PropMode::REPLACE,
                window,
                property,
                type_,
                format,
                data_len,
                data,
            )?
            .check()?;
        Ok(())
    }

    fn touch_property(&self, window: u32, property: u32, type_: u32) -> Result<(), BackendError> {
        self.conn
            .change_property(PropMode::APPEND, window, property, type_, 8, 0, &[])?
            .check()?;
        Ok(())
    }

    fn delete_property(&self, window: u32, property: u32) -> Result<(), BackendError> {
        self.conn.delete_property(window, property)?.check()?;
        Ok(())
    }

    fn convert_selection(
        &self,
        requestor: u32,
        selection: u32,
        target: u32,
        property: u32,
        time: u32,
    ) -> Result<(), BackendError> {
        self.conn
            .convert_selection(requestor, selection, target, property, time)?
            .check()?;
        Ok(())
    }

    fn set_selection_owner(
        &self,
        owner: u32,
        selection: u32,
        time: u32,
    ) -> Result<(), BackendError> {
        self.conn
            .set_selection_owner(owner, selection, time)?
            .check()?;
        Ok(())
    }

    fn selection_owner(&self, selection: u32) -> Result<u32, BackendError> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    fn send_selection_notify(&self, event: SelectionNotifyEvent) -> Result<(), BackendError> {
        self.conn
            .send_event(false, event.requestor, EventMask::NO_EVENT, event)?
            .check()?;
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<Event>, BackendError> {
        Ok(self.conn.poll_for_event()?)
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, BackendError> {
        let raw_fd = self.conn.stream().as_raw_fd();
        // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

        let timeout = match timeout {
            Some(d) => PollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX)),
            None => PollTimeout::NONE,
        };

        match poll(&mut fds, timeout) {
            Ok(n) => Ok(n > 0),
            Err(nix::Error::EINTR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&self) -> Result<(), BackendError> {
        self.conn.flush()?;
        Ok(())
    }
}
