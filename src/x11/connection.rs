//! The single display connection: call funnel, atom cache, event queue.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use x11rb::NONE;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::SelectionNotifyEvent;

use super::backend::{Backend, BackendError, X11Backend};
use super::wait::{Backoff, MAX_DELAY};
use super::{Atom, X11Error};

/// One display connection, used from one logical flow at a time.
///
/// Every protocol call goes through [`Connection::call`], which refuses
/// nested calls and tags failures with the name of the call that
/// produced them. Atoms are cached in both directions. Events read while
/// waiting for something specific are queued and handed out later in
/// arrival order.
pub struct Connection {
    backend: Box<dyn Backend>,
    in_flight: Cell<Option<&'static str>>,
    by_name: RefCell<HashMap<String, Atom>>,
    by_value: RefCell<HashMap<u32, Atom>>,
    pending: RefCell<VecDeque<Event>>,
    timeout: Duration,
}

impl Connection {
    /// Connect to `$DISPLAY`. `timeout` bounds every synchronous wait.
    pub fn open(timeout: Duration) -> Result<Self, X11Error> {
        Ok(Self::new(Box::new(X11Backend::connect()?), timeout))
    }

    pub fn new(backend: Box<dyn Backend>, timeout: Duration) -> Self {
        Self {
            backend,
            in_flight: Cell::new(None),
            by_name: RefCell::new(HashMap::new()),
            by_value: RefCell::new(HashMap::new()),
            pending: RefCell::new(VecDeque::new()),
            timeout,
        }
    }

    /// Ceiling for synchronous protocol waits on this connection.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one backend call.
    ///
    /// Fails with [`X11Error::Reentrant`] if another call is in flight.
    pub(crate) fn call<T>(
        &self,
        name: &'static str,
        f: impl FnOnce(&dyn Backend) -> Result<T, BackendError>,
    ) -> Result<T, X11Error> {
        if let Some(in_flight) = self.in_flight.get() {
            return Err(X11Error::Reentrant {
                in_flight,
                attempted: name,
            });
        }
        self.in_flight.set(Some(name));
        let result = f(self.backend.as_ref());
        self.in_flight.set(None);
        result.map_err(|source| X11Error::Protocol { call: name, source })
    }

    pub fn max_request_bytes(&self) -> usize {
        self.backend.max_request_bytes()
    }

    /// Intern `name`, or return the cached atom.
    pub fn atom(&self, name: &str) -> Result<Atom, X11Error> {
        if let Some(atom) = self.by_name.borrow().get(name) {
            return Ok(atom.clone());
        }
        let value = self.call("intern_atom", |b| b.intern_atom(name))?;
        let atom = Atom::new(value, name);
        self.remember(&atom);
        Ok(atom)
    }

    /// Resolve an atom value to its name, or return the cached atom.
    pub fn atom_by_value(&self, value: u32) -> Result<Atom, X11Error> {
        if value == NONE {
            return Ok(Atom::none());
        }
        if let Some(atom) = self.by_value.borrow().get(&value) {
            return Ok(atom.clone());
        }
        let name = self.call("get_atom_name", |b| b.atom_name(value))?;
        let atom = Atom::new(value, name);
        self.remember(&atom);
        Ok(atom)
    }

    fn remember(&self, atom: &Atom) {
        self.by_name
            .borrow_mut()
            .insert(atom.name().to_owned(), atom.clone());
        self.by_value
            .borrow_mut()
            .insert(atom.value(), atom.clone());
    }

    /// Window currently owning `selection`, `NONE` if unowned.
    pub fn selection_owner(&self, selection: &Atom) -> Result<u32, X11Error> {
        self.call("get_selection_owner", |b| {
            b.selection_owner(selection.value())
        })
    }

    pub fn send_selection_notify(&self, event: SelectionNotifyEvent) -> Result<(), X11Error> {
        self.call("send_event", |b| {
            b.send_selection_notify(event)?;
            b.flush()
        })
    }

    #[cfg(test)]
    pub fn flush(&self) -> Result<(), X11Error> {
        self.call("flush", |b| b.flush())
    }

    /// Next event, blocking until one arrives.
    pub fn next_event(&self) -> Result<Event, X11Error> {
        loop {
            if let Some(event) = self.pending.borrow_mut().pop_front() {
                return Ok(event);
            }
            if let Some(event) = self.call("poll_for_event", |b| b.poll_for_event())? {
                return Ok(event);
            }
            self.call("wait_readable", |b| b.wait_readable(None))?;
        }
    }

    /// Next event, polling with backoff for at most `ceiling`.
    pub fn poll_event_within(&self, ceiling: Duration) -> Result<Option<Event>, X11Error> {
        self.poll_until(ceiling, &mut |e| Some(e.clone()))
    }

    /// Remove and return the first queued or readable event for which
    /// `select` yields a value, without blocking. Other events stay queued.
    pub fn check_event<T>(
        &self,
        select: &mut dyn FnMut(&Event) -> Option<T>,
    ) -> Result<Option<T>, X11Error> {
        {
            let mut pending = self.pending.borrow_mut();
            let found = pending
                .iter()
                .enumerate()
                .find_map(|(index, e)| select(e).map(|value| (index, value)));
            if let Some((index, value)) = found {
                pending.remove(index);
                return Ok(Some(value));
            }
        }
        while let Some(event) = self.call("poll_for_event", |b| b.poll_for_event())? {
            if let Some(value) = select(&event) {
                return Ok(Some(value));
            }
            self.pending.borrow_mut().push_back(event);
        }
        Ok(None)
    }

    /// Wait for an event `select` accepts, failing with
    /// [`X11Error::Timeout`] after `timeout`.
    pub fn wait_for_event<T>(
        &self,
        waiting_for: &'static str,
        timeout: Duration,
        select: &mut dyn FnMut(&Event) -> Option<T>,
    ) -> Result<T, X11Error> {
        self.poll_until(timeout, select)?.ok_or(X11Error::Timeout {
            waiting_for,
            after: timeout,
        })
    }

    fn poll_until<T>(
        &self,
        timeout: Duration,
        select: &mut dyn FnMut(&Event) -> Option<T>,
    ) -> Result<Option<T>, X11Error> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.check_event(select)? {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let pause = backoff.next().unwrap_or(MAX_DELAY).min(deadline - now);
            self.call("wait_readable", |b| b.wait_readable(Some(pause)))?;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("in_flight", &self.in_flight.get())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
