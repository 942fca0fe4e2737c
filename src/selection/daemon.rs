//! Selection owner: answers conversion requests until ownership is lost.

use std::rc::Rc;

use x11rb::protocol::Event;
use x11rb::protocol::xproto::{SELECTION_NOTIFY_EVENT, SelectionNotifyEvent, SelectionRequestEvent};
use x11rb::{CURRENT_TIME, NONE};

use super::registry::Registry;
use super::request::SelectionRequest;
use super::transfer::{IncrTransfer, Transfer};
use super::{SelectionAtoms, codec};
use crate::content::ClipboardContent;
use crate::x11::{Atom, Connection, Format, Property, Window, WindowCache, X11Error};

/// Owns a selection on behalf of `content` and serves it.
///
/// Construction asserts ownership; [`run`](Self::run) answers requests
/// until another client takes the selection and every INCR transfer
/// has drained.
pub struct SelectionDaemon<'c, 'a> {
    conn: &'c Connection,
    atoms: SelectionAtoms,
    selection: Atom,
    content: &'a ClipboardContent,
    window: Window<'c>,
    windows: WindowCache<'c>,
    acquired_at: u32,
    owner: bool,
    transfers: Vec<Box<dyn Transfer + 'c>>,
}

impl<'c, 'a> SelectionDaemon<'c, 'a> {
    /// Take ownership of `selection` and verify the server agrees.
    pub fn new(
        conn: &'c Connection,
        selection: &str,
        content: &'a ClipboardContent,
    ) -> Result<Self, X11Error> {
        let atoms = SelectionAtoms::intern(conn)?;
        let selection = conn.atom(selection)?;
        let window = Window::create(conn)?;
        let acquired_at = window.server_time()?;

        window.own_selection(&selection, acquired_at)?;
        let owner = conn.selection_owner(&selection)?;
        if owner != window.id() {
            return Err(X11Error::OwnershipNotAcquired {
                selection: selection.name().to_owned(),
            });
        }
        tracing::info!(
            selection = %selection,
            window = window.id(),
            time = acquired_at,
            content = %content.kind(),
            "acquired selection"
        );

        Ok(Self {
            conn,
            atoms,
            selection,
            content,
            window,
            windows: WindowCache::new(conn),
            acquired_at,
            owner: true,
            transfers: Vec::new(),
        })
    }

    pub fn window_id(&self) -> u32 {
        self.window.id()
    }

    /// Server time at which ownership was asserted.
    pub fn acquired_at(&self) -> u32 {
        self.acquired_at
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn transfers_in_flight(&self) -> usize {
        self.transfers.len()
    }

    /// Serve requests until ownership is lost and transfers have drained.
    ///
    /// While we own the selection this blocks on the next event. Once it
    /// is lost, events are polled with a ceiling; if none arrives in
    /// time, remaining transfers are abandoned.
    pub fn run(&mut self) -> Result<(), X11Error> {
        while self.is_owner() || self.transfers_in_flight() > 0 {
            let event = if self.is_owner() {
                Some(self.conn.next_event()?)
            } else {
                self.conn.poll_event_within(self.conn.timeout())?
            };
            let Some(event) = event else {
                tracing::warn!(
                    transfers = self.transfers_in_flight(),
                    after = ?self.conn.timeout(),
                    "requestors went quiet, abandoning transfers"
                );
                self.transfers.clear();
                break;
            };
            self.handle_event(&event);
        }
        tracing::info!(selection = %self.selection, "selection daemon exiting");
        Ok(())
    }

    /// Process one event: ownership changes, requests, transfer progress.
    pub fn handle_event(&mut self, event: &Event) {
        match event {
            Event::SelectionClear(e)
                if e.owner == self.window.id() && self.selection == e.selection =>
            {
                tracing::info!(selection = %self.selection, "lost selection ownership");
                self.owner = false;
            }
            Event::SelectionRequest(e) => self.handle_request(e),
            _ => {}
        }

        let windows = &mut self.windows;
        self.transfers.retain_mut(|transfer| {
            if let Err(e) = transfer.handle(event) {
                tracing::warn!(requestor = transfer.requestor(), error = %e, "dropping transfer");
                windows.forget(transfer.requestor());
                return false;
            }
            if transfer.is_abandoned() {
                windows.forget(transfer.requestor());
            }
            !transfer.is_done()
        });
    }

    /// Answer one SelectionRequest. Illegitimate requests get a refusal
    /// notify. A request with no requestor window gets no notify at all,
    /// since there is no window to send it to.
    fn handle_request(&mut self, event: &SelectionRequestEvent) {
        if event.requestor == NONE {
            tracing::warn!(requested = event.target, "request without requestor, nowhere to reply");
            return;
        }
        if !self.is_legitimate(event) {
            tracing::debug!(
                requestor = event.requestor,
                owner = event.owner,
                selection = event.selection,
                time = event.time,
                "refusing illegitimate request"
            );
            self.notify(refusal(event));
            return;
        }

        let request = match SelectionRequest::new(*event, &mut self.windows) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(requestor = event.requestor, error = %e, "unreadable request");
                self.notify(refusal(event));
                return;
            }
        };
        let accepted = self.dispatch(&request).unwrap_or_else(|e| {
            tracing::warn!(requested = %request.target(), error = %e, "request failed");
            false
        });
        tracing::debug!(
            requestor = event.requestor,
            requested = %request.target(),
            property = %request.property(),
            accepted,
            "answered request"
        );
        self.notify(request.reply(accepted.then(|| request.property())));
    }

    fn is_legitimate(&self, event: &SelectionRequestEvent) -> bool {
        event.owner == self.window.id()
            && self.selection == event.selection
            && (event.time == CURRENT_TIME || event.time >= self.acquired_at)
    }

    fn notify(&self, reply: SelectionNotifyEvent) {
        if let Err(e) = self.conn.send_selection_notify(reply) {
            tracing::warn!(requestor = reply.requestor, error = %e, "failed to notify requestor");
        }
    }

    /// Serve one request or sub-request. `Ok(false)` refuses it.
    fn dispatch(&mut self, request: &SelectionRequest<'c>) -> Result<bool, X11Error> {
        let target = request.target();
        if *target == self.atoms.targets {
            self.reply_targets(request)
        } else if *target == self.atoms.timestamp {
            let property = Property::u32s(
                request.property().clone(),
                self.atoms.integer.clone(),
                &[self.acquired_at],
            );
            self.write_reply(request, property)?;
            Ok(true)
        } else if *target == self.atoms.multiple {
            if request.is_multiple() {
                return Ok(false);
            }
            self.reply_multiple(request)
        } else {
            self.reply_content(request)
        }
    }

    fn reply_targets(&mut self, request: &SelectionRequest<'c>) -> Result<bool, X11Error> {
        let mut targets = vec![
            self.atoms.targets.clone(),
            self.atoms.multiple.clone(),
            self.atoms.timestamp.clone(),
        ];
        for name in Registry::global().supported_targets(self.content) {
            targets.push(self.conn.atom(&name)?);
        }
        let property = Property::atoms(
            request.property().clone(),
            self.atoms.atom.clone(),
            &targets,
        );
        self.write_reply(request, property)?;
        Ok(true)
    }

    /// Serve each `(target, property)` pair of a MULTIPLE batch and write
    /// the pair list back with refused pairs' properties set to `None`.
    fn reply_multiple(&mut self, request: &SelectionRequest<'c>) -> Result<bool, X11Error> {
        let requestor = Rc::clone(request.requestor());
        let Some(pairs) = requestor.property(request.property())? else {
            tracing::warn!(requestor = requestor.id(), "MULTIPLE without a pair list");
            return Ok(false);
        };
        if pairs.format() != Format::ThirtyTwo {
            return Ok(false);
        }

        let values: Vec<u32> = pairs.iter().collect();
        let mut results = Vec::with_capacity(values.len());
        let mut chunks = values.chunks_exact(2);
        for pair in &mut chunks {
            let (target, property) = (pair[0], pair[1]);
            let served = self.serve_pair(request, target, property);
            results.push(target);
            results.push(if served { property } else { NONE });
        }
        results.extend_from_slice(chunks.remainder());

        requestor.set_property(&Property::u32s(
            request.property().clone(),
            self.atoms.atom_pair.clone(),
            &results,
        ))?;
        Ok(true)
    }

    fn serve_pair(&mut self, batch: &SelectionRequest<'c>, target: u32, property: u32) -> bool {
        if property == NONE {
            return false;
        }
        let conn = self.conn;
        let resolved = conn
            .atom_by_value(target)
            .and_then(|t| Ok((t, conn.atom_by_value(property)?)));
        let (target, property) = match resolved {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(requested = target, property, error = %e, "unresolvable MULTIPLE pair");
                return false;
            }
        };
        let request = batch.with_pair(target, property);
        match self.dispatch(&request) {
            Ok(served) => served,
            Err(e) => {
                tracing::warn!(requested = %request.target(), error = %e, "MULTIPLE pair failed");
                false
            }
        }
    }

    fn reply_content(&mut self, request: &SelectionRequest<'c>) -> Result<bool, X11Error> {
        let registry = Registry::global();
        let Some(mut ty) = registry.lookup(request.target().name()) else {
            return Ok(false);
        };
        let mut type_ = request.target().clone();
        if ty.is_alias() {
            let Some(best) = registry.resolve_alias(&ty, self.content) else {
                return Ok(false);
            };
            type_ = self.conn.atom(best.name())?;
            ty = best;
        }
        let Some(body) = codec::encode(&ty, self.content) else {
            return Ok(false);
        };
        self.write_reply(request, Property::bytes(request.property().clone(), type_, body))?;
        Ok(true)
    }

    /// Write a reply property directly, or start an INCR transfer if it
    /// exceeds half the maximum request size.
    fn write_reply(
        &mut self,
        request: &SelectionRequest<'c>,
        property: Property,
    ) -> Result<(), X11Error> {
        if property.size() > self.conn.max_request_bytes() / 2 {
            let transfer =
                IncrTransfer::start(Rc::clone(request.requestor()), property, &self.atoms.incr)?;
            self.transfers.push(Box::new(transfer));
            return Ok(());
        }
        request.requestor().set_property(&property)
    }
}

fn refusal(event: &SelectionRequestEvent) -> SelectionNotifyEvent {
    SelectionNotifyEvent {
        response_type: SELECTION_NOTIFY_EVENT,
        sequence: 0,
        time: event.time,
        requestor: event.requestor,
        selection: event.selection,
        target: event.target,
        property: NONE,
    }
}
