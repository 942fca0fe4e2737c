//! Scripted in-memory display for tests.
//!
//! [`FakeDisplay`] implements [`Backend`] over plain maps: atoms,
//! properties, selection owners and an event queue. It generates the
//! PropertyNotify events a real server would for windows that selected
//! `PROPERTY_CHANGE`, can play a remote selection owner (including INCR
//! delivery), and can play a requestor that consumes every property
//! written to its window. Every backend call is logged as a [`Call`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    EventMask, PROPERTY_NOTIFY_EVENT, Property as PropertyState, PropertyNotifyEvent,
    SELECTION_CLEAR_EVENT, SELECTION_NOTIFY_EVENT, SELECTION_REQUEST_EVENT, SelectionClearEvent,
    SelectionNotifyEvent, SelectionRequestEvent,
};
use x11rb::NONE;

use crate::x11::backend::{Backend, BackendError, PropertyReply};
use crate::x11::Connection;

pub const FIRST_WINDOW: u32 = 0x20_0000;
const SQUATTER: u32 = 0xdead;

/// One logged backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InternAtom { name: String },
    AtomName { atom: u32 },
    CreateWindow { window: u32 },
    DestroyWindow { window: u32 },
    SelectInput { window: u32, events: u32 },
    GetProperty { window: u32, property: u32, delete: bool },
    ChangeProperty { window: u32, property: u32, type_: u32, format: u8, data: Vec<u8> },
    TouchProperty { window: u32, property: u32 },
    DeleteProperty { window: u32, property: u32 },
    ConvertSelection { requestor: u32, selection: u32, target: u32, property: u32 },
    SetSelectionOwner { owner: u32, selection: u32, time: u32 },
    SelectionOwner { selection: u32 },
    SendSelectionNotify { requestor: u32, selection: u32, target: u32, property: u32, time: u32 },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::InternAtom { .. } => "intern_atom",
            Call::AtomName { .. } => "atom_name",
            Call::CreateWindow { .. } => "create_window",
            Call::DestroyWindow { .. } => "destroy_window",
            Call::SelectInput { .. } => "select_input",
            Call::GetProperty { .. } => "get_property",
            Call::ChangeProperty { .. } => "change_property",
            Call::TouchProperty { .. } => "touch_property",
            Call::DeleteProperty { .. } => "delete_property",
            Call::ConvertSelection { .. } => "convert_selection",
            Call::SetSelectionOwner { .. } => "set_selection_owner",
            Call::SelectionOwner { .. } => "selection_owner",
            Call::SendSelectionNotify { .. } => "send_selection_notify",
        }
    }
}

/// Another client owning a selection.
#[derive(Debug, Clone)]
pub struct RemoteOwner {
    window: u32,
    targets: Vec<(String, Vec<u8>)>,
    incr_chunk: Option<usize>,
}

impl RemoteOwner {
    pub fn new() -> Self {
        Self {
            window: 0x500,
            targets: Vec::new(),
            incr_chunk: None,
        }
    }

    /// Offer `data` for `target`; the reply type is the target itself.
    pub fn with_target(mut self, target: &str, data: &[u8]) -> Self {
        self.targets.push((target.to_owned(), data.to_vec()));
        self
    }

    /// Deliver replies longer than `chunk` bytes via INCR.
    pub fn with_incr(mut self, chunk: usize) -> Self {
        self.incr_chunk = Some(chunk);
        self
    }
}

#[derive(Debug)]
struct RemoteIncr {
    window: u32,
    property: u32,
    type_: u32,
    data: Vec<u8>,
    offset: usize,
    chunk: usize,
}

#[derive(Debug)]
struct FakeState {
    atoms: Vec<String>,
    next_window: u32,
    masks: HashMap<u32, u32>,
    properties: HashMap<(u32, u32), PropertyReply>,
    owners: HashMap<u32, u32>,
    events: VecDeque<Event>,
    time: u32,
    calls: Vec<Call>,
    remotes: HashMap<u32, RemoteOwner>,
    incr: Option<RemoteIncr>,
    consumers: HashSet<u32>,
    max_request_bytes: usize,
    steal_selection: bool,
}

impl FakeState {
    fn intern(&mut self, name: &str) -> u32 {
        match self.atoms.iter().position(|a| a == name) {
            Some(index) => index as u32 + 1,
            None => {
                self.atoms.push(name.to_owned());
                self.atoms.len() as u32
            }
        }
    }

    fn atom_name(&self, atom: u32) -> Option<&str> {
        let index = usize::try_from(atom).ok()?.checked_sub(1)?;
        self.atoms.get(index).map(String::as_str)
    }

    fn tick(&mut self) -> u32 {
        let now = self.time;
        self.time += 1;
        now
    }

    fn notify_property(&mut self, window: u32, atom: u32, state: PropertyState) {
        let listening = self
            .masks
            .get(&window)
            .is_some_and(|mask| mask & u32::from(EventMask::PROPERTY_CHANGE) != 0);
        if !listening {
            return;
        }
        let time = self.tick();
        self.events
            .push_back(Event::PropertyNotify(PropertyNotifyEvent {
                response_type: PROPERTY_NOTIFY_EVENT,
                sequence: 0,
                window,
                atom,
                time,
                state,
            }));
    }

    fn store(&mut self, window: u32, property: u32, reply: PropertyReply) {
        self.properties.insert((window, property), reply);
        self.notify_property(window, property, PropertyState::NEW_VALUE);
        if self.consumers.contains(&window) {
            self.remove(window, property);
        }
    }

    fn remove(&mut self, window: u32, property: u32) {
        if self.properties.remove(&(window, property)).is_none() {
            return;
        }
        self.notify_property(window, property, PropertyState::DELETE);
        let advancing = self
            .incr
            .as_ref()
            .is_some_and(|incr| incr.window == window && incr.property == property);
        if advancing {
            self.advance_incr();
        }
    }

    fn advance_incr(&mut self) {
        let Some(incr) = self.incr.as_mut() else {
            return;
        };
        let end = (incr.offset + incr.chunk).min(incr.data.len());
        let chunk = incr.data[incr.offset..end].to_vec();
        incr.offset = end;
        let (window, property, type_) = (incr.window, incr.property, incr.type_);
        if chunk.is_empty() {
            self.incr = None;
        }
        self.store(
            window,
            property,
            PropertyReply {
                type_,
                format: 8,
                value: chunk,
                bytes_after: 0,
            },
        );
    }

    fn notify_requestor(&mut self, requestor: u32, selection: u32, target: u32, property: u32) {
        let time = self.tick();
        self.events
            .push_back(Event::SelectionNotify(SelectionNotifyEvent {
                response_type: SELECTION_NOTIFY_EVENT,
                sequence: 0,
                time,
                requestor,
                selection,
                target,
                property,
            }));
    }

    fn convert(&mut self, requestor: u32, selection: u32, target: u32, property: u32) {
        let remote = self
            .remotes
            .get(&selection)
            .filter(|remote| self.owners.get(&selection) == Some(&remote.window))
            .cloned();
        let Some(remote) = remote else {
            return self.notify_requestor(requestor, selection, target, NONE);
        };
        let target_name = self.atom_name(target).unwrap_or_default().to_owned();

        if target_name == "TARGETS" {
            let atom_type = self.intern("ATOM");
            let mut values = vec![self.intern("TARGETS")];
            for (name, _) in &remote.targets {
                values.push(self.intern(name));
            }
            let value = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
            self.store(
                requestor,
                property,
                PropertyReply {
                    type_: atom_type,
                    format: 32,
                    value,
                    bytes_after: 0,
                },
            );
            return self.notify_requestor(requestor, selection, target, property);
        }

        let Some((_, data)) = remote.targets.iter().find(|(name, _)| name == &target_name) else {
            return self.notify_requestor(requestor, selection, target, NONE);
        };

        match remote.incr_chunk {
            Some(chunk) if data.len() > chunk => {
                let incr_type = self.intern("INCR");
                self.store(
                    requestor,
                    property,
                    PropertyReply {
                        type_: incr_type,
                        format: 32,
                        value: (data.len() as u32).to_ne_bytes().to_vec(),
                        bytes_after: 0,
                    },
                );
                self.incr = Some(RemoteIncr {
                    window: requestor,
                    property,
                    type_: target,
                    data: data.clone(),
                    offset: 0,
                    chunk,
                });
            }
            _ => self.store(
                requestor,
                property,
                PropertyReply {
                    type_: target,
                    format: 8,
                    value: data.clone(),
                    bytes_after: 0,
                },
            ),
        }
        self.notify_requestor(requestor, selection, target, property);
    }
}

/// Handle to a scripted display; clones share state.
#[derive(Debug, Clone)]
pub struct FakeDisplay {
    state: Rc<RefCell<FakeState>>,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState {
                atoms: Vec::new(),
                next_window: FIRST_WINDOW,
                masks: HashMap::new(),
                properties: HashMap::new(),
                owners: HashMap::new(),
                events: VecDeque::new(),
                time: 1000,
                calls: Vec::new(),
                remotes: HashMap::new(),
                incr: None,
                consumers: HashSet::new(),
                max_request_bytes: 262_140,
                steal_selection: false,
            })),
        }
    }

    /// A connection over this display with a short wait ceiling.
    pub fn connection(&self) -> Connection {
        self.connection_with_timeout(Duration::from_millis(200))
    }

    pub fn connection_with_timeout(&self, timeout: Duration) -> Connection {
        Connection::new(
            Box::new(FakeBackend {
                state: Rc::clone(&self.state),
            }),
            timeout,
        )
    }

    /// Intern without logging a call.
    pub fn intern(&self, name: &str) -> u32 {
        self.state.borrow_mut().intern(name)
    }

    pub fn push_event(&self, event: Event) {
        self.state.borrow_mut().events.push_back(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    /// Every property write to `window`, in order, as `(property, type, format, data)`.
    pub fn writes_to(&self, window: u32) -> Vec<(u32, u32, u8, Vec<u8>)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::ChangeProperty {
                    window: w,
                    property,
                    type_,
                    format,
                    data,
                } if *w == window => Some((*property, *type_, *format, data.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every SelectionNotify sent, as `(requestor, target, property)`.
    pub fn notifies(&self) -> Vec<(u32, u32, u32)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SendSelectionNotify {
                    requestor,
                    target,
                    property,
                    ..
                } => Some((*requestor, *target, *property)),
                _ => None,
            })
            .collect()
    }

    pub fn set_raw_property(&self, window: u32, property: u32, reply: PropertyReply) {
        self.state
            .borrow_mut()
            .properties
            .insert((window, property), reply);
    }

    pub fn property(&self, window: u32, property: u32) -> Option<PropertyReply> {
        self.state
            .borrow()
            .properties
            .get(&(window, property))
            .cloned()
    }

    /// Server time handed out with the next generated event.
    pub fn set_time(&self, time: u32) {
        self.state.borrow_mut().time = time;
    }

    pub fn owner(&self, selection: &str) -> u32 {
        let mut state = self.state.borrow_mut();
        let selection = state.intern(selection);
        state.owners.get(&selection).copied().unwrap_or(NONE)
    }

    pub fn set_remote_owner(&self, selection: &str, remote: RemoteOwner) {
        let mut state = self.state.borrow_mut();
        let selection = state.intern(selection);
        state.owners.insert(selection, remote.window);
        state.remotes.insert(selection, remote);
    }

    /// Play a requestor that deletes every property written to `window`.
    pub fn consume_writes_to(&self, window: u32) {
        self.state.borrow_mut().consumers.insert(window);
    }

    /// Make `SetSelectionOwner` silently lose to another client.
    pub fn steal_selection(&self) {
        self.state.borrow_mut().steal_selection = true;
    }

    pub fn set_max_request_bytes(&self, bytes: usize) {
        self.state.borrow_mut().max_request_bytes = bytes;
    }
}

struct FakeBackend {
    state: Rc<RefCell<FakeState>>,
}

impl FakeBackend {
    fn log(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Backend for FakeBackend {
    fn max_request_bytes(&self) -> usize {
        self.state.borrow().max_request_bytes
    }

    fn intern_atom(&self, name: &str) -> Result<u32, BackendError> {
        self.log(Call::InternAtom {
            name: name.to_owned(),
        });
        Ok(self.state.borrow_mut().intern(name))
    }

    fn atom_name(&self, atom: u32) -> Result<String, BackendError> {
        self.log(Call::AtomName { atom });
        self.state
            .borrow()
            .atom_name(atom)
            .map(str::to_owned)
            .ok_or_else(|| BackendError::Display(format!("BadAtom {atom}")))
    }

    fn create_window(&self, events: EventMask) -> Result<u32, BackendError> {
        let mut state = self.state.borrow_mut();
        let window = state.next_window;
        state.next_window += 1;
        state.masks.insert(window, u32::from(events));
        state.calls.push(Call::CreateWindow { window });
        Ok(window)
    }

    fn destroy_window(&self, window: u32) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.masks.remove(&window);
        state.calls.push(Call::DestroyWindow { window });
        Ok(())
    }

    fn select_input(&self, window: u32, events: EventMask) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.masks.insert(window, u32::from(events));
        state.calls.push(Call::SelectInput {
            window,
            events: u32::from(events),
        });
        Ok(())
    }

    fn get_property(
        &self,
        window: u32,
        property: u32,
        delete: bool,
    ) -> Result<PropertyReply, BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::GetProperty {
            window,
            property,
            delete,
        });
        let reply = state
            .properties
            .get(&(window, property))
            .cloned()
            .unwrap_or_default();
        if delete && reply.type_ != NONE && reply.bytes_after == 0 {
            state.remove(window, property);
        }
        Ok(reply)
    }

    fn change_property(
        &self,
        window: u32,
        property: u32,
        type_: u32,
        format: u8,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::ChangeProperty {
            window,
            property,
            type_,
            format,
            data: data.to_vec(),
        });
        state.store(
            window,
            property,
            PropertyReply {
                type_,
                format,
                value: data.to_vec(),
                bytes_after: 0,
            },
        );
        Ok(())
    }

    fn touch_property(&self, window: u32, property: u32, type_: u32) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::TouchProperty { window, property });
        let existing = state
            .properties
            .get(&(window, property))
            .cloned()
            .unwrap_or(PropertyReply {
                type_,
                format: 8,
                value: Vec::new(),
                bytes_after: 0,
            });
        state.store(window, property, existing);
        Ok(())
    }

    fn delete_property(&self, window: u32, property: u32) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::DeleteProperty { window, property });
        state.remove(window, property);
        Ok(())
    }

    fn convert_selection(
        &self,
        requestor: u32,
        selection: u32,
        target: u32,
        property: u32,
        _time: u32,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::ConvertSelection {
            requestor,
            selection,
            target,
            property,
        });
        state.convert(requestor, selection, target, property);
        Ok(())
    }

    fn set_selection_owner(
        &self,
        owner: u32,
        selection: u32,
        time: u32,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::SetSelectionOwner {
            owner,
            selection,
            time,
        });
        let winner = if state.steal_selection { SQUATTER } else { owner };
        state.owners.insert(selection, winner);
        Ok(())
    }

    fn selection_owner(&self, selection: u32) -> Result<u32, BackendError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::SelectionOwner { selection });
        Ok(state.owners.get(&selection).copied().unwrap_or(NONE))
    }

    fn send_selection_notify(&self, event: SelectionNotifyEvent) -> Result<(), BackendError> {
        self.log(Call::SendSelectionNotify {
            requestor: event.requestor,
            selection: event.selection,
            target: event.target,
            property: event.property,
            time: event.time,
        });
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<Event>, BackendError> {
        Ok(self.state.borrow_mut().events.pop_front())
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, BackendError> {
        if !self.state.borrow().events.is_empty() {
            return Ok(true);
        }
        match timeout {
            Some(pause) => {
                std::thread::sleep(pause);
                Ok(false)
            }
            None => Err(BackendError::Display("no scripted events left".into())),
        }
    }

    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub fn selection_request(
    owner: u32,
    requestor: u32,
    selection: u32,
    target: u32,
    property: u32,
    time: u32,
) -> Event {
    Event::SelectionRequest(SelectionRequestEvent {
        response_type: SELECTION_REQUEST_EVENT,
        sequence: 0,
        time,
        owner,
        requestor,
        selection,
        target,
        property,
    })
}

pub fn selection_clear(owner: u32, selection: u32) -> Event {
    Event::SelectionClear(SelectionClearEvent {
        response_type: SELECTION_CLEAR_EVENT,
        sequence: 0,
        time: 0,
        owner,
        selection,
    })
}
