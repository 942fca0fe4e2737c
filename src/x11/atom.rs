//! Interned atoms.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use x11rb::NONE;

/// An interned `(value, name)` pair.
///
/// Equality and hashing use the integer value only; the name is carried
/// along so logging and registry lookups never need a round trip.
/// Obtain atoms through [`super::Connection::atom`] so both directions
/// of the cache are populated.
#[derive(Clone)]
pub struct Atom {
    value: u32,
    name: Rc<str>,
}

impl Atom {
    pub(crate) fn new(value: u32, name: impl Into<Rc<str>>) -> Self {
        Self {
            value,
            name: name.into(),
        }
    }

    /// The `None` atom (value 0).
    pub fn none() -> Self {
        Self::new(NONE, "None")
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Atom {}

impl PartialEq<u32> for Atom {
    fn eq(&self, other: &u32) -> bool {
        self.value == *other
    }
}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.value)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
