//! Typed property buffers.
//!
//! A [`Property`] is the unit of data transfer between clients: a name,
//! a type, an element width and a byte buffer. The buffer is a
//! [`Bytes`], so [`Property::range`] carves INCR chunks out of a reply
//! without copying.

use bytes::Bytes;

use super::{Atom, X11Error};

/// Element width of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl Format {
    pub fn from_bits(bits: u8) -> Result<Self, X11Error> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            32 => Ok(Self::ThirtyTwo),
            other => Err(X11Error::UnknownFormat(other)),
        }
    }

    /// Width on the wire, as the protocol names it.
    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
            Self::ThirtyTwo => 32,
        }
    }

    /// Bytes per element in buffers exchanged with the binding.
    ///
    /// x11rb packs format-32 data as `u32`s. (Xlib hands out C `long`s
    /// instead, 8 bytes on LP64; that layout never reaches this crate.)
    pub fn size(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
            Self::ThirtyTwo => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: Atom,
    type_: Atom,
    format: Format,
    data: Bytes,
}

impl Property {
    /// Wrap a buffer. Fails if its length is not a whole number of elements.
    pub fn new(
        name: Atom,
        type_: Atom,
        format: Format,
        data: impl Into<Bytes>,
    ) -> Result<Self, X11Error> {
        let data = data.into();
        if data.len() % format.size() != 0 {
            return Err(X11Error::Misaligned {
                len: data.len(),
                format: format.bits(),
            });
        }
        Ok(Self {
            name,
            type_,
            format,
            data,
        })
    }

    /// An 8-bit property.
    pub fn bytes(name: Atom, type_: Atom, data: impl Into<Bytes>) -> Self {
        Self {
            name,
            type_,
            format: Format::Eight,
            data: data.into(),
        }
    }

    /// A 32-bit property from native integers.
    pub fn u32s(name: Atom, type_: Atom, values: &[u32]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self {
            name,
            type_,
            format: Format::ThirtyTwo,
            data: data.into(),
        }
    }

    /// A 32-bit property listing atoms.
    pub fn atoms<'a>(name: Atom, type_: Atom, atoms: impl IntoIterator<Item = &'a Atom>) -> Self {
        let values: Vec<u32> = atoms.into_iter().map(Atom::value).collect();
        Self::u32s(name, type_, &values)
    }

    pub fn name(&self) -> &Atom {
        &self.name
    }

    pub fn type_(&self) -> &Atom {
        &self.type_
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.format.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Elements `start..end`, both clamped to [`len`](Self::len).
    ///
    /// The result shares this property's backing buffer.
    pub fn range(&self, start: usize, end: usize) -> Self {
        let len = self.len();
        let end = end.min(len);
        let start = start.min(end);
        let size = self.format.size();
        Self {
            name: self.name.clone(),
            type_: self.type_.clone(),
            format: self.format,
            data: self.data.slice(start * size..end * size),
        }
    }

    /// Elements widened to `u32`, whatever the format.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let format = self.format;
        self.data
            .chunks_exact(format.size())
            .map(move |chunk| match format {
                Format::Eight => u32::from(chunk[0]),
                Format::Sixteen => u32::from(u16::from_ne_bytes([chunk[0], chunk[1]])),
                Format::ThirtyTwo => u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            })
    }
}
