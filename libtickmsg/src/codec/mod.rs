//! Message codecs.
//!
//! A codec turns a `(message id, payload)` pair into the body of a frame and back. The session engine only sees
//! the [`MessageCodec`] trait, so codecs can be swapped without touching the framing logic:
//!
//! - [`TupleCodec`] - serializes the pair as a two-element tuple. Ids can be any serde type (usually strings).
//! - [`FixedIdCodec`] - a fixed-width integer id followed by the raw payload bytes.
//!
//! Every codec also names the [`WireInt`] format of the frame length prefix.

mod fixed_id;
mod tuple;

pub use fixed_id::FixedIdCodec;
pub use tuple::TupleCodec;

use crate::errors::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A decoded frame body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<Id> {
    pub id: Id,
    pub payload: Option<Vec<u8>>,
}

impl<Id> Message<Id> {
    pub fn new(id: Id, payload: Option<Vec<u8>>) -> Self {
        Self { id, payload }
    }
}

/// The contract between the session engine and a serialization format.
pub trait MessageCodec: 'static {
    type Id: Clone + Eq + Hash + Debug + Display + 'static;

    /// Serialize a message into a frame body. The payload may be absent.
    fn encode(&self, id: &Self::Id, payload: Option<&[u8]>) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a frame body.
    fn decode(&self, body: &[u8]) -> Result<Message<Self::Id>, CodecError>;

    /// The format of the frame length prefix.
    fn length_prefix(&self) -> WireInt {
        WireInt::default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    U8,
    #[default]
    U16,
    U32,
    U64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A fixed-width unsigned integer as it appears on the wire. The default is a little-endian `u16`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInt {
    #[serde(default)]
    pub width: IntWidth,
    #[serde(default)]
    pub endian: Endian,
}

impl WireInt {
    pub const fn new(width: IntWidth, endian: Endian) -> Self {
        Self { width, endian }
    }

    /// Number of bytes this integer occupies.
    pub fn size(&self) -> usize {
        match self.width {
            IntWidth::U8 => 1,
            IntWidth::U16 => 2,
            IntWidth::U32 => 4,
            IntWidth::U64 => 8,
        }
    }

    /// The largest value that can be represented.
    pub fn max_value(&self) -> u64 {
        match self.width {
            IntWidth::U8 => u8::MAX as u64,
            IntWidth::U16 => u16::MAX as u64,
            IntWidth::U32 => u32::MAX as u64,
            IntWidth::U64 => u64::MAX,
        }
    }

    /// Read a value from the front of `bytes`. Returns `None` if fewer than [`WireInt::size`] bytes are available.
    pub fn read(&self, bytes: &[u8]) -> Option<u64> {
        let raw = bytes.get(..self.size())?;
        let mut buf = [0u8; 8];
        let value = match self.endian {
            Endian::Little => {
                buf[..raw.len()].copy_from_slice(raw);
                u64::from_le_bytes(buf)
            }
            Endian::Big => {
                buf[8 - raw.len()..].copy_from_slice(raw);
                u64::from_be_bytes(buf)
            }
        };
        Some(value)
    }

    /// Append `value` to `out`. Returns `false`, leaving `out` untouched, if the value does not fit.
    pub fn write(&self, value: u64, out: &mut Vec<u8>) -> bool {
        if value > self.max_value() {
            return false;
        }
        let size = self.size();
        match self.endian {
            Endian::Little => out.extend_from_slice(&value.to_le_bytes()[..size]),
            Endian::Big => out.extend_from_slice(&value.to_be_bytes()[8 - size..]),
        }
        true
    }
}
