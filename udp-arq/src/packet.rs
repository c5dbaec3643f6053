//! Wire-format definitions for protocol datagrams.
//!
//! Every datagram exchanged between peers is a [`Packet`].  Both reliability
//! engines share the same framing; they differ only in how they fill the two
//! sequence slots.  This module is responsible for:
//! - Defining the on-wire binary layout (kind, sequence slots, window size).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated or unrecognised input.
//!
//! Pure data transformation; no I/O happens here.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |  Epoch-0 Seq  |  Epoch-1 Seq  |  Window Size  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 4 bytes.  The payload runs to the end
//! of the datagram; there is no length field and no checksum.
//!
//! | Kind | Meaning | Slots | Window |
//! |------|---------|-------|--------|
//! | 0 Data    | one message | selective-repeat: exactly one slot holds the sequence number; stop-and-wait: both zero | sender's window size |
//! | 1 Ack     | selective-repeat acknowledgement | one or both slots name acknowledged numbers | echoed |
//! | 2 Confirm | stop-and-wait delivery confirmation | zero | zero |

use thiserror::Error;

use crate::state::Epoch;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 4;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_SLOTS: usize = 1;
const OFF_WINDOW: usize = 3;

/// Datagram kind carried in the first header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// An application message.
    Data = 0,
    /// Selective-repeat acknowledgement of one or two sequence numbers.
    Ack = 1,
    /// Stop-and-wait confirmation of the single outstanding message.
    Confirm = 2,
}

impl Kind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Kind::Data),
            1 => Some(Kind::Ack),
            2 => Some(Kind::Confirm),
            _ => None,
        }
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: Kind,
    /// Sequence carriers, indexed by [`Epoch::index`].
    ///
    /// Zero means "empty"; live sequence numbers start at 1.
    pub slots: [u8; 2],
    /// Number of packets in the sender's current window.
    pub window: u8,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Selective-repeat data packet numbered `seq` within a window of
    /// `window` packets sent in `epoch`.
    pub fn data(epoch: Epoch, seq: u8, window: u8, payload: Vec<u8>) -> Self {
        let mut slots = [0u8; 2];
        slots[epoch.index()] = seq;
        Self {
            header: Header {
                kind: Kind::Data,
                slots,
                window,
            },
            payload,
        }
    }

    /// Stop-and-wait data packet: both slots empty, window unused.
    pub fn single(payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                kind: Kind::Data,
                slots: [0, 0],
                window: 0,
            },
            payload,
        }
    }

    /// Acknowledge `seq` in the slot belonging to `epoch`.
    pub fn ack(epoch: Epoch, seq: u8, window: u8) -> Self {
        let mut slots = [0u8; 2];
        slots[epoch.index()] = seq;
        Self {
            header: Header {
                kind: Kind::Ack,
                slots,
                window,
            },
            payload: Vec::new(),
        }
    }

    /// Stop-and-wait confirmation (`[2, 0, 0, 0]`).
    pub fn confirm() -> Self {
        Self {
            header: Header {
                kind: Kind::Confirm,
                slots: [0, 0],
                window: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.header.kind
    }

    /// The sequence number carried in `epoch`'s slot (0 when empty).
    pub fn seq(&self, epoch: Epoch) -> u8 {
        self.header.slots[epoch.index()]
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.header.kind as u8);
        buf.extend_from_slice(&self.header.slots);
        buf.push(self.header.window);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if `buf` is shorter than [`HEADER_LEN`] or the kind
    /// byte is not one of the known [`Kind`]s.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let kind = Kind::from_u8(buf[OFF_KIND]).ok_or(PacketError::UnknownKind(buf[OFF_KIND]))?;

        Ok(Packet {
            header: Header {
                kind,
                slots: [buf[OFF_SLOTS], buf[OFF_SLOTS + 1]],
                window: buf[OFF_WINDOW],
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the 4-byte header")]
    BufferTooShort(usize),
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
}
