//! Wire-format definitions for SLOW datagrams.
//!
//! Every datagram exchanged with the central is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! The header is a fixed 32-byte prefix; everything after it is payload (the
//! datagram length supplies the payload length, there is no length field).
//! Multi-byte integers are little-endian.
//!
//! ```text
//!  0                16                20        24        28    30  31  32
//!  ┌────────────────┬─────────────────┬─────────┬─────────┬─────┬───┬───┬──────┐
//!  │ sid (16 bytes) │ sttl<<5 | flags │ seqnum  │ acknum  │ win │fid│fo │ data │
//!  └────────────────┴─────────────────┴─────────┴─────────┴─────┴───┴───┴──────┘
//! ```

use thiserror::Error;

/// Size of the fixed header prefix in bytes.
pub const HEADER_LEN: usize = 32;

/// Maximum payload carried by a single packet.
pub const MAX_PAYLOAD: usize = 1440;

/// Largest representable session TTL (27 bits, milliseconds).
pub const STTL_MAX: u32 = (1 << 27) - 1;

/// Bit-flag constants for the 5-bit `flags` header field.
pub mod flags {
    /// Session establishment (and, combined with REVIVE|ACK, disconnect).
    pub const CONNECT: u8 = 0b1_0000;
    /// Resume a previously persisted session instead of opening a new one.
    pub const REVIVE: u8 = 0b0_1000;
    /// The `acknum` field is valid.
    pub const ACK: u8 = 0b0_0100;
    /// Central grants the session (clear in a handshake response = reject).
    pub const ACCEPT: u8 = 0b0_0010;
    /// More fragments follow for the same fragment id.
    pub const MOREBITS: u8 = 0b0_0001;
}

// ---------------------------------------------------------------------------
// Session identifier
// ---------------------------------------------------------------------------

/// 16-byte server-assigned session identifier.
///
/// Opaque to the peripheral: assigned by the central in the handshake
/// response and echoed verbatim in every subsequent packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sid(pub [u8; 16]);

impl std::fmt::Display for Sid {
    /// UUID-style rendering (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            write!(f, "{b:02x}")?;
            if matches!(i, 3 | 5 | 7 | 9) {
                write!(f, "-")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete SLOW datagram: fixed header + opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Session ID (all-zero before the session is established).
    pub sid: Sid,
    /// Session TTL in milliseconds (27 bits; central-authoritative).
    pub sttl: u32,
    /// Bitmask of [`flags`] constants (5 bits).
    pub flags: u8,
    /// Sender's sequence number for this packet.
    pub seqnum: u32,
    /// Highest received peer seqnum being acknowledged (valid iff ACK set).
    pub acknum: u32,
    /// Advertised receive window in bytes.
    pub window: u16,
    /// Fragment id: shared by all packets of one multi-packet payload, 0 otherwise.
    pub fid: u8,
    /// Fragment offset within a fid group, starting at 0.
    pub fo: u8,
    /// Opaque payload, at most [`MAX_PAYLOAD`] bytes.
    pub data: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(self.data.len()));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.extend_from_slice(&self.sid.0);
        let packed = ((self.sttl & STTL_MAX) << 5) | u32::from(self.flags & 0x1F);
        buf.extend_from_slice(&packed.to_le_bytes());
        buf.extend_from_slice(&self.seqnum.to_le_bytes());
        buf.extend_from_slice(&self.acknum.to_le_bytes());
        buf.extend_from_slice(&self.window.to_le_bytes());
        buf.push(self.fid);
        buf.push(self.fo);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Bytes beyond the 32-byte header are the payload.  Returns
    /// [`PacketError::ShortPacket`] when the buffer cannot hold a header.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::ShortPacket(buf.len()));
        }

        let mut sid = [0u8; 16];
        sid.copy_from_slice(&buf[..16]);

        let packed = read_u32le(&buf[16..20]);

        Ok(Self {
            sid: Sid(sid),
            sttl: packed >> 5,
            flags: (packed & 0x1F) as u8,
            seqnum: read_u32le(&buf[20..24]),
            acknum: read_u32le(&buf[24..28]),
            window: u16::from_le_bytes([buf[28], buf[29]]),
            fid: buf[30],
            fo: buf[31],
            data: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// `true` when the given flag bit(s) are all set.
    pub fn has_flag(&self, mask: u8) -> bool {
        self.flags & mask == mask
    }
}

fn read_u32le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl std::fmt::Display for Packet {
    /// Multi-line human-readable rendering used by the traffic traces.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sid      : {}", self.sid)?;
        writeln!(
            f,
            "flags    : 0x{:02x}  (C={},R={},ACK={},A={},MB={})",
            self.flags,
            u8::from(self.has_flag(flags::CONNECT)),
            u8::from(self.has_flag(flags::REVIVE)),
            u8::from(self.has_flag(flags::ACK)),
            u8::from(self.has_flag(flags::ACCEPT)),
            u8::from(self.has_flag(flags::MOREBITS)),
        )?;
        writeln!(f, "sttl(ms) : {}", self.sttl)?;
        writeln!(f, "seqnum   : {}", self.seqnum)?;
        writeln!(f, "acknum   : {}", self.acknum)?;
        writeln!(f, "window   : {}", self.window)?;
        writeln!(f, "fid      : {}", self.fid)?;
        writeln!(f, "fo       : {}", self.fo)?;
        write!(f, "data(len): {} B", self.data.len())?;
        if !self.data.is_empty() {
            const PREVIEW: usize = 64;
            write!(f, "  → \"")?;
            for &b in self.data.iter().take(PREVIEW) {
                let c = if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                };
                write!(f, "{c}")?;
            }
            if self.data.len() > PREVIEW {
                write!(f, "…")?;
            }
            write!(f, "\"")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Payload exceeds [`MAX_PAYLOAD`] bytes.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLarge(usize),
    /// Datagram shorter than the fixed header.
    #[error("datagram of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    ShortPacket(usize),
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
