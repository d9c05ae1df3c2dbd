//! Persisted session state for revive.
//!
//! After a clean disconnect the peripheral can write the minimal fields
//! needed to resume the session in a later process: the session id, the most
//! recent STTL, the next unused sequence number, and the last central seqnum
//! it acknowledged.  The on-disk record is binary, little-endian, and exactly
//! 28 bytes — this layout is the contract between the two process lifetimes.
//!
//! ```text
//!  0               16      20        24        28
//!  ┌───────────────┬───────┬─────────┬─────────┐
//!  │ sid (16 bytes)│ sttl  │ next_seq│ last_ack│
//!  └───────────────┴───────┴─────────┴─────────┘
//! ```

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::packet::Sid;

/// Exact size of the on-disk record.
pub const STATE_LEN: usize = 28;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The minimal session fields required to revive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Server-assigned session id.
    pub sid: Sid,
    /// Most recent STTL echoed by the central (ms).
    pub sttl: u32,
    /// Next unused local sequence number.
    pub next_seq: u32,
    /// Last central seqnum this client acknowledged.
    pub last_ack: u32,
}

impl SessionState {
    /// Serialise into the fixed 28-byte record.
    pub fn to_bytes(&self) -> [u8; STATE_LEN] {
        let mut buf = [0u8; STATE_LEN];
        buf[..16].copy_from_slice(&self.sid.0);
        buf[16..20].copy_from_slice(&self.sttl.to_le_bytes());
        buf[20..24].copy_from_slice(&self.next_seq.to_le_bytes());
        buf[24..28].copy_from_slice(&self.last_ack.to_le_bytes());
        buf
    }

    /// Parse the fixed record; any other length is rejected.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, StateError> {
        if buf.len() != STATE_LEN {
            return Err(StateError::BadLength(buf.len()));
        }
        let mut sid = [0u8; 16];
        sid.copy_from_slice(&buf[..16]);
        Ok(Self {
            sid: Sid(sid),
            sttl: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            next_seq: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
            last_ack: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
        })
    }

    /// Write the record to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }

    /// Read the record back from `path`.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise loading persisted session state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot read session state: {0}")]
    Io(#[from] io::Error),
    #[error("session state is {0} bytes; expected exactly {STATE_LEN}")]
    BadLength(usize),
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
