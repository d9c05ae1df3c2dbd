//! Inbound fragment reassembly.
//!
//! Data packets from the central may arrive as fragments of one logical
//! payload, identified by a shared fragment id (`fid`) and ordered by the
//! fragment offset (`fo`).  [`Reassembler`] collects parts per fid and hands
//! back the concatenated payload once the group is complete.
//!
//! This module only manages state; all socket I/O and ACK generation is the
//! caller's responsibility.

use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// Per-fid collection buffer.
///
/// `fo` values of one group form the contiguous range `0..=max_fo`; the
/// packet with MOREBITS clear marks the end and fixes `max_fo`.
#[derive(Debug, Default)]
struct FragBuf {
    /// Parts keyed by fragment offset; the ordered map keeps concatenation
    /// order independent of arrival order.
    parts: BTreeMap<u8, Vec<u8>>,
    last_seen: bool,
    max_fo: u8,
}

impl FragBuf {
    fn complete(&self) -> bool {
        self.last_seen && self.parts.len() == usize::from(self.max_fo) + 1
    }
}

/// Collects ordered fragments per fragment id and delivers whole payloads.
///
/// `fid = 0` (unfragmented packets) passes through as a single-part group.
/// Duplicate fragments overwrite their slot, so retransmissions are
/// idempotent.
#[derive(Debug, Default)]
pub struct Reassembler {
    buckets: HashMap<u8, FragBuf>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one inbound fragment.
    ///
    /// Returns the complete payload (parts concatenated in ascending `fo`
    /// order) when this fragment completes its group; the group's buffer is
    /// dropped on delivery.
    pub fn accept(&mut self, fid: u8, fo: u8, morebits: bool, data: &[u8]) -> Option<Vec<u8>> {
        let buf = self.buckets.entry(fid).or_default();
        buf.parts.insert(fo, data.to_vec());
        if !morebits {
            buf.last_seen = true;
            buf.max_fo = fo;
        }

        if !buf.complete() {
            return None;
        }

        let buf = self.buckets.remove(&fid)?;
        let mut payload = Vec::with_capacity(buf.parts.values().map(Vec::len).sum());
        for part in buf.parts.into_values() {
            payload.extend_from_slice(&part);
        }
        Some(payload)
    }

    /// Number of fragment groups still being collected.
    pub fn pending(&self) -> usize {
        self.buckets.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
