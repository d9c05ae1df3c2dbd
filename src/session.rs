//! Session state: identifiers, counters, windows, and the transmit queue.
//!
//! [`Session`] owns everything the peripheral must remember about one SLOW
//! session:
//!
//! - Identity (`sid`, `sttl`) adopted from the central's SETUP packet.
//! - Sequence counters (`next_seq`, `last_ack_rcvd`, `last_rx_seq`).
//! - Flow control (local receive window, central's advertised window).
//! - The outbound queue of [`Outbound`] entries, fragmented by
//!   [`Session::queue_data`] and drained by cumulative ACKs.
//!
//! The transmit scheduler ([`Session::ready_to_send`]) is pure: it takes the
//! current instant, returns indices into the queue, and performs no I/O.  The
//! driver transmits each admitted entry and reports back via
//! [`Session::mark_sent`].  This module only manages state; all socket I/O is
//! the caller's responsibility.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::packet::{flags, Packet, Sid, MAX_PAYLOAD};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A queued packet awaiting transmission or acknowledgement.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// The packet, fully formed at enqueue time.
    pub packet: Packet,
    /// Set once, on the first transmission.  `None` means never sent.
    pub first_sent: Option<Instant>,
    /// Refreshed on every transmission; drives the RTO check.
    pub last_sent: Option<Instant>,
}

impl Outbound {
    fn new(packet: Packet) -> Self {
        Self {
            packet,
            first_sent: None,
            last_sent: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// State for one SLOW session on the peripheral side.
///
/// ```text
///   queue_data ──▶ [ txq: Outbound, Outbound, … ] ──▶ ready_to_send
///                        ▲                                 │ indices
///            handle_ack ─┘ (cumulative drain)              ▼
///                                                      driver tx
/// ```
#[derive(Debug)]
pub struct Session {
    sid: Sid,
    sttl_ms: u32,
    next_seq: u32,
    last_ack_rcvd: u32,
    local_window: u16,
    remote_window: u16,
    next_fid: u8,
    last_rx_seq: u32,
    txq: VecDeque<Outbound>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an unestablished session advertising the full 65535-byte window.
    pub fn new() -> Self {
        Self {
            sid: Sid::default(),
            sttl_ms: 0,
            next_seq: 0,
            last_ack_rcvd: 0,
            local_window: u16::MAX,
            remote_window: 0,
            next_fid: 1,
            last_rx_seq: 0,
            txq: VecDeque::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Establishment
    // -----------------------------------------------------------------------

    /// Initialise the session from a SETUP-like packet.
    ///
    /// Replaces identity and counters wholesale: `sid` and `sttl` are adopted,
    /// the local sequence space starts at `setup.seqnum + 1`, and the
    /// central's advertised window becomes the remote window.  Idempotent
    /// replacement, not a merge.
    pub fn establish(&mut self, setup: &Packet) {
        self.sid = setup.sid;
        self.sttl_ms = setup.sttl;
        self.next_seq = setup.seqnum.wrapping_add(1);
        self.remote_window = setup.window;
        self.last_ack_rcvd = setup.acknum;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Session ID adopted from the central.
    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Most recent session TTL (ms) echoed by the central.
    pub fn sttl(&self) -> u32 {
        self.sttl_ms
    }

    /// Consume and return the next outbound sequence number.
    pub fn take_seq(&mut self) -> u32 {
        let s = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        s
    }

    /// Next outbound sequence number, without consuming it.
    pub fn peek_next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Acknowledgement number from the most recent inbound ACK.
    pub fn last_ack(&self) -> u32 {
        self.last_ack_rcvd
    }

    /// Highest central seqnum recorded via [`Session::note_rx_seq`].
    pub fn last_rx_seq(&self) -> u32 {
        self.last_rx_seq
    }

    /// Remaining local receive window, advertised in outbound packets.
    pub fn local_window_left(&self) -> u16 {
        self.local_window
    }

    /// `true` when the transmit queue is drained.
    pub fn empty(&self) -> bool {
        self.txq.is_empty()
    }

    /// Number of entries currently queued.
    pub fn queue_len(&self) -> usize {
        self.txq.len()
    }

    /// Borrow a queued entry by scheduler index.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of bounds; indices from
    /// [`Session::ready_to_send`] are valid until the queue is next mutated.
    pub fn outbound(&self, index: usize) -> &Outbound {
        &self.txq[index]
    }

    // -----------------------------------------------------------------------
    // Inbound bookkeeping
    // -----------------------------------------------------------------------

    /// Record the central's sequence number from an inbound packet.
    ///
    /// A zero seqnum is ignored; it marks an uninitialised header rather than
    /// a real packet number.
    pub fn note_rx_seq(&mut self, s: u32) {
        if s != 0 {
            self.last_rx_seq = s;
        }
    }

    /// Process a cumulative ACK.
    ///
    /// Adopts the central's advertised window and STTL unconditionally (the
    /// central is authoritative for both, and a stale `acknum` still
    /// overwrites `last_ack`), then drops every queued entry whose seqnum is
    /// covered by `acknum`.
    pub fn handle_ack(&mut self, acknum: u32, remote_window: u16, sttl: u32) {
        self.last_ack_rcvd = acknum;
        self.remote_window = remote_window;
        self.sttl_ms = sttl;
        while self
            .txq
            .front()
            .is_some_and(|ob| ob.packet.seqnum <= acknum)
        {
            self.txq.pop_front();
        }
    }

    // -----------------------------------------------------------------------
    // Local window accounting
    // -----------------------------------------------------------------------

    /// Reserve `n` bytes of the local receive window (clamps at 0).
    pub fn consume_local_window(&mut self, n: usize) {
        let n = u16::try_from(n).unwrap_or(u16::MAX);
        self.local_window = self.local_window.saturating_sub(n);
    }

    /// Return `n` bytes to the local receive window (clamps at 65535).
    pub fn release_local_window(&mut self, n: usize) {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.local_window = (u32::from(self.local_window) + n).min(65_535) as u16;
    }

    // -----------------------------------------------------------------------
    // Enqueue & fragmentation
    // -----------------------------------------------------------------------

    /// Fragment `payload` into the transmit queue.
    ///
    /// A payload larger than [`MAX_PAYLOAD`] is split into 1440-byte chunks
    /// sharing one non-zero fragment id, with MOREBITS on every chunk but the
    /// last.  A payload that fits in one packet goes out with `fid = 0`.  The
    /// whole payload is always enqueued; emission is gated later by the
    /// scheduler, not here.
    ///
    /// With `is_revive` the first packet additionally carries the REVIVE
    /// flag, and an empty payload yields a single header-only REVIVE|ACK
    /// packet.
    pub fn queue_data(&mut self, payload: &[u8], is_revive: bool) {
        if payload.is_empty() && is_revive {
            let packet = Packet {
                sid: self.sid,
                sttl: self.sttl_ms,
                flags: flags::REVIVE | flags::ACK,
                seqnum: self.take_seq(),
                acknum: self.last_rx_seq,
                window: self.local_window,
                fid: 0,
                fo: 0,
                data: Vec::new(),
            };
            self.txq.push_back(Outbound::new(packet));
            return;
        }

        let fid = if payload.len() > MAX_PAYLOAD {
            self.take_fid()
        } else {
            0
        };

        let mut off = 0usize;
        let mut fo = 0u8;
        while off < payload.len() {
            let here = (payload.len() - off).min(MAX_PAYLOAD);

            let mut pkt_flags = flags::ACK;
            if is_revive && off == 0 {
                pkt_flags |= flags::REVIVE;
            }
            if off + here < payload.len() {
                pkt_flags |= flags::MOREBITS;
            }

            let packet = Packet {
                sid: self.sid,
                sttl: self.sttl_ms,
                flags: pkt_flags,
                seqnum: self.take_seq(),
                acknum: self.last_rx_seq,
                window: self.local_window,
                fid,
                fo,
                data: payload[off..off + here].to_vec(),
            };
            self.txq.push_back(Outbound::new(packet));

            fo = fo.wrapping_add(1);
            off += here;
        }
    }

    /// Next fragment id, cycling through 1..=255.  Zero is reserved for
    /// unfragmented payloads.
    fn take_fid(&mut self) -> u8 {
        let fid = self.next_fid;
        self.next_fid = if self.next_fid == u8::MAX {
            1
        } else {
            self.next_fid + 1
        };
        fid
    }

    // -----------------------------------------------------------------------
    // Transmit scheduling
    // -----------------------------------------------------------------------

    /// Bytes of the central's window not yet occupied by in-flight data.
    ///
    /// In-flight means queued and transmitted at least once.  Computed on
    /// demand from the queue; never persisted.
    fn remote_window_left(&self) -> usize {
        let in_flight: usize = self
            .txq
            .iter()
            .filter(|ob| ob.last_sent.is_some())
            .map(|ob| ob.packet.data.len())
            .sum();
        usize::from(self.remote_window).saturating_sub(in_flight)
    }

    /// Indices of queue entries eligible for (re)transmission at `now`.
    ///
    /// An entry is eligible when it has never been sent, or when `rto` has
    /// elapsed since its last transmission.  Admission walks the queue
    /// head-first: a REVIVE packet is always admitted; a data packet is
    /// admitted only while its payload fits the remaining remote window, and
    /// the walk stops at the first one that does not fit.  No I/O and no
    /// mutation happen here.
    pub fn ready_to_send(&self, rto: Duration, now: Instant) -> Vec<usize> {
        let mut batch = Vec::new();
        let mut bytes_left = self.remote_window_left();

        for (i, ob) in self.txq.iter().enumerate() {
            if let (Some(_), Some(last)) = (ob.first_sent, ob.last_sent) {
                if now.saturating_duration_since(last) < rto {
                    continue; // in flight, not yet timed out
                }
            }

            if ob.packet.has_flag(flags::REVIVE) {
                batch.push(i);
            } else if ob.packet.data.len() <= bytes_left {
                bytes_left -= ob.packet.data.len();
                batch.push(i);
            } else {
                break;
            }
        }
        batch
    }

    /// Record a transmission of the entry at `index`.
    ///
    /// Sets `first_sent` on the first call and refreshes `last_sent` on every
    /// call; neither timestamp is ever cleared afterwards.
    pub fn mark_sent(&mut self, index: usize, now: Instant) {
        if let Some(ob) = self.txq.get_mut(index) {
            if ob.first_sent.is_none() {
                ob.first_sent = Some(now);
            }
            ob.last_sent = Some(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
