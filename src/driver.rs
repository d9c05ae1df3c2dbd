//! Driver loop and handshake entry points.
//!
//! [`Driver`] orchestrates one SLOW session end to end over any
//! [`Transport`]:
//!
//! 1. **Send phase** — transmit every entry the scheduler admits.
//! 2. **Disconnect initiation** — once the queue drains, emit the disconnect
//!    packet and wait for its acknowledgement.
//! 3. **Receive phase** — poll the transport for 100 ms; decode, feed ACKs to
//!    the session, feed data to the reassembler, and answer data with a pure
//!    ACK.
//!
//! The loop is single-threaded and cooperative: the only blocking primitives
//! are the bounded receive poll and the initial handshake read.  Sessions are
//! created via [`Driver::connect`] (fresh handshake) or [`Driver::revive`]
//! (restore from a persisted [`SessionState`]).

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::packet::{flags, Packet, PacketError};
use crate::reassembly::Reassembler;
use crate::session::Session;
use crate::state::SessionState;
use crate::transport::Transport;

/// Bounded wait per receive poll in the steady-state loop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receive buffer size; comfortably above the 1472-byte maximum datagram.
const RECV_BUF: usize = 2048;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable timeouts for one session.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Retransmission timeout: elapsed time since an entry's last send beyond
    /// which it becomes eligible again.
    pub rto: Duration,
    /// Blocking-read timeout for the SETUP response during `connect`.
    pub recv_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(800),
            recv_timeout: Duration::from_millis(1500),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Fatal session-level failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),
    #[error("timed out waiting for the SETUP response")]
    SetupTimeout,
    #[error("connection rejected by the central (ACCEPT bit clear)")]
    Rejected,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives one session over a [`Transport`] until disconnect completes.
#[derive(Debug)]
pub struct Driver<T: Transport> {
    transport: T,
    session: Session,
    reasm: Reassembler,
    rto: Duration,
    waiting_dc_ack: bool,
    dc_seqnum: u32,
    deliveries: Vec<Vec<u8>>,
}

impl<T: Transport> Driver<T> {
    // -----------------------------------------------------------------------
    // Handshake entry points
    // -----------------------------------------------------------------------

    /// Open a fresh session: CONNECT → SETUP → establish.
    ///
    /// Fails with [`ClientError::SetupTimeout`] when no SETUP arrives within
    /// `cfg.recv_timeout`, and with [`ClientError::Rejected`] when the
    /// response carries a clear ACCEPT bit.
    pub fn connect(mut transport: T, payload: &[u8], cfg: &Config) -> Result<Self, ClientError> {
        let mut session = Session::new();

        let hello = Packet {
            flags: flags::CONNECT,
            window: session.local_window_left(),
            ..Packet::default()
        };
        transmit(&mut transport, &hello, "CONNECT")?;

        let mut buf = [0u8; RECV_BUF];
        let n = transport
            .recv_timeout(&mut buf, cfg.recv_timeout)?
            .ok_or(ClientError::SetupTimeout)?;
        let setup = Packet::decode(&buf[..n])?;
        log::debug!("[connect] «« SETUP seq={} ({n}B)\n{setup}", setup.seqnum);

        if !setup.has_flag(flags::ACCEPT) {
            return Err(ClientError::Rejected);
        }

        session.establish(&setup);
        session.note_rx_seq(setup.seqnum);
        log::info!("[connect] session established, sid={}", session.sid());

        if !payload.is_empty() {
            session.queue_data(payload, false);
        }

        Ok(Self::with_session(transport, session, cfg))
    }

    /// Resume a persisted session without a new handshake.
    ///
    /// The saved state is replayed through a locally constructed placeholder
    /// so that `establish` restores the counters: `seqnum = next_seq − 1`
    /// makes the next outbound packet use exactly the saved `next_seq`.  The
    /// first queued packet carries the REVIVE flag, which bypasses the window
    /// gate and reopens the session on the central.
    pub fn revive(
        transport: T,
        state: &SessionState,
        payload: &[u8],
        cfg: &Config,
    ) -> Result<Self, ClientError> {
        let mut session = Session::new();

        let placeholder = Packet {
            sid: state.sid,
            sttl: state.sttl,
            seqnum: state.next_seq.wrapping_sub(1),
            acknum: state.last_ack,
            window: 0,
            ..Packet::default()
        };
        session.establish(&placeholder);
        session.note_rx_seq(state.last_ack);
        log::info!("[revive] resuming session, sid={}", session.sid());

        session.queue_data(payload, true);

        Ok(Self::with_session(transport, session, cfg))
    }

    fn with_session(transport: T, session: Session, cfg: &Config) -> Self {
        Self {
            transport,
            session,
            reasm: Reassembler::new(),
            rto: cfg.rto,
            waiting_dc_ack: false,
            dc_seqnum: 0,
            deliveries: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Steady-state loop
    // -----------------------------------------------------------------------

    /// Run the session to completion.
    ///
    /// Returns the final [`SessionState`] snapshot once the central
    /// acknowledges the disconnect packet; the caller decides whether to
    /// persist it.
    pub fn run(&mut self) -> Result<SessionState, ClientError> {
        loop {
            // 1. Send phase: new transmissions and RTO-driven retransmissions.
            let now = Instant::now();
            for idx in self.session.ready_to_send(self.rto, now) {
                let ob = self.session.outbound(idx);
                let tag = if ob.first_sent.is_some() {
                    "RETX"
                } else if ob.packet.has_flag(flags::REVIVE) {
                    "REVIVE"
                } else {
                    "DATA"
                };
                let pkt = ob.packet.clone();
                transmit(&mut self.transport, &pkt, tag)?;
                self.session.mark_sent(idx, now);
            }

            // 2. Disconnect once the queue has drained.  The packet is not
            //    queued; its seqnum is recorded to recognise the matching ACK.
            if !self.waiting_dc_ack && self.session.empty() {
                let dc = Packet {
                    sid: self.session.sid(),
                    sttl: self.session.sttl(),
                    flags: flags::CONNECT | flags::REVIVE | flags::ACK,
                    seqnum: self.session.take_seq(),
                    acknum: self.session.last_rx_seq(),
                    window: 0,
                    ..Packet::default()
                };
                self.dc_seqnum = dc.seqnum;
                transmit(&mut self.transport, &dc, "DISCONNECT")?;
                self.waiting_dc_ack = true;
            }

            // 3. Receive phase: bounded poll; a timeout just loops around so
            //    the send phase can retransmit.
            let mut buf = [0u8; RECV_BUF];
            let Some(n) = self.transport.recv_timeout(&mut buf, POLL_INTERVAL)? else {
                continue;
            };
            let pk = match Packet::decode(&buf[..n]) {
                Ok(pk) => pk,
                Err(e) => {
                    log::warn!("[drive] dropping undecodable datagram: {e}");
                    continue;
                }
            };
            log::debug!("[drive] «« RX seq={} ({n}B)\n{pk}", pk.seqnum);

            self.session.note_rx_seq(pk.seqnum);
            if pk.has_flag(flags::ACK) {
                self.session.handle_ack(pk.acknum, pk.window, pk.sttl);
            }

            if self.waiting_dc_ack && pk.has_flag(flags::ACK) && pk.acknum == self.dc_seqnum {
                log::info!("[drive] disconnect acknowledged, session closed");
                return Ok(self.snapshot());
            }

            if !pk.data.is_empty() {
                self.session.consume_local_window(pk.data.len());
                if let Some(payload) =
                    self.reasm
                        .accept(pk.fid, pk.fo, pk.has_flag(flags::MOREBITS), &pk.data)
                {
                    log::info!("[drive] delivered payload of {} bytes", payload.len());
                    self.session.release_local_window(payload.len());
                    self.deliveries.push(payload);
                }

                let ack = Packet {
                    sid: self.session.sid(),
                    sttl: self.session.sttl(),
                    flags: flags::ACK,
                    seqnum: pk.seqnum,
                    acknum: pk.seqnum,
                    window: self.session.local_window_left(),
                    ..Packet::default()
                };
                transmit(&mut self.transport, &ack, "ACK-PURE")?;
            }
        }
    }

    /// The fields a later process needs to revive this session.
    fn snapshot(&self) -> SessionState {
        SessionState {
            sid: self.session.sid(),
            sttl: self.session.sttl(),
            next_seq: self.session.peek_next_seq(),
            last_ack: self.session.last_rx_seq(),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Complete payloads delivered by the central, in delivery order.
    pub fn deliveries(&self) -> &[Vec<u8>] {
        &self.deliveries
    }

    /// The underlying session state (used by tests and traces).
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Encode, send, and trace one packet.
fn transmit<T: Transport>(transport: &mut T, pkt: &Packet, tag: &str) -> Result<(), ClientError> {
    let raw = pkt.encode()?;
    transport.send(&raw)?;
    log::debug!("[drive] »» {tag} seq={} ({}B)\n{pkt}", pkt.seqnum, raw.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (handshake edges; full scenarios live in tests/client_flow.rs)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Sid;
    use std::collections::VecDeque;
    use std::io;

    /// Transport stub with a pre-loaded inbound queue.
    #[derive(Debug)]
    struct Canned {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<Packet>,
    }

    impl Canned {
        fn new(inbound: Vec<Packet>) -> Self {
            Self {
                inbound: inbound
                    .into_iter()
                    .map(|p| p.encode().unwrap())
                    .collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Transport for Canned {
        fn send(&mut self, buf: &[u8]) -> io::Result<()> {
            self.sent.push(Packet::decode(buf).expect("client sent malformed datagram"));
            Ok(())
        }

        fn recv_timeout(&mut self, buf: &mut [u8], _t: Duration) -> io::Result<Option<usize>> {
            match self.inbound.pop_front() {
                Some(d) => {
                    buf[..d.len()].copy_from_slice(&d);
                    Ok(Some(d.len()))
                }
                None => Ok(None),
            }
        }
    }

    fn setup_packet() -> Packet {
        Packet {
            sid: Sid([9; 16]),
            sttl: 10_000,
            flags: flags::ACCEPT | flags::ACK,
            seqnum: 500,
            acknum: 0,
            window: 4096,
            ..Packet::default()
        }
    }

    #[test]
    fn connect_sends_connect_and_establishes() {
        let transport = Canned::new(vec![setup_packet()]);
        let driver = Driver::connect(transport, b"hi", &Config::default()).unwrap();

        let hello = &driver.transport.sent[0];
        assert_eq!(hello.flags, flags::CONNECT);
        assert_eq!(hello.sid, Sid::default());
        assert_eq!(hello.window, 65_535);
        assert!(hello.data.is_empty());

        assert_eq!(driver.session.sid(), Sid([9; 16]));
        assert_eq!(driver.session.peek_next_seq(), 502); // 501 consumed by the queued data
        assert_eq!(driver.session.queue_len(), 1);
        assert_eq!(driver.session.last_rx_seq(), 500);
    }

    #[test]
    fn connect_without_payload_queues_nothing() {
        let transport = Canned::new(vec![setup_packet()]);
        let driver = Driver::connect(transport, b"", &Config::default()).unwrap();
        assert!(driver.session.empty());
    }

    #[test]
    fn connect_times_out_without_setup() {
        let transport = Canned::new(vec![]);
        let err = Driver::connect(transport, b"hi", &Config::default()).unwrap_err();
        assert!(matches!(err, ClientError::SetupTimeout));
    }

    #[test]
    fn connect_rejected_when_accept_clear() {
        let mut reject = setup_packet();
        reject.flags = flags::ACK; // ACCEPT bit clear
        let transport = Canned::new(vec![reject]);
        let err = Driver::connect(transport, b"hi", &Config::default()).unwrap_err();
        assert!(matches!(err, ClientError::Rejected));
    }

    #[test]
    fn revive_restores_counters_and_queues_revive_packet() {
        let state = SessionState {
            sid: Sid([3; 16]),
            sttl: 7_000,
            next_seq: 42,
            last_ack: 17,
        };
        let transport = Canned::new(vec![]);
        let driver = Driver::revive(transport, &state, b"B", &Config::default()).unwrap();

        assert_eq!(driver.session.sid(), Sid([3; 16]));
        assert_eq!(driver.session.last_rx_seq(), 17);
        assert_eq!(driver.session.queue_len(), 1);

        let p = &driver.session.outbound(0).packet;
        assert_eq!(p.seqnum, 42);
        assert!(p.has_flag(flags::REVIVE | flags::ACK));
        assert_eq!(p.acknum, 17);
        assert_eq!(p.data, b"B");
    }
}
