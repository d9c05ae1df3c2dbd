//! End-to-end scenarios for the peripheral client.
//!
//! Each test runs the full driver loop against a scripted in-memory transport
//! that plays the central's half of the protocol: it decodes every outbound
//! datagram, feeds it to a per-test response closure, and queues whatever
//! that closure returns as inbound datagrams.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use slow_peripheral::driver::{Config, Driver};
use slow_peripheral::packet::{flags, Packet, Sid, MAX_PAYLOAD};
use slow_peripheral::state::SessionState;
use slow_peripheral::transport::Transport;

// ---------------------------------------------------------------------------
// Scripted central
// ---------------------------------------------------------------------------

type Respond = Box<dyn FnMut(&Packet) -> Vec<Packet>>;

/// In-memory transport wired to a response script.
struct FakeCentral {
    respond: Respond,
    inbound: VecDeque<Vec<u8>>,
    sent: Rc<RefCell<Vec<Packet>>>,
}

impl FakeCentral {
    fn new(respond: Respond) -> (Self, Rc<RefCell<Vec<Packet>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                respond,
                inbound: VecDeque::new(),
                sent: Rc::clone(&sent),
            },
            sent,
        )
    }
}

impl Transport for FakeCentral {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        let pkt = Packet::decode(buf).expect("client sent a malformed datagram");
        for resp in (self.respond)(&pkt) {
            self.inbound.push_back(resp.encode().unwrap());
        }
        self.sent.borrow_mut().push(pkt);
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        match self.inbound.pop_front() {
            Some(d) => {
                buf[..d.len()].copy_from_slice(&d);
                Ok(Some(d.len()))
            }
            None => {
                // Keep retransmission tests from spinning hot.
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(None)
            }
        }
    }
}

const CENTRAL_SID: Sid = Sid([0xCC; 16]);
const CENTRAL_STTL: u32 = 30_000;

fn is_disconnect(pkt: &Packet) -> bool {
    pkt.flags == flags::CONNECT | flags::REVIVE | flags::ACK && pkt.data.is_empty()
}

fn is_handshake_connect(pkt: &Packet) -> bool {
    pkt.flags == flags::CONNECT
}

fn setup_packet(server_seq: u32, window: u16) -> Packet {
    Packet {
        sid: CENTRAL_SID,
        sttl: CENTRAL_STTL,
        flags: flags::ACCEPT | flags::ACK,
        seqnum: server_seq,
        acknum: 0,
        window,
        ..Packet::default()
    }
}

fn ack_packet(server_seq: u32, acknum: u32, window: u16) -> Packet {
    Packet {
        sid: CENTRAL_SID,
        sttl: CENTRAL_STTL,
        flags: flags::ACK,
        seqnum: server_seq,
        acknum,
        window,
        ..Packet::default()
    }
}

/// A central that SETUPs on CONNECT and acknowledges everything else
/// immediately with the given window.
fn accommodating_central(window: u16) -> Respond {
    let mut server_seq = 9000u32;
    Box::new(move |pkt: &Packet| {
        let seq = server_seq;
        server_seq += 1;
        if is_handshake_connect(pkt) {
            vec![setup_packet(seq, window)]
        } else if is_disconnect(pkt) || !pkt.data.is_empty() {
            vec![ack_packet(seq, pkt.seqnum, window)]
        } else {
            vec![] // pure ACK from the client; nothing to say
        }
    })
}

// ---------------------------------------------------------------------------
// Scenario 1: small-payload round trip
// ---------------------------------------------------------------------------

#[test]
fn small_payload_round_trip() {
    let (central, sent) = FakeCentral::new(accommodating_central(u16::MAX));

    let mut driver = Driver::connect(central, b"Hello\n", &Config::default()).unwrap();
    let state = driver.run().unwrap();

    let sent = sent.borrow();
    assert_eq!(sent.len(), 3);

    let hello = &sent[0];
    assert_eq!(hello.flags, flags::CONNECT);
    assert_eq!(hello.sid, Sid::default());
    assert_eq!(hello.window, 65_535);
    assert!(hello.data.is_empty());

    let data = &sent[1];
    assert_eq!(data.sid, CENTRAL_SID);
    assert_eq!(data.flags, flags::ACK); // no MOREBITS
    assert_eq!(data.fid, 0);
    assert_eq!(data.fo, 0);
    assert_eq!(data.data, b"Hello\n");
    assert_eq!(data.seqnum, 9001); // SETUP carried seqnum 9000
    assert_eq!(data.acknum, 9000);

    let dc = &sent[2];
    assert!(is_disconnect(dc));
    assert_eq!(dc.seqnum, 9002);
    assert_eq!(dc.window, 0);

    // Snapshot captured after the disconnect ACK.
    assert_eq!(state.sid, CENTRAL_SID);
    assert_eq!(state.sttl, CENTRAL_STTL);
    assert_eq!(state.next_seq, 9003);
    assert_eq!(state.last_ack, 9002); // seqnum of the central's disconnect ACK
}

// ---------------------------------------------------------------------------
// Scenario 2: fragmentation of a 3000-byte payload
// ---------------------------------------------------------------------------

#[test]
fn large_payload_is_fragmented() {
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    // Acknowledge cumulatively, once all three fragments have arrived.
    let mut server_seq = 9000u32;
    let mut data_seen = 0usize;
    let respond: Respond = Box::new(move |pkt: &Packet| {
        let seq = server_seq;
        server_seq += 1;
        if is_handshake_connect(pkt) {
            vec![setup_packet(seq, u16::MAX)]
        } else if is_disconnect(pkt) {
            vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
        } else if !pkt.data.is_empty() {
            data_seen += 1;
            if data_seen == 3 {
                vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
            } else {
                vec![]
            }
        } else {
            vec![]
        }
    });
    let (central, sent) = FakeCentral::new(respond);

    let mut driver = Driver::connect(central, &payload, &Config::default()).unwrap();
    driver.run().unwrap();

    let sent = sent.borrow();
    let frags: Vec<&Packet> = sent.iter().filter(|p| !p.data.is_empty()).collect();
    assert_eq!(frags.len(), 3);

    let fid = frags[0].fid;
    assert_ne!(fid, 0);
    let mut reassembled = Vec::new();
    for (i, frag) in frags.iter().enumerate() {
        assert_eq!(frag.fid, fid);
        assert_eq!(frag.fo, i as u8);
        assert_eq!(frag.seqnum, 9001 + i as u32);
        assert_eq!(frag.has_flag(flags::MOREBITS), i < 2);
        reassembled.extend_from_slice(&frag.data);
    }
    assert_eq!(frags[0].data.len(), MAX_PAYLOAD);
    assert_eq!(frags[1].data.len(), MAX_PAYLOAD);
    assert_eq!(frags[2].data.len(), 120);
    assert_eq!(reassembled, payload);
}

// ---------------------------------------------------------------------------
// Scenario 3: retransmission after a lost data packet
// ---------------------------------------------------------------------------

#[test]
fn lost_data_packet_is_retransmitted() {
    // Drop the first copy of the data packet; acknowledge the second.
    let mut server_seq = 9000u32;
    let mut data_seen = 0usize;
    let respond: Respond = Box::new(move |pkt: &Packet| {
        let seq = server_seq;
        server_seq += 1;
        if is_handshake_connect(pkt) {
            vec![setup_packet(seq, u16::MAX)]
        } else if is_disconnect(pkt) {
            vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
        } else if !pkt.data.is_empty() {
            data_seen += 1;
            if data_seen >= 2 {
                vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
            } else {
                vec![] // lost
            }
        } else {
            vec![]
        }
    });
    let (central, sent) = FakeCentral::new(respond);

    let cfg = Config {
        rto: Duration::from_millis(50),
        ..Config::default()
    };
    let mut driver = Driver::connect(central, b"retransmit me", &cfg).unwrap();
    driver.run().unwrap();

    let sent = sent.borrow();
    let copies: Vec<&Packet> = sent.iter().filter(|p| !p.data.is_empty()).collect();
    assert_eq!(copies.len(), 2, "expected original send plus one retransmit");
    assert_eq!(copies[0].seqnum, copies[1].seqnum);
    assert_eq!(copies[0].data, copies[1].data);
}

// ---------------------------------------------------------------------------
// Scenario 4: revive round trip through a persisted state file
// ---------------------------------------------------------------------------

#[test]
fn revive_resumes_from_saved_state() {
    // First lifetime: connect, deliver "A", disconnect.
    let (central, _) = FakeCentral::new(accommodating_central(u16::MAX));
    let mut driver = Driver::connect(central, b"A", &Config::default()).unwrap();
    let state = driver.run().unwrap();

    let path = std::env::temp_dir().join("slow-peripheral-revive-flow.bin");
    state.save(&path).unwrap();

    // Second lifetime: revive from disk, deliver "B".
    let loaded = SessionState::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, state);

    let mut server_seq = 20_000u32;
    let respond: Respond = Box::new(move |pkt: &Packet| {
        let seq = server_seq;
        server_seq += 1;
        if is_disconnect(pkt) || !pkt.data.is_empty() {
            vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
        } else {
            vec![]
        }
    });
    let (central, sent) = FakeCentral::new(respond);

    let mut driver = Driver::revive(central, &loaded, b"B", &Config::default()).unwrap();
    driver.run().unwrap();

    let sent = sent.borrow();
    let first = &sent[0];
    assert_eq!(first.sid, state.sid);
    assert_eq!(first.seqnum, state.next_seq);
    assert!(first.has_flag(flags::REVIVE | flags::ACK));
    assert_eq!(first.acknum, state.last_ack);
    assert_eq!(first.data, b"B");
}

// ---------------------------------------------------------------------------
// Scenario 5: reassembly of reordered inbound fragments, ACKed one by one
// ---------------------------------------------------------------------------

#[test]
fn reordered_inbound_fragments_are_reassembled() {
    // After the client's data packet, deliver a 3-fragment payload with
    // fid=7 in arrival order fo=2 (final), fo=0, fo=1.
    let frag = |seq: u32, fo: u8, morebits: bool, data: &[u8]| Packet {
        sid: CENTRAL_SID,
        sttl: CENTRAL_STTL,
        flags: if morebits { flags::MOREBITS } else { 0 },
        seqnum: seq,
        acknum: 0,
        window: u16::MAX,
        fid: 7,
        fo,
        data: data.to_vec(),
    };

    let mut server_seq = 9000u32;
    let respond: Respond = Box::new(move |pkt: &Packet| {
        let seq = server_seq;
        server_seq += 1;
        if is_handshake_connect(pkt) {
            vec![setup_packet(seq, u16::MAX)]
        } else if is_disconnect(pkt) {
            vec![ack_packet(seq, pkt.seqnum, u16::MAX)]
        } else if !pkt.data.is_empty() {
            vec![
                ack_packet(seq, pkt.seqnum, u16::MAX),
                frag(101, 2, false, b"cc"),
                frag(102, 0, true, b"aa"),
                frag(103, 1, true, b"bb"),
            ]
        } else {
            vec![]
        }
    });
    let (central, sent) = FakeCentral::new(respond);

    let mut driver = Driver::connect(central, b"go", &Config::default()).unwrap();
    driver.run().unwrap();

    // One payload, concatenated in fo order regardless of arrival order.
    assert_eq!(driver.deliveries(), [b"aabbcc".to_vec()]);

    // A pure ACK went out for every fragment, mirroring its seqnum, with the
    // local window shrinking per fragment and restored on delivery.
    let sent = sent.borrow();
    let pure_acks: Vec<&Packet> = sent
        .iter()
        .filter(|p| p.flags == flags::ACK && p.data.is_empty())
        .collect();
    assert_eq!(pure_acks.len(), 3);
    let expected = [(101u32, 65_533u16), (102, 65_531), (103, 65_535)];
    for (ack, (seq, window)) in pure_acks.iter().zip(expected) {
        assert_eq!(ack.seqnum, seq);
        assert_eq!(ack.acknum, seq);
        assert_eq!(ack.window, window);
    }
}

// ---------------------------------------------------------------------------
// Scenario 6: a small remote window staggers fragment emission
// ---------------------------------------------------------------------------

#[test]
fn small_remote_window_staggers_fragments() {
    // Window fits exactly one full fragment; each ACK reopens it.
    let payload = vec![0x42u8; MAX_PAYLOAD * 2 + 100];

    let (central, sent) = FakeCentral::new(accommodating_central(MAX_PAYLOAD as u16));

    let mut driver = Driver::connect(central, &payload, &Config::default()).unwrap();
    driver.run().unwrap();

    // With a one-fragment window and instant ACKs the interleaving is
    // strictly send → ack → send: each fragment leaves exactly once, in
    // order, and the whole exchange is CONNECT + 3 fragments + DISCONNECT.
    let sent = sent.borrow();
    assert_eq!(sent.len(), 5);

    let frags: Vec<&Packet> = sent.iter().filter(|p| !p.data.is_empty()).collect();
    assert_eq!(frags.len(), 3);
    let fos: Vec<u8> = frags.iter().map(|p| p.fo).collect();
    assert_eq!(fos, [0, 1, 2]);
    assert_eq!(frags[0].data.len(), MAX_PAYLOAD);
    assert_eq!(frags[2].data.len(), 100);
    assert!(is_disconnect(sent.last().unwrap()));
}
