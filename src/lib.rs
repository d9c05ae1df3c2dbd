//! `slow-peripheral` — the client ("peripheral") endpoint of the SLOW
//! transport protocol: a session-oriented, reliable, flow-controlled
//! datagram protocol over UDP.
//!
//! # Architecture
//!
//! ```text
//!  payload file                     persisted state (28 B)
//!       │                                   ▲  │
//!       ▼                                   │  ▼
//!  ┌──────────────────────────────────────────────────┐
//!  │                     Driver                       │
//!  │  (send phase · disconnect · 100 ms receive poll) │
//!  └───┬───────────────┬──────────────────┬───────────┘
//!      │               │                  │
//!  ┌───▼────┐     ┌────▼─────┐      ┌─────▼──────┐
//!  │Session │     │Reassembly│      │  Packet    │
//!  │ (queue,│     │ (per-fid │      │ (32-byte   │
//!  │windows)│     │ buckets) │      │ wire codec)│
//!  └────────┘     └──────────┘      └─────┬──────┘
//!                                         │ raw UDP datagrams
//!                                   ┌─────▼──────┐
//!                                   │ Transport  │
//!                                   └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise)
//! - [`session`]    — session state, fragmentation, transmit scheduling
//! - [`reassembly`] — inbound fragment collection per fragment id
//! - [`driver`]     — handshake entry points and the cooperative loop
//! - [`state`]      — the 28-byte persisted record bridging revive
//! - [`transport`]  — datagram channel abstraction + blocking UDP impl

pub mod driver;
pub mod packet;
pub mod reassembly;
pub mod session;
pub mod state;
pub mod transport;
