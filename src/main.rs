//! Entry point for `slow-peripheral`.
//!
//! Parses CLI arguments and dispatches into either **connect** or **revive**
//! mode.  All actual protocol work is delegated to library modules; `main.rs`
//! owns only process setup (logging, argument parsing, file I/O) and the
//! final state save.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use slow_peripheral::driver::{Config, Driver};
use slow_peripheral::state::SessionState;
use slow_peripheral::transport::{UdpTransport, DEFAULT_HOST, DEFAULT_PORT};

/// SLOW peripheral: deliver a payload to the central, reliably, over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// File whose bytes are sent as the session payload.
    #[arg(short = 'm', long = "msg", value_name = "FILE")]
    msg: Option<PathBuf>,

    /// Revive a previously saved session from this state file.
    #[arg(short = 'r', long = "revive", value_name = "FILE")]
    revive: Option<PathBuf>,

    /// Persist session state to this file after a clean disconnect.
    #[arg(short = 's', long = "save", value_name = "FILE")]
    save: Option<PathBuf>,

    /// Retransmission timeout in milliseconds.
    #[arg(short = 't', long = "rto", value_name = "MS", default_value_t = 800)]
    rto: u64,

    /// Handshake-phase receive timeout in milliseconds.
    #[arg(short = 'T', long = "recvto", value_name = "MS", default_value_t = 1500)]
    recvto: u64,
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    // Exit 1 (not clap's default 2) on bad arguments, like every other
    // fatal condition.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let payload = match &cli.msg {
        Some(path) => fs::read(path)
            .with_context(|| format!("cannot open message file {}", path.display()))?,
        None if cli.revive.is_none() => b"Hello\n".to_vec(),
        None => Vec::new(),
    };

    let cfg = Config {
        rto: Duration::from_millis(cli.rto),
        recv_timeout: Duration::from_millis(cli.recvto),
    };

    let addr = UdpTransport::resolve(DEFAULT_HOST, DEFAULT_PORT)
        .with_context(|| format!("cannot resolve {DEFAULT_HOST}:{DEFAULT_PORT}"))?;
    let transport = UdpTransport::connect(addr).context("cannot create UDP socket")?;
    log::info!("talking to {addr}");

    let mut driver = match &cli.revive {
        Some(path) => {
            let state = SessionState::load(path)
                .with_context(|| format!("revive state invalid or missing at {}", path.display()))?;
            Driver::revive(transport, &state, &payload, &cfg)?
        }
        None => Driver::connect(transport, &payload, &cfg)?,
    };

    let final_state = driver.run()?;

    for payload in driver.deliveries() {
        println!("### PAYLOAD ({} B) ###", payload.len());
        println!("{}", String::from_utf8_lossy(payload));
    }

    if let Some(path) = &cli.save {
        final_state
            .save(path)
            .with_context(|| format!("cannot save session state to {}", path.display()))?;
        println!("[session state saved to {}]", path.display());
    }

    Ok(())
}
