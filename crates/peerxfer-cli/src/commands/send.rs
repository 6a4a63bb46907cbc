//! Send command implementation.
//!
//! Offers each file from one session to a second one over the loopback link,
//! accepts every offer on the receiving side and pumps the link until it goes
//! quiet.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use peerxfer_core::command::Command;
use peerxfer_core::config::Config;
use peerxfer_core::session::TransferSession;
use peerxfer_core::transfer::format_size;
use peerxfer_core::transport::loopback::LOOPBACK_PEER;
use peerxfer_core::transport::{Loopback, LoopbackEndpoint, Side};

use super::SendArgs;

type Session = TransferSession<LoopbackEndpoint>;

/// Both ends of a finished run.
struct Outcome {
    sender: Session,
    receiver: Session,
    elapsed: Duration,
}

/// Run the send command.
pub fn run(args: SendArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(output) = args.output {
        config.transfer.download_dir = Some(output);
    }
    if let Some(chunk_size) = args.chunk_size {
        config.loopback.chunk_size = chunk_size as usize;
    }

    let outcome = transfer(&args.files, &config)?;

    if args.json {
        let output = serde_json::json!({
            "sent": outcome.sender.snapshot(),
            "received": outcome.receiver.snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        display_summary(&outcome);
    }

    let failed = incomplete(&outcome.receiver);
    if failed > 0 {
        bail!("{} of {} transfers did not complete", failed, args.files.len());
    }

    Ok(())
}

fn transfer(files: &[PathBuf], config: &Config) -> Result<Outcome> {
    let (link, a, b) = Loopback::pair(config.loopback.chunk_size);
    let mut sender = TransferSession::new(a, config.clone());
    let mut receiver = TransferSession::new(b, config.clone());
    sender.set_peer_name(LOOPBACK_PEER, "receiver");
    receiver.set_peer_name(LOOPBACK_PEER, "sender");

    for path in files {
        sender
            .send_file(LOOPBACK_PEER, path)
            .with_context(|| format!("Failed to offer '{}'", path.display()))?;
    }
    pump(&link, &mut sender, &mut receiver)?;

    for index in 0..receiver.registry().len() {
        let command = Command::parse(&format!("accept {index}"))?;
        receiver
            .execute(command)
            .with_context(|| format!("Failed to {command}"))?;
    }

    let start = Instant::now();
    let events = pump(&link, &mut sender, &mut receiver)?;
    let elapsed = start.elapsed();
    tracing::debug!("Delivered {} link events in {:?}", events, elapsed);

    Ok(Outcome {
        sender,
        receiver,
        elapsed,
    })
}

/// Number of transfers that did not arrive in full.
fn incomplete(session: &Session) -> usize {
    session
        .registry()
        .iter()
        .filter(|r| !r.is_complete())
        .count()
}

/// Deliver link events until nothing is left to do.
///
/// Per-chunk failures are left to the link, which asks again.
fn pump(link: &Loopback, sender: &mut Session, receiver: &mut Session) -> Result<usize> {
    let mut delivered = 0;
    while let Some((side, event)) = link.next_event() {
        let result = match side {
            Side::A => event.dispatch(sender),
            Side::B => event.dispatch(receiver),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => tracing::warn!("Chunk failed, retrying: {}", e),
            Err(e) => return Err(e.into()),
        }
        delivered += 1;
    }
    Ok(delivered)
}

fn display_summary(outcome: &Outcome) {
    println!();
    println!("peerxfer v{}", peerxfer_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();

    for line in outcome.receiver.progress_lines() {
        println!("  {line}");
    }

    let done: Vec<_> = outcome
        .receiver
        .registry()
        .iter()
        .filter(|r| r.is_complete())
        .collect();
    let total: u64 = done.iter().map(|r| r.position()).sum();

    println!();
    println!(
        "  Received {} files ({}) in {:.2}s",
        done.len(),
        format_size(total),
        outcome.elapsed.as_secs_f64()
    );
    if let Some(first) = done.first() {
        if let Some(dir) = first.local_path().parent() {
            println!("  Saved to: {}", dir.display());
        }
    }
    println!();
}
