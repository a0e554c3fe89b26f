//! BFT messaging demo node
//!
//! Runs a set of in-process validators connected by an in-memory lossy
//! network. Each validator arms its round timer, gossips what it hears with
//! duplicate suppression, and re-announces round changes on timeout, so the
//! liveness behavior of the messaging layer is observable under message loss.

use anyhow::Result;
use bft_consensus::{
    Block, ConsensusConfig, ConsensusMessage, Ed25519Signer, MessageFactory, MessageTransmitter,
    NetworkMulticaster, NodeSigner, PeerNetwork, RoundIdentifier, RoundTimer, TokioScheduler,
    UniqueMessageMulticaster, ValidatorId, ValidatorMulticaster,
};
use clap::Parser;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::SimulationConfig;

/// In-process BFT validator network demo
#[derive(Parser, Debug)]
#[command(name = "bft-node")]
#[command(about = "BFT message dissemination demo over a lossy in-memory network", long_about = None)]
struct Args {
    /// Number of in-process validators
    #[arg(long, default_value = "4")]
    validators: usize,

    /// Round zero timeout in milliseconds
    #[arg(long, default_value = "1000")]
    base_timeout_ms: u64,

    /// Round-change re-announcement interval in milliseconds
    #[arg(long, default_value = "5000")]
    rebroadcast_ms: u64,

    /// Gossip duplicate-suppression history size
    #[arg(long, default_value = "1000")]
    gossip_history: usize,

    /// Fraction of dispatches dropped to simulate loss
    #[arg(long, default_value = "0.2")]
    drop_rate: f64,

    /// Seconds to run before shutting down
    #[arg(long, default_value = "20")]
    run_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            validators: self.validators.max(2),
            base_timeout_ms: self.base_timeout_ms,
            rebroadcast_ms: self.rebroadcast_ms,
            gossip_history_limit: self.gossip_history,
            drop_rate: self.drop_rate.clamp(0.0, 0.9),
            run_secs: self.run_secs,
        }
    }
}

/// Shared delivery counters for the whole network
#[derive(Default)]
struct NetworkStats {
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

/// In-memory transport that loses a configurable fraction of dispatches
struct LossyNetwork {
    local_id: ValidatorId,
    mailboxes: HashMap<ValidatorId, mpsc::UnboundedSender<(ValidatorId, Vec<u8>)>>,
    drop_rate: f64,
    stats: Arc<NetworkStats>,
}

impl PeerNetwork for LossyNetwork {
    fn dispatch(&self, peers: &[ValidatorId], bytes: &[u8]) {
        let mut rng = rand::thread_rng();
        for peer in peers {
            if rng.gen::<f64>() < self.drop_rate {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if let Some(mailbox) = self.mailboxes.get(peer) {
                let _ = mailbox.send((self.local_id, bytes.to_vec()));
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn proposer_for(validators: &[ValidatorId], round: RoundIdentifier) -> ValidatorId {
    let index = (round.sequence_number + round.round_number as u64) % validators.len() as u64;
    validators[index as usize]
}

/// One validator's event loop
///
/// The external round-state machine is stood in for by the simplest possible
/// reactions: the round's proposer proposes on entry and follows with its
/// commit, every received proposal is answered with a prepare, and a timeout
/// advances the round with a round change.
async fn run_node(
    signer: Arc<Ed25519Signer>,
    validators: Vec<ValidatorId>,
    network: Arc<LossyNetwork>,
    mut inbox: mpsc::UnboundedReceiver<(ValidatorId, Vec<u8>)>,
    config: ConsensusConfig,
) {
    let id = signer.id();
    let multicaster: Arc<dyn ValidatorMulticaster> = Arc::new(NetworkMulticaster::new(
        network,
        validators.clone(),
        id,
    ));
    let relay = UniqueMessageMulticaster::new(multicaster.clone(), config.gossip_history_limit);
    let transmitter = MessageTransmitter::new(
        MessageFactory::new(signer.clone()),
        multicaster,
        Arc::new(TokioScheduler),
        config.round_change_rebroadcast,
    );
    let (timer, mut expiry_rx) = RoundTimer::new(&config);

    let mut round = RoundIdentifier::new(1, 0);
    timer.start_timer(round);
    if proposer_for(&validators, round) == id {
        propose(&signer, &transmitter, round);
    }

    loop {
        tokio::select! {
            Some(expiry) = expiry_rx.recv() => {
                tracing::info!("[{}] round {} timed out, announcing round change", id, expiry.round);
                round = expiry.round.next_round();
                timer.start_timer(round);
                transmitter.send_round_change(round, None, &timer);
                if proposer_for(&validators, round) == id {
                    propose(&signer, &transmitter, round);
                }
            }
            Some((from, bytes)) = inbox.recv() => {
                match ConsensusMessage::from_bytes(&bytes) {
                    Ok(message) => {
                        if let ConsensusMessage::Proposal { signed, .. } = &message {
                            if signed.payload.round == round {
                                transmitter.send_prepare(round, signed.payload.block.digest());
                            }
                        }
                        relay.send_except(&message, &[from, message.author()]);
                    }
                    Err(e) => {
                        tracing::warn!("[{}] discarding malformed message from {}: {}", id, from, e);
                    }
                }
            }
            else => break,
        }
    }
}

fn propose(signer: &Arc<Ed25519Signer>, transmitter: &MessageTransmitter, round: RoundIdentifier) {
    let block = Block {
        number: round.sequence_number,
        parent: Default::default(),
        payload: round.to_string().into_bytes(),
    };
    let digest = block.digest();
    tracing::info!("[{}] proposing block {} for round {}", signer.id(), digest, round);
    transmitter.send_proposal(round, block, Vec::new(), Vec::new());
    match signer.sign(&digest.0) {
        Ok(seal) => transmitter.send_commit(round, digest, seal),
        Err(e) => tracing::warn!("[{}] commit seal unavailable: {}", signer.id(), e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sim = args.simulation_config();
    let consensus_config = ConsensusConfig {
        gossip_history_limit: sim.gossip_history_limit,
        round_change_rebroadcast: Duration::from_millis(sim.rebroadcast_ms),
        base_round_timeout: Duration::from_millis(sim.base_timeout_ms),
        ..Default::default()
    };

    tracing::info!("Starting BFT messaging demo");
    tracing::info!("  Validators: {}", sim.validators);
    tracing::info!("  Base round timeout: {}ms", sim.base_timeout_ms);
    tracing::info!("  Round-change re-announcement: {}ms", sim.rebroadcast_ms);
    tracing::info!("  Simulated drop rate: {:.0}%", sim.drop_rate * 100.0);

    let signers: Vec<Arc<Ed25519Signer>> = (0..sim.validators)
        .map(|_| Arc::new(Ed25519Signer::random()))
        .collect();
    let validators: Vec<ValidatorId> = signers.iter().map(|s| s.id()).collect();

    let mut senders = HashMap::new();
    let mut receivers = Vec::new();
    for id in &validators {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.insert(*id, tx);
        receivers.push(rx);
    }

    let stats = Arc::new(NetworkStats::default());
    let mut nodes = Vec::new();
    for (signer, inbox) in signers.into_iter().zip(receivers) {
        let network = Arc::new(LossyNetwork {
            local_id: signer.id(),
            mailboxes: senders.clone(),
            drop_rate: sim.drop_rate,
            stats: stats.clone(),
        });
        nodes.push(tokio::spawn(run_node(
            signer,
            validators.clone(),
            network,
            inbox,
            consensus_config.clone(),
        )));
    }

    tracing::info!("{} validators running. Press Ctrl+C to stop.", sim.validators);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(sim.run_secs)) => {
            tracing::info!("Run window elapsed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
    }

    for node in &nodes {
        node.abort();
    }

    tracing::info!(
        "Network totals: {} dispatched, {} dropped",
        stats.dispatched.load(Ordering::Relaxed),
        stats.dropped.load(Ordering::Relaxed)
    );

    Ok(())
}
