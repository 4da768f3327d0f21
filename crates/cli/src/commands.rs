//! Subcommands.

use anyhow::{bail, Context};
use clap::Subcommand;
use corelib::{ChunkId, LookupResult, NodeId, NodeRole, OverlayConfig, RangeId};
use overlay::{OverlayHooks, Peer, Stabilizer, StaticBootDirectory, Superpeer};
use protocol::LocalNetwork;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective overlay configuration
    ShowConfig,

    /// Build a ring, register chunks, crash a superpeer and verify lookups
    Simulate {
        /// Number of superpeers
        #[arg(short, long, default_value = "4")]
        superpeers: usize,

        /// Number of peers
        #[arg(short, long, default_value = "8")]
        peers: usize,

        /// Chunks registered per peer
        #[arg(long, default_value = "100")]
        chunks: u64,

        /// Nameservice entries registered per peer
        #[arg(long, default_value = "4")]
        names: i32,

        /// Stabilization rounds after the crash
        #[arg(short, long, default_value = "2")]
        rounds: usize,

        /// Index of the superpeer to crash; none if unset
        #[arg(long)]
        crash: Option<usize>,
    },
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum CommandResult {
    Config(OverlayConfig),
    Simulation(SimulationReport),
}

#[derive(Serialize, Debug, Default)]
pub struct SimulationReport {
    pub superpeers: Vec<String>,
    pub peers: Vec<String>,
    pub crashed: Option<String>,
    pub lookups: usize,
    pub lookups_before_crash: usize,
    pub lookups_after_crash: usize,
    pub nameservice_entries: u64,
    pub overlay: Vec<String>,
}

impl Command {
    pub fn execute(&self, config: OverlayConfig) -> anyhow::Result<CommandResult> {
        match self {
            Command::ShowConfig => Ok(CommandResult::Config(config)),
            Command::Simulate {
                superpeers,
                peers,
                chunks,
                names,
                rounds,
                crash,
            } => {
                let params = SimulationParams {
                    superpeers: *superpeers,
                    peers: *peers,
                    chunks: *chunks,
                    names: *names,
                    rounds: *rounds,
                    crash: *crash,
                };
                simulate(config, &params).map(CommandResult::Simulation)
            }
        }
    }
}

struct SimulationParams {
    superpeers: usize,
    peers: usize,
    chunks: u64,
    names: i32,
    rounds: usize,
    crash: Option<usize>,
}

/// Ids spread evenly over the ring, offset by `shift` of a step.
fn spread_ids(count: usize, shift: u32) -> Vec<NodeId> {
    let step = 0x1_0000 / (count as u32 + 1);
    (1..=count as u32)
        .map(|i| NodeId((i * step + step * shift / 2) as u16))
        .collect()
}

fn simulate(mut config: OverlayConfig, params: &SimulationParams) -> anyhow::Result<SimulationReport> {
    if params.superpeers == 0 {
        bail!("at least one superpeer is required");
    }
    if let Some(index) = params.crash {
        if index >= params.superpeers || params.superpeers < 2 {
            bail!("cannot crash superpeer {} of {}", index, params.superpeers);
        }
    }
    config.initial_superpeers = params.superpeers;

    let network = LocalNetwork::new(config.request_timeout(), config.dispatch_threads);
    let boot = Arc::new(StaticBootDirectory::new());
    let superpeer_ids = spread_ids(params.superpeers, 0);
    let peer_ids = spread_ids(params.peers, 1);

    let mut ring: Vec<(Arc<Superpeer>, Stabilizer)> = Vec::new();
    for id in &superpeer_ids {
        boot.register(*id, NodeRole::Superpeer);
        let transport = network.register(*id)?;
        let superpeer = Superpeer::new(config.clone(), transport, boot.clone(), OverlayHooks::default())?;
        superpeer
            .join()
            .with_context(|| format!("superpeer {} failed to join", id))?;
        let stabilizer = superpeer.stabilizer();
        ring.push((superpeer, stabilizer));
    }
    run_rounds(&network, &mut ring, 2);

    let mut nodes: Vec<Arc<Peer>> = Vec::new();
    for id in &peer_ids {
        boot.register(*id, NodeRole::Peer);
        let transport = network.register(*id)?;
        let peer = Peer::new(config.clone(), transport, boot.clone(), OverlayHooks::default())?;
        peer.join().with_context(|| format!("peer {} failed to join", id))?;
        nodes.push(peer);
    }

    for (i, peer) in nodes.iter().enumerate() {
        let backups: Vec<NodeId> = peer_ids
            .iter()
            .cycle()
            .skip(i + 1)
            .take(peer_ids.len().saturating_sub(1).min(3))
            .copied()
            .collect();
        peer.init_range(peer.node_id(), RangeId::Local(1), &backups)?;
        for n in 0..params.names {
            let id = i as i32 * params.names + n;
            peer.insert_nameservice_entry(id, ChunkId::new(peer.node_id(), n as u64 + 1))?;
        }
    }

    let mut report = SimulationReport {
        superpeers: superpeer_ids.iter().map(ToString::to_string).collect(),
        peers: peer_ids.iter().map(ToString::to_string).collect(),
        lookups: nodes.len() * params.chunks as usize,
        ..SimulationReport::default()
    };
    report.lookups_before_crash = count_resolved(&nodes, params.chunks);

    if let Some(index) = params.crash {
        let victim = superpeer_ids[index];
        warn!(superpeer = %victim, "crashing superpeer");
        network.disconnect(victim);
        report.crashed = Some(victim.to_string());
        run_rounds(&network, &mut ring, params.rounds);
    }

    report.lookups_after_crash = count_resolved(&nodes, params.chunks);
    if let Some(peer) = nodes.first() {
        report.nameservice_entries = peer.get_nameservice_entry_count()?;
    }
    report.overlay = ring
        .iter()
        .filter(|(sp, _)| network.is_connected(sp.node_id()))
        .map(|(sp, _)| format!("{} {}", sp.node_id(), sp.ring_snapshot()))
        .collect();
    info!(
        resolved = report.lookups_after_crash,
        lookups = report.lookups,
        "simulation finished"
    );

    for peer in &nodes {
        peer.shutdown();
    }
    for (superpeer, _) in &ring {
        superpeer.shutdown();
    }
    network.shutdown();
    Ok(report)
}

fn run_rounds(network: &LocalNetwork, ring: &mut [(Arc<Superpeer>, Stabilizer)], rounds: usize) {
    for _ in 0..rounds {
        for (superpeer, stabilizer) in ring.iter_mut() {
            if network.is_connected(superpeer.node_id()) {
                stabilizer.run_round();
            }
        }
    }
}

/// Number of chunks whose lookup resolves to their creator.
fn count_resolved(peers: &[Arc<Peer>], chunks: u64) -> usize {
    let mut resolved = 0;
    for peer in peers {
        for lid in 1..=chunks {
            match peer.get_lookup_range(ChunkId::new(peer.node_id(), lid)) {
                Ok(LookupResult::Found { owner, .. }) if owner == peer.node_id() => resolved += 1,
                Ok(other) => warn!(peer = %peer.node_id(), lid, result = ?other, "unexpected lookup result"),
                Err(e) => warn!(peer = %peer.node_id(), lid, error = %e, "lookup failed"),
            }
        }
    }
    resolved
}
