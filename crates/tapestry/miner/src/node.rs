//! Node-integrated miner facade.
//!
//! Bridges the thread-based mining controller into an async node: commands
//! flow through a tokio channel and are forwarded into the controller
//! thread, completed work flows out on a tokio channel the node's block
//! importer can await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tapestry_protocol::block::Tx;
use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::{start, ControllerMessage, MinerDeps, WorkComplete};
use crate::{MinerConfig, MiningError};

/// Handle to control a running miner.
#[derive(Debug, Clone)]
pub struct MinerHandle {
    commands: mpsc::Sender<ControllerMessage>,
    running: Arc<AtomicBool>,
}

impl MinerHandle {
    /// Whether the mining process is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Replace the pending tx set; the controller rebuilds the candidate.
    pub async fn set_txs(&self, txs: Vec<Tx>) -> Result<(), MiningError> {
        self.commands
            .send(ControllerMessage::SetTxs(txs))
            .await
            .map_err(|_| MiningError::ControllerGone)
    }

    /// End the round without a block.
    pub async fn stop(&self) -> Result<(), MiningError> {
        self.commands
            .send(ControllerMessage::Stop)
            .await
            .map_err(|_| MiningError::ControllerGone)
    }
}

/// Spawn the miner, bridging both directions onto tokio channels.
///
/// Must be called from within a tokio runtime; the forwarding tasks end
/// when the controller exits or the handle and receiver are dropped.
pub fn spawn_miner(
    config: MinerConfig,
    deps: MinerDeps,
) -> (MinerHandle, mpsc::Receiver<WorkComplete>) {
    let process = start(config, deps);
    let (command_tx, mut command_rx) = mpsc::channel::<ControllerMessage>(16);
    let (work_tx, work_rx) = mpsc::channel(4);
    let running = Arc::new(AtomicBool::new(true));

    let handle = MinerHandle {
        commands: command_tx,
        running: running.clone(),
    };

    // commands: tokio channel in, controller inbox out
    let controller_commands = process.commands.clone();
    tokio::spawn(async move {
        while let Some(message) = command_rx.recv().await {
            // the controller inbox is unbounded; this never blocks
            if controller_commands.send(message).is_err() {
                break;
            }
        }
        debug!(target: "tapestry::mine", "miner command task finished");
    });

    // completed work: controller channel in, tokio channel out
    let completed = process.completed.clone();
    tokio::task::spawn_blocking(move || {
        while let Ok(work) = completed.recv() {
            if work_tx.blocking_send(work).is_err() {
                break;
            }
        }
        // the controller dropped its sender: the round is over
        running.store(false, Ordering::SeqCst);
        debug!(target: "tapestry::mine", "miner forwarding task finished");
    });

    (handle, work_rx)
}
