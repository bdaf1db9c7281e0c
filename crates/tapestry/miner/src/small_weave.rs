//! Small-weave worker.
//!
//! When the weave is too small to carve a search subspace out of, recall
//! is impossible and mining degenerates to hashing over the candidate
//! alone: a random nonce produces `H0`, and the solution preimage carries
//! an empty chunk. Runs single-threaded without an idle tick.

use std::sync::Arc;
use std::thread::JoinHandle;

use alloy_primitives::{Bytes, B256, U256};
use crossbeam::channel::{Receiver, TryRecvError, Sender};
use rand::Rng;
use tapestry_protocol::bds::solution_preimage;
use tapestry_protocol::difficulty::passes_difficulty;
use tapestry_randomx::RandomxEngine;
use tracing::{debug, trace};

use crate::controller::{ControllerMessage, Solution};
use crate::metrics::{BestHash, MiningMetrics};
use crate::session::SessionId;

/// Candidate state for the small-weave path.
#[derive(Debug, Clone)]
pub struct SmallWeaveState {
    pub ts: u64,
    pub diff: U256,
    pub bds: Bytes,
    pub session: SessionId,
}

/// Small-weave control message.
#[derive(Debug)]
pub enum SmallWeaveCommand {
    UpdateState(SmallWeaveState),
    Stop,
}

struct SmallWeaveWorker {
    receiver: Receiver<SmallWeaveCommand>,
    controller: Sender<ControllerMessage>,
    engine: Arc<dyn RandomxEngine>,
    prev_h: B256,
    metrics: Arc<MiningMetrics>,
    best: Arc<BestHash>,
    state: SmallWeaveState,
}

impl SmallWeaveWorker {
    fn run(&mut self) {
        let mut rng = rand::thread_rng();
        loop {
            loop {
                match self.receiver.try_recv() {
                    Ok(SmallWeaveCommand::UpdateState(state)) => self.state = state,
                    Ok(SmallWeaveCommand::Stop) | Err(TryRecvError::Disconnected) => {
                        trace!(target: "tapestry::mine", "small-weave worker stopped");
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            let nonce = B256::from(rng.gen::<[u8; 32]>());
            let mut h0_preimage = Vec::with_capacity(32 + self.state.bds.len());
            h0_preimage.extend_from_slice(nonce.as_slice());
            h0_preimage.extend_from_slice(&self.state.bds);
            let h0 = self.engine.hash(&h0_preimage);

            let preimage = solution_preimage(&h0, &self.prev_h, self.state.ts, &[]);
            let solution_hash = self.engine.hash(&preimage);
            self.metrics.add_sporas(1);

            if passes_difficulty(&solution_hash, self.state.diff) {
                debug!(
                    target: "tapestry::mine",
                    hash = %solution_hash,
                    ts = self.state.ts,
                    "small-weave solution found"
                );
                let _ = self.controller.send(ControllerMessage::Solution(Solution {
                    nonce,
                    h0,
                    ts: self.state.ts,
                    solution_hash,
                    session: self.state.session,
                }));
            } else {
                self.best.offer(&solution_hash);
            }
        }
    }
}

/// Start the small-weave worker; the caller owns the inbox.
pub(crate) fn start_small_weave_worker(
    receiver: Receiver<SmallWeaveCommand>,
    controller: Sender<ControllerMessage>,
    engine: Arc<dyn RandomxEngine>,
    prev_h: B256,
    metrics: Arc<MiningMetrics>,
    best: Arc<BestHash>,
    state: SmallWeaveState,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut worker = SmallWeaveWorker {
            receiver,
            controller,
            engine,
            prev_h,
            metrics,
            best,
            state,
        };
        worker.run();
    })
}
