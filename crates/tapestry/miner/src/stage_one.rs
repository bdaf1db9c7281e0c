//! Stage-one workers: bulk nonce hashing.
//!
//! Each stage-one worker drives the engine's bulk-hash primitive in a
//! tight loop, derives a recall byte for every `(nonce, H0)` pair, and
//! dispatches the lookup to a pseudo-randomly chosen I/O worker. The
//! stage-two reply channel is picked through the router so the fetched
//! chunk lands on a stable worker per byte.

use std::sync::Arc;
use std::thread::JoinHandle;

use alloy_primitives::{Bytes, B256, U256};
use crossbeam::channel::{Receiver, Sender, TryRecvError};
use rand::Rng;
use tapestry_protocol::recall::{pick_recall_byte, WeaveTooSmall};
use tapestry_randomx::RandomxEngine;
use tracing::trace;

use crate::io_worker::{IoMessage, IoRequest};
use crate::metrics::MiningMetrics;
use crate::session::SessionId;
use crate::stage_two::StageTwoRouter;
use crate::IDLE_TICK;

/// Candidate state a hashing worker mines against, replaced wholesale on
/// every refresh.
#[derive(Debug, Clone)]
pub struct HashingState {
    pub ts: u64,
    pub diff: U256,
    pub bds: Bytes,
    pub prev_h: B256,
    pub upper_bound: u64,
    pub session: SessionId,
    pub router: StageTwoRouter,
}

/// Stage-one control message.
#[derive(Debug)]
pub enum StageOneCommand {
    UpdateState(HashingState),
    Stop,
}

struct StageOneWorker {
    index: usize,
    receiver: Receiver<StageOneCommand>,
    io: Vec<Sender<IoMessage>>,
    engine: Arc<dyn RandomxEngine>,
    metrics: Arc<MiningMetrics>,
    batch_size: usize,
    state: HashingState,
}

impl StageOneWorker {
    fn run(&mut self) {
        let mut rng = rand::thread_rng();
        loop {
            // drain control messages without blocking the hash loop
            loop {
                match self.receiver.try_recv() {
                    Ok(StageOneCommand::UpdateState(state)) => self.state = state,
                    Ok(StageOneCommand::Stop) | Err(TryRecvError::Disconnected) => {
                        trace!(target: "tapestry::mine", worker = self.index, "stage-one worker stopped");
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            if self.state.router.is_empty() || self.io.is_empty() {
                std::thread::sleep(IDLE_TICK);
                continue;
            }

            let seed_a = B256::from(rng.gen::<[u8; 32]>());
            let seed_b = B256::from(rng.gen::<[u8; 32]>());
            let batch =
                self.engine
                    .bulk_hash(&seed_a, &seed_b, &self.state.bds, self.batch_size);

            for (nonce, h0) in batch {
                let byte = match pick_recall_byte(&h0, &self.state.prev_h, self.state.upper_bound)
                {
                    Ok(byte) => byte,
                    // the controller runs the small-weave worker instead
                    Err(WeaveTooSmall) => continue,
                };
                let Some(reply) = self.state.router.route(byte) else {
                    continue;
                };
                let request = IoRequest {
                    byte,
                    h0,
                    nonce,
                    ts: self.state.ts,
                    diff: self.state.diff,
                    session: self.state.session,
                    reply: reply.clone(),
                };
                let io = &self.io[rng.gen_range(0..self.io.len())];
                // a full I/O inbox means the spindle is behind; the nonce
                // is lost effort, not queued work
                let _ = io.try_send(IoMessage::Request(request));
            }
            self.metrics.add_recall_bytes(self.batch_size as u64);
        }
    }
}

/// Start one stage-one worker; its inbox is created by the caller so the
/// controller can broadcast state updates before the thread is live.
pub(crate) fn start_stage_one_worker(
    index: usize,
    receiver: Receiver<StageOneCommand>,
    io: Vec<Sender<IoMessage>>,
    engine: Arc<dyn RandomxEngine>,
    metrics: Arc<MiningMetrics>,
    batch_size: usize,
    state: HashingState,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut worker = StageOneWorker {
            index,
            receiver,
            io,
            engine,
            metrics,
            batch_size,
            state,
        };
        worker.run();
    })
}
