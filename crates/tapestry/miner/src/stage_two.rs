//! Stage-two workers: solution hashing.
//!
//! A stage-two worker receives chunks fetched by the I/O pool, computes
//! the solution hash over `H0 ‖ prevH ‖ ts ‖ chunk`, and either reports a
//! solution to the controller or folds the near-miss into the best-hash
//! register.

use std::sync::Arc;
use std::thread::JoinHandle;

use alloy_primitives::{Bytes, B256, U256};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tapestry_protocol::bds::solution_preimage;
use tapestry_protocol::constants::MINING_SOLUTION_WINDOW;
use tapestry_protocol::difficulty::passes_difficulty;
use tapestry_randomx::RandomxEngine;
use tracing::{debug, trace};

use crate::controller::{ControllerMessage, Solution};
use crate::metrics::{BestHash, MiningMetrics};
use crate::session::{SessionId, SessionTracker};
use crate::{HASH_QUEUE_DEPTH, IDLE_TICK};

/// A fetched chunk ready for the solution hash.
#[derive(Debug, Clone)]
pub struct StageTwoJob {
    pub chunk: Bytes,
    pub h0: B256,
    pub nonce: B256,
    pub ts: u64,
    pub diff: U256,
    pub session: SessionId,
}

/// Stage-two inbox message.
#[derive(Debug)]
pub enum StageTwoMessage {
    Job(StageTwoJob),
    Stop,
}

/// Chooses the stage-two worker a recall byte's chunk is hashed on.
///
/// Stage one routes through this instead of holding raw worker handles,
/// so the stage-two pool stays disjoint from the I/O partner list.
#[derive(Debug, Clone)]
pub struct StageTwoRouter {
    inboxes: Vec<Sender<StageTwoMessage>>,
}

impl StageTwoRouter {
    pub fn new(inboxes: Vec<Sender<StageTwoMessage>>) -> Self {
        Self { inboxes }
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    /// The reply channel for `recall_byte`; stable per byte so a chunk
    /// always lands on the same worker.
    pub fn route(&self, recall_byte: u64) -> Option<&Sender<StageTwoMessage>> {
        if self.inboxes.is_empty() {
            return None;
        }
        let at = (recall_byte % self.inboxes.len() as u64) as usize;
        self.inboxes.get(at)
    }
}

struct StageTwoWorker {
    index: usize,
    receiver: Receiver<StageTwoMessage>,
    controller: Sender<ControllerMessage>,
    engine: Arc<dyn RandomxEngine>,
    prev_h: B256,
    sessions: SessionTracker,
    metrics: Arc<MiningMetrics>,
    best: Arc<BestHash>,
}

impl StageTwoWorker {
    fn run(&mut self) {
        loop {
            match self.receiver.recv_timeout(IDLE_TICK) {
                Ok(StageTwoMessage::Job(job)) => self.handle(job),
                Ok(StageTwoMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                // idle tick: nothing is held across messages
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        trace!(target: "tapestry::mine", worker = self.index, "stage-two worker stopped");
    }

    fn handle(&self, job: StageTwoJob) {
        let session = self.sessions.current();
        if job.session != session.id || job.ts + MINING_SOLUTION_WINDOW < session.timestamp {
            trace!(target: "tapestry::mine", worker = self.index, ts = job.ts, "stale chunk dropped");
            return;
        }

        let preimage = solution_preimage(&job.h0, &self.prev_h, job.ts, &job.chunk);
        let solution_hash = self.engine.hash(&preimage);
        self.metrics.add_sporas(1);

        if passes_difficulty(&solution_hash, job.diff) {
            debug!(
                target: "tapestry::mine",
                worker = self.index,
                hash = %solution_hash,
                ts = job.ts,
                "solution found"
            );
            let _ = self.controller.send(ControllerMessage::Solution(Solution {
                nonce: job.nonce,
                h0: job.h0,
                ts: job.ts,
                solution_hash,
                session: job.session,
            }));
        } else {
            self.best.offer(&solution_hash);
        }
    }
}

/// Start one stage-two worker; returns its inbox and join handle.
#[allow(clippy::too_many_arguments)]
pub(crate) fn start_stage_two_worker(
    index: usize,
    controller: Sender<ControllerMessage>,
    engine: Arc<dyn RandomxEngine>,
    prev_h: B256,
    sessions: SessionTracker,
    metrics: Arc<MiningMetrics>,
    best: Arc<BestHash>,
) -> (Sender<StageTwoMessage>, JoinHandle<()>) {
    let (sender, receiver) = bounded(HASH_QUEUE_DEPTH);
    let handle = std::thread::spawn(move || {
        let mut worker = StageTwoWorker {
            index,
            receiver,
            controller,
            engine,
            prev_h,
            sessions,
            metrics,
            best,
        };
        worker.run();
    });
    (sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use tapestry_randomx::SoftwareEngine;

    fn job(session: SessionId, ts: u64, diff: U256) -> StageTwoJob {
        StageTwoJob {
            chunk: Bytes::from_static(b"chunk data"),
            h0: B256::repeat_byte(1),
            nonce: B256::repeat_byte(2),
            ts,
            diff,
            session,
        }
    }

    #[test]
    fn easy_difficulty_reports_a_solution() {
        let sessions = SessionTracker::new(1000);
        let session = sessions.current().id;
        let (controller_tx, controller_rx) = unbounded();
        let metrics = Arc::new(MiningMetrics::new());
        let engine: Arc<dyn RandomxEngine> = Arc::new(SoftwareEngine::fast());
        let prev_h = B256::repeat_byte(9);

        let (inbox, handle) = start_stage_two_worker(
            0,
            controller_tx,
            engine.clone(),
            prev_h,
            sessions,
            metrics.clone(),
            Arc::new(BestHash::new()),
        );

        inbox
            .send(StageTwoMessage::Job(job(session, 1000, U256::ZERO)))
            .unwrap();
        let message = controller_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap();
        let ControllerMessage::Solution(solution) = message else {
            panic!("expected a solution");
        };

        // the reported hash matches the canonical preimage
        let preimage =
            solution_preimage(&solution.h0, &prev_h, solution.ts, b"chunk data");
        assert_eq!(solution.solution_hash, engine.hash(&preimage));
        assert_eq!(metrics.sporas(), 1);

        inbox.send(StageTwoMessage::Stop).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn stale_sessions_and_timestamps_are_dropped() {
        let sessions = SessionTracker::new(1000);
        let live = sessions.current().id;
        let (controller_tx, controller_rx) = unbounded();
        let metrics = Arc::new(MiningMetrics::new());

        let (inbox, handle) = start_stage_two_worker(
            0,
            controller_tx,
            Arc::new(SoftwareEngine::fast()),
            B256::ZERO,
            sessions,
            metrics.clone(),
            Arc::new(BestHash::new()),
        );

        // dead session token
        inbox
            .send(StageTwoMessage::Job(job(SessionId::random(), 1000, U256::ZERO)))
            .unwrap();
        // live token but outside the staleness window
        inbox
            .send(StageTwoMessage::Job(job(
                live,
                1000 - MINING_SOLUTION_WINDOW - 1,
                U256::ZERO,
            )))
            .unwrap();
        inbox.send(StageTwoMessage::Stop).unwrap();
        handle.join().unwrap();

        assert!(controller_rx.try_recv().is_err());
        assert_eq!(metrics.sporas(), 0);
    }

    #[test]
    fn near_misses_feed_the_best_hash_register() {
        let sessions = SessionTracker::new(1000);
        let session = sessions.current().id;
        let (controller_tx, controller_rx) = unbounded();
        let best = Arc::new(BestHash::new());

        let (inbox, handle) = start_stage_two_worker(
            0,
            controller_tx,
            Arc::new(SoftwareEngine::fast()),
            B256::ZERO,
            sessions,
            Arc::new(MiningMetrics::new()),
            best.clone(),
        );

        // impossible difficulty: every hash is a near-miss
        inbox
            .send(StageTwoMessage::Job(job(session, 1000, U256::MAX)))
            .unwrap();
        inbox.send(StageTwoMessage::Stop).unwrap();
        handle.join().unwrap();

        assert!(controller_rx.try_recv().is_err());
        assert_ne!(best.current(), B256::ZERO);
    }

    #[test]
    fn router_is_stable_and_total() {
        let (a, _ra) = bounded(4);
        let (b, _rb) = bounded(4);
        let router = StageTwoRouter::new(vec![a, b]);
        assert!(!router.is_empty());
        let first = router.route(7).map(|s| s.same_channel(router.route(7).unwrap()));
        assert_eq!(first, Some(true));
        assert!(StageTwoRouter::new(Vec::new()).route(7).is_none());
    }
}
