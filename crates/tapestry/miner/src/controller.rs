//! The mining session controller.
//!
//! Owns the candidate refresher and the worker pools for one round:
//! builds the candidate, starts the workers, refreshes the timestamp on a
//! timer, validates claimed solutions, and seals the block. Rotating the
//! session token on exit fences every in-flight message of the round.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use alloy_primitives::{Bytes, B256};
use crossbeam::channel::{after, unbounded, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use tapestry_protocol::block::{MinedBlock, Tx};
use tapestry_protocol::poa::{BlockIndex, Poa};
use tapestry_protocol::recall::{pick_recall_byte, weave_is_too_small, WeaveTooSmall};
use tapestry_randomx::{RandomxEngine, RandomxMode};
use tapestry_storage::{TxReplayPool, WalletStore, WeaveReader};
use tracing::{debug, error, info, warn};

use crate::candidate::{CandidateRefresher, RefreshOutcome, TipBlock};
use crate::io_worker::{start_io_worker, IoMessage};
use crate::metrics::{BestHash, MiningMetrics};
use crate::session::{SessionId, SessionTracker};
use crate::small_weave::{start_small_weave_worker, SmallWeaveCommand, SmallWeaveState};
use crate::stage_one::{start_stage_one_worker, HashingState, StageOneCommand};
use crate::stage_two::{start_stage_two_worker, StageTwoMessage, StageTwoRouter};
use crate::validate::validate_solution;
use crate::{MinerConfig, ENGINE_RETRY_INTERVAL};

/// Messages the controller acts on.
#[derive(Debug)]
pub enum ControllerMessage {
    /// A claimed solution from a hashing worker.
    Solution(Solution),
    /// The pending tx set changed; rebuild the candidate.
    SetTxs(Vec<Tx>),
    /// End the round without a block.
    Stop,
}

/// A claimed solution, pending validation.
#[derive(Debug, Clone)]
pub struct Solution {
    pub nonce: B256,
    pub h0: B256,
    /// Timestamp of the candidate the solution was hashed against.
    pub ts: u64,
    pub solution_hash: B256,
    pub session: SessionId,
}

/// Everything a mining round runs against.
pub struct MinerDeps {
    pub engine: Arc<dyn RandomxEngine>,
    pub weave: WeaveReader,
    pub block_index: BlockIndex,
    pub tip: TipBlock,
    /// Weave size `SEARCH_SPACE_UPPER_BOUND_DEPTH` blocks behind the tip.
    pub search_space_upper_bound: u64,
    pub wallets: WalletStore,
    pub anchors: HashSet<B256>,
    pub recent_txs: HashSet<B256>,
    pub pending_txs: Vec<Tx>,
}

/// Delivered to the embedding node when a round succeeds.
#[derive(Debug, Clone)]
pub struct WorkComplete {
    pub indep_hash: B256,
    pub block: MinedBlock,
    pub txs: Vec<Tx>,
    pub bds: Bytes,
    pub poa: Poa,
    /// Wallets after the block's txs and mining reward; seeds the next
    /// round's wallet snapshot.
    pub wallets: WalletStore,
}

/// Handles to a running mining process.
pub struct MinerProcess {
    pub commands: Sender<ControllerMessage>,
    pub completed: Receiver<WorkComplete>,
    pub handle: JoinHandle<()>,
    pub metrics: Arc<MiningMetrics>,
    pub sessions: SessionTracker,
}

/// Start mining on top of `deps.tip`. The controller exits after sealing
/// a block or on [`ControllerMessage::Stop`].
pub fn start(config: MinerConfig, deps: MinerDeps) -> MinerProcess {
    let (commands_tx, commands_rx) = unbounded();
    let (completed_tx, completed_rx) = unbounded();
    let metrics = Arc::new(MiningMetrics::new());
    let best = Arc::new(BestHash::new());
    let sessions = SessionTracker::new(deps.tip.timestamp);

    let refresher = CandidateRefresher::new(
        deps.tip.clone(),
        config.reward_address,
        config.tags.clone(),
        deps.wallets,
        TxReplayPool::from_txs(deps.pending_txs),
        deps.anchors,
        deps.recent_txs,
    );

    let controller = SessionController {
        receiver: commands_rx,
        solution_tx: commands_tx.clone(),
        completed: completed_tx,
        config,
        engine: deps.engine,
        weave: deps.weave,
        block_index: deps.block_index,
        prev_h: deps.tip.indep_hash,
        upper_bound: deps.search_space_upper_bound,
        refresher,
        sessions: sessions.clone(),
        metrics: metrics.clone(),
        best,
        workers: None,
    };
    let handle = std::thread::spawn(move || controller.run());

    MinerProcess {
        commands: commands_tx,
        completed: completed_rx,
        handle,
        metrics,
        sessions,
    }
}

/// What woke the controller up.
enum Event {
    Command(ControllerMessage),
    Disconnected,
    RefreshDue,
}

enum WorkerSet {
    Spora {
        stage_one: Vec<(Sender<StageOneCommand>, JoinHandle<()>)>,
        io: Vec<(Sender<IoMessage>, JoinHandle<()>)>,
        stage_two: Vec<(Sender<StageTwoMessage>, JoinHandle<()>)>,
        router: StageTwoRouter,
    },
    SmallWeave {
        control: Sender<SmallWeaveCommand>,
        handle: JoinHandle<()>,
    },
}

struct SessionController {
    receiver: Receiver<ControllerMessage>,
    /// Cloned into workers so solutions land in the controller inbox.
    solution_tx: Sender<ControllerMessage>,
    completed: Sender<WorkComplete>,
    config: MinerConfig,
    engine: Arc<dyn RandomxEngine>,
    weave: WeaveReader,
    block_index: BlockIndex,
    prev_h: B256,
    upper_bound: u64,
    refresher: CandidateRefresher,
    sessions: SessionTracker,
    metrics: Arc<MiningMetrics>,
    best: Arc<BestHash>,
    workers: Option<WorkerSet>,
}

impl SessionController {
    fn run(mut self) {
        if !self.wait_for_fast_engine() {
            return;
        }

        let outcome = self.refresher.full_refresh();
        self.sessions.refresh(outcome.candidate.timestamp);
        self.spawn_workers(&outcome);
        info!(
            target: "tapestry::mine",
            session = %self.sessions.current().id,
            height = outcome.candidate.height,
            diff = %outcome.candidate.diff,
            txs = outcome.candidate.tx_ids.len(),
            "mining session started"
        );

        let mut timer = self.arm_timer();
        loop {
            // resolve the select before touching state, so the arms never
            // hold channel borrows across the handlers
            let event = select! {
                recv(self.receiver) -> message => match message {
                    Ok(message) => Event::Command(message),
                    Err(_) => Event::Disconnected,
                },
                recv(timer) -> _ => Event::RefreshDue,
            };
            match event {
                Event::Command(ControllerMessage::Solution(solution)) => {
                    if self.handle_solution(solution) {
                        return;
                    }
                }
                Event::Command(ControllerMessage::SetTxs(txs)) => {
                    self.refresher.set_pending(txs);
                    let outcome = self.refresher.full_refresh();
                    self.sessions.refresh(outcome.candidate.timestamp);
                    self.broadcast(&outcome);
                    timer = self.arm_timer();
                }
                Event::Command(ControllerMessage::Stop) => {
                    self.shutdown("stop requested");
                    return;
                }
                Event::Disconnected => {
                    self.shutdown("controller inbox disconnected");
                    return;
                }
                Event::RefreshDue => {
                    if self.workers_crashed() {
                        error!(target: "tapestry::mine", "mining worker crashed; aborting the round");
                        self.shutdown("worker crashed");
                        return;
                    }
                    let outcome = self.refresher.partial_refresh();
                    self.sessions.refresh(outcome.candidate.timestamp);
                    self.broadcast(&outcome);
                    debug!(
                        target: "tapestry::refresh",
                        ts = outcome.candidate.timestamp,
                        diff = %outcome.candidate.diff,
                        "candidate timestamp refreshed"
                    );
                    timer = self.arm_timer();
                }
            }
        }
    }

    /// Mining refuses to start without a fast-mode dataset; retry until
    /// it appears or the round is stopped.
    fn wait_for_fast_engine(&self) -> bool {
        while self.engine.mode() != RandomxMode::Fast {
            warn!(
                target: "tapestry::mine",
                retry_in = ENGINE_RETRY_INTERVAL.as_secs(),
                "hashing engine holds no fast-mode dataset; mining not started"
            );
            match self.receiver.recv_timeout(ENGINE_RETRY_INTERVAL) {
                Ok(ControllerMessage::Stop) | Err(RecvTimeoutError::Disconnected) => return false,
                Ok(_) | Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        true
    }

    fn spawn_workers(&mut self, outcome: &RefreshOutcome) {
        let session = self.sessions.current();

        if weave_is_too_small(self.upper_bound) {
            info!(
                target: "tapestry::mine",
                upper_bound = self.upper_bound,
                "weave too small for recall; running the small-weave worker"
            );
            let (control, control_rx) = unbounded();
            let state = SmallWeaveState {
                ts: outcome.candidate.timestamp,
                diff: outcome.candidate.diff,
                bds: outcome.bds.clone(),
                session: session.id,
            };
            let handle = start_small_weave_worker(
                control_rx,
                self.solution_tx.clone(),
                self.engine.clone(),
                self.prev_h,
                self.metrics.clone(),
                self.best.clone(),
                state,
            );
            self.workers = Some(WorkerSet::SmallWeave { control, handle });
            return;
        }

        let io: Vec<_> = (0..self.config.io_threads)
            .map(|index| {
                start_io_worker(
                    index,
                    self.weave.clone(),
                    self.config.lookup_data_index,
                    self.sessions.clone(),
                    self.metrics.clone(),
                )
            })
            .collect();
        let stage_two: Vec<_> = (0..self.config.stage_two_threads)
            .map(|index| {
                start_stage_two_worker(
                    index,
                    self.solution_tx.clone(),
                    self.engine.clone(),
                    self.prev_h,
                    self.sessions.clone(),
                    self.metrics.clone(),
                    self.best.clone(),
                )
            })
            .collect();
        let router = StageTwoRouter::new(stage_two.iter().map(|(tx, _)| tx.clone()).collect());
        let io_senders: Vec<_> = io.iter().map(|(tx, _)| tx.clone()).collect();

        let state = HashingState {
            ts: outcome.candidate.timestamp,
            diff: outcome.candidate.diff,
            bds: outcome.bds.clone(),
            prev_h: self.prev_h,
            upper_bound: self.upper_bound,
            session: session.id,
            router: router.clone(),
        };
        let stage_one: Vec<_> = (0..self.config.stage_one_threads)
            .map(|index| {
                let (control, control_rx) = unbounded();
                let handle = start_stage_one_worker(
                    index,
                    control_rx,
                    io_senders.clone(),
                    self.engine.clone(),
                    self.metrics.clone(),
                    self.config.batch_size,
                    state.clone(),
                );
                (control, handle)
            })
            .collect();

        self.workers = Some(WorkerSet::Spora {
            stage_one,
            io,
            stage_two,
            router,
        });
    }

    /// Push the refreshed candidate to the hashing workers. I/O and
    /// stage-two workers are stateless per message and fence through the
    /// session cell instead.
    fn broadcast(&self, outcome: &RefreshOutcome) {
        let session = self.sessions.current();
        match &self.workers {
            Some(WorkerSet::Spora {
                stage_one, router, ..
            }) => {
                let state = HashingState {
                    ts: outcome.candidate.timestamp,
                    diff: outcome.candidate.diff,
                    bds: outcome.bds.clone(),
                    prev_h: self.prev_h,
                    upper_bound: self.upper_bound,
                    session: session.id,
                    router: router.clone(),
                };
                for (control, _) in stage_one {
                    let _ = control.send(StageOneCommand::UpdateState(state.clone()));
                }
            }
            Some(WorkerSet::SmallWeave { control, .. }) => {
                let _ = control.send(SmallWeaveCommand::UpdateState(SmallWeaveState {
                    ts: outcome.candidate.timestamp,
                    diff: outcome.candidate.diff,
                    bds: outcome.bds.clone(),
                    session: session.id,
                }));
            }
            None => {}
        }
    }

    /// Next refresh fires `refresh_interval - last_finalize` from now; a
    /// finalization slower than the interval forces an immediate refresh.
    fn arm_timer(&self) -> Receiver<Instant> {
        let finalize = Duration::from_secs(self.refresher.last_finalize_secs());
        match self.config.refresh_interval.checked_sub(finalize) {
            Some(delay) if !delay.is_zero() => after(delay),
            _ => {
                let tx_ids: Vec<_> = self
                    .refresher
                    .included_txs()
                    .iter()
                    .map(|tx| tx.id)
                    .collect();
                warn!(
                    target: "tapestry::refresh",
                    finalize_secs = self.refresher.last_finalize_secs(),
                    ?tx_ids,
                    "segment finalization slower than the refresh interval"
                );
                after(Duration::ZERO)
            }
        }
    }

    fn workers_crashed(&self) -> bool {
        match &self.workers {
            Some(WorkerSet::Spora {
                stage_one,
                io,
                stage_two,
                ..
            }) => stage_one.iter().any(|(_, handle)| handle.is_finished())
                || stage_two.iter().any(|(_, handle)| handle.is_finished())
                || io.iter().any(|(_, handle)| handle.is_finished()),
            Some(WorkerSet::SmallWeave { handle, .. }) => handle.is_finished(),
            None => false,
        }
    }

    /// Returns true when the round is over and a block was delivered.
    fn handle_solution(&mut self, solution: Solution) -> bool {
        if !self.sessions.is_current(solution.session) {
            debug!(
                target: "tapestry::mine",
                session = %solution.session,
                "solution from a dead session dropped"
            );
            return false;
        }
        let Some(entry) = self.refresher.entry(solution.ts).cloned() else {
            warn!(
                target: "tapestry::mine",
                ts = solution.ts,
                "solution references an evicted candidate; dropped"
            );
            return false;
        };

        let poa = match pick_recall_byte(&solution.h0, &self.prev_h, self.upper_bound) {
            Err(WeaveTooSmall) => Poa::empty(),
            Ok(byte) => match self.weave.poa(byte, self.config.lookup_data_index) {
                Some(poa) => poa,
                None => {
                    warn!(
                        target: "tapestry::mine",
                        byte,
                        "proof of access unavailable; solution discarded"
                    );
                    return false;
                }
            },
        };

        let derived = match validate_solution(
            self.engine.as_ref(),
            &entry.bds,
            &solution.nonce,
            solution.ts,
            entry.candidate.diff,
            &self.prev_h,
            self.upper_bound,
            &poa,
            &self.block_index,
        ) {
            Ok(derived) => derived,
            Err(err) => {
                error!(
                    target: "tapestry::mine",
                    %err,
                    prev_h = %self.prev_h,
                    ts = solution.ts,
                    nonce = %solution.nonce,
                    height = entry.candidate.height,
                    upper_bound = self.upper_bound,
                    hash = %solution.solution_hash,
                    bds_len = entry.bds.len(),
                    "invalid solution discarded"
                );
                return false;
            }
        };
        if derived != solution.solution_hash {
            error!(
                target: "tapestry::mine",
                claimed = %solution.solution_hash,
                derived = %derived,
                "solution hash does not re-derive; discarded"
            );
            return false;
        }

        self.sessions.rotate(solution.ts);
        self.stop_workers();

        let block = MinedBlock::seal(
            entry.candidate,
            solution.nonce,
            solution.solution_hash,
            poa.clone(),
            &entry.bds,
        );
        info!(
            target: "tapestry::mine",
            height = block.candidate.height,
            indep_hash = %block.indep_hash,
            sporas = self.metrics.sporas(),
            kibs = self.metrics.kibs(),
            hashrate = format!("{:.2}", self.metrics.hashrate()),
            "block mined"
        );
        let work = WorkComplete {
            indep_hash: block.indep_hash,
            txs: entry.txs,
            bds: entry.bds,
            poa,
            wallets: entry.wallets,
            block,
        };
        let _ = self.completed.send(work);
        true
    }

    /// Stop order follows the data flow: stage one first so no new
    /// requests enter the pipeline, then I/O, then stage two.
    fn stop_workers(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        match workers {
            WorkerSet::Spora {
                stage_one,
                io,
                stage_two,
                router,
            } => {
                drop(router);
                for (control, handle) in stage_one {
                    let _ = control.send(StageOneCommand::Stop);
                    drop(control);
                    let _ = handle.join();
                }
                for (inbox, handle) in io {
                    let _ = inbox.try_send(IoMessage::Stop);
                    drop(inbox);
                    let _ = handle.join();
                }
                for (inbox, handle) in stage_two {
                    let _ = inbox.try_send(StageTwoMessage::Stop);
                    drop(inbox);
                    let _ = handle.join();
                }
            }
            WorkerSet::SmallWeave { control, handle } => {
                let _ = control.send(SmallWeaveCommand::Stop);
                drop(control);
                let _ = handle.join();
            }
        }
    }

    fn shutdown(&mut self, reason: &str) {
        let now = self.sessions.current().timestamp;
        self.sessions.rotate(now);
        self.stop_workers();
        info!(
            target: "tapestry::mine",
            reason,
            sporas = self.metrics.sporas(),
            kibs = self.metrics.kibs(),
            recall_bytes = self.metrics.recall_bytes_computed(),
            hashrate = format!("{:.2}", self.metrics.hashrate()),
            best_hash = %self.best.current(),
            "mining session stopped"
        );
    }
}
