//! I/O workers: chunk lookup for recall bytes.
//!
//! An I/O worker owns a handle to the chunk store. Stage one sends it
//! `(recall byte, H0, nonce)` requests; on a hit the chunk is forwarded to
//! the stage-two worker named in the request, on a miss the nonce is
//! dropped as lost effort.

use std::thread::JoinHandle;

use alloy_primitives::{B256, U256};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use tapestry_protocol::constants::MINING_SOLUTION_WINDOW;
use tapestry_storage::WeaveReader;
use tracing::trace;

use crate::metrics::MiningMetrics;
use crate::session::{SessionId, SessionTracker};
use crate::stage_two::{StageTwoJob, StageTwoMessage};
use crate::{IDLE_TICK, IO_QUEUE_DEPTH};

/// Chunk fetch request from stage one.
#[derive(Debug)]
pub struct IoRequest {
    /// Recall byte offset in the weave.
    pub byte: u64,
    pub h0: B256,
    pub nonce: B256,
    pub ts: u64,
    pub diff: U256,
    pub session: SessionId,
    /// Stage-two worker the fetched chunk is hashed on.
    pub reply: Sender<StageTwoMessage>,
}

/// I/O worker inbox message.
#[derive(Debug)]
pub enum IoMessage {
    Request(IoRequest),
    Stop,
}

struct IoWorker {
    index: usize,
    receiver: Receiver<IoMessage>,
    weave: WeaveReader,
    lookup_data_index: bool,
    sessions: SessionTracker,
    metrics: Arc<MiningMetrics>,
}

impl IoWorker {
    fn run(&mut self) {
        loop {
            match self.receiver.recv_timeout(IDLE_TICK) {
                Ok(IoMessage::Request(request)) => self.handle(request),
                Ok(IoMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                // idle tick: stale state drains with the queue itself
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        // store handles are released with the reader
        trace!(target: "tapestry::io", worker = self.index, "io worker stopped");
    }

    fn handle(&self, request: IoRequest) {
        let session = self.sessions.current();
        if request.session != session.id
            || request.ts + MINING_SOLUTION_WINDOW < session.timestamp
        {
            trace!(target: "tapestry::io", worker = self.index, ts = request.ts, "stale request dropped");
            return;
        }

        let Some(chunk) = self.weave.chunk(request.byte, self.lookup_data_index) else {
            trace!(target: "tapestry::io", byte = request.byte, "chunk miss");
            return;
        };
        self.metrics.add_kibs(chunk.len() as u64 / 1024);

        let job = StageTwoJob {
            chunk,
            h0: request.h0,
            nonce: request.nonce,
            ts: request.ts,
            diff: request.diff,
            session: request.session,
        };
        // a full stage-two inbox means the pipeline is saturated; the
        // nonce is cheaper to drop than to queue
        let _ = request.reply.try_send(StageTwoMessage::Job(job));
    }
}

/// Start one I/O worker; returns its inbox and join handle.
pub(crate) fn start_io_worker(
    index: usize,
    weave: WeaveReader,
    lookup_data_index: bool,
    sessions: SessionTracker,
    metrics: Arc<MiningMetrics>,
) -> (Sender<IoMessage>, JoinHandle<()>) {
    let (sender, receiver) = bounded(IO_QUEUE_DEPTH);
    let handle = std::thread::spawn(move || {
        let mut worker = IoWorker {
            index,
            receiver,
            weave,
            lookup_data_index,
            sessions,
            metrics,
        };
        worker.run();
    });
    (sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::time::Duration;
    use tapestry_storage::MemoryChunkStore;

    fn seeded_reader(bytes: usize) -> WeaveReader {
        let mut store = MemoryChunkStore::new();
        store.append(&vec![0x5a; bytes]);
        WeaveReader::new(Arc::new(store))
    }

    fn request(byte: u64, session: SessionId, ts: u64, reply: Sender<StageTwoMessage>) -> IoRequest {
        IoRequest {
            byte,
            h0: B256::repeat_byte(1),
            nonce: B256::repeat_byte(2),
            ts,
            diff: U256::ZERO,
            session,
            reply,
        }
    }

    #[test]
    fn hits_forward_the_chunk_to_stage_two() {
        let sessions = SessionTracker::new(500);
        let session = sessions.current().id;
        let metrics = Arc::new(MiningMetrics::new());
        let (reply_tx, reply_rx) = unbounded();

        let (inbox, handle) =
            start_io_worker(0, seeded_reader(4096), false, sessions, metrics.clone());
        inbox
            .send(IoMessage::Request(request(100, session, 500, reply_tx)))
            .unwrap();

        let StageTwoMessage::Job(job) = reply_rx.recv_timeout(Duration::from_secs(2)).unwrap()
        else {
            panic!("expected a job");
        };
        assert_eq!(job.chunk.len(), 4096);
        assert_eq!(job.session, session);
        assert_eq!(metrics.kibs(), 4);

        inbox.send(IoMessage::Stop).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn misses_and_stale_requests_are_dropped() {
        let sessions = SessionTracker::new(500);
        let session = sessions.current().id;
        let metrics = Arc::new(MiningMetrics::new());
        let (reply_tx, reply_rx) = unbounded();

        let (inbox, handle) =
            start_io_worker(0, seeded_reader(4096), false, sessions, metrics.clone());

        // beyond the weave
        inbox
            .send(IoMessage::Request(request(1 << 40, session, 500, reply_tx.clone())))
            .unwrap();
        // dead session
        inbox
            .send(IoMessage::Request(request(
                0,
                SessionId::random(),
                500,
                reply_tx.clone(),
            )))
            .unwrap();
        // too old for the window
        inbox
            .send(IoMessage::Request(request(
                0,
                session,
                500 - MINING_SOLUTION_WINDOW - 1,
                reply_tx,
            )))
            .unwrap();

        inbox.send(IoMessage::Stop).unwrap();
        handle.join().unwrap();
        assert!(reply_rx.try_recv().is_err());
        assert_eq!(metrics.kibs(), 0);
    }

    #[test]
    fn secondary_index_is_only_consulted_when_configured() {
        let mut secondary = MemoryChunkStore::new();
        secondary.append(&[1u8; 1024]);
        let empty_primary = Arc::new(MemoryChunkStore::new());
        let reader =
            WeaveReader::new(empty_primary).with_data_index(Arc::new(secondary));

        let sessions = SessionTracker::new(500);
        let session = sessions.current().id;
        let (reply_tx, reply_rx) = unbounded();

        let (inbox, handle) = start_io_worker(
            0,
            reader,
            true,
            sessions,
            Arc::new(MiningMetrics::new()),
        );
        inbox
            .send(IoMessage::Request(request(0, session, 500, reply_tx)))
            .unwrap();
        assert!(reply_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        inbox.send(IoMessage::Stop).unwrap();
        handle.join().unwrap();
    }
}
