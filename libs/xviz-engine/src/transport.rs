use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, oneshot, watch};
use tokio::task::JoinHandle;

use xviz_api::{BlockId, DecodeError, ParserConfig, Record, TransferManifest};

use crate::decoder::EnvelopeDecoder;
use crate::extractor::extract;
use crate::normalizer::Normalizer;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one worker. Strictly forward; no state is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Decoding,
    Normalizing,
    Extracting,
    Delivering,
    Failed,
    Terminated,
}

impl WorkerState {
    pub fn can_advance_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Idle, Decoding)
            | (Decoding, Normalizing)
            | (Normalizing, Extracting)
            | (Extracting, Delivering)
            | (Delivering, Terminated)
            | (Failed, Terminated) => true,
            (Failed | Terminated, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Terminated
    }
}

/// Successful outcome of one worker: the records plus the blocks whose
/// ownership moved with them.
#[derive(Debug)]
pub struct Delivery {
    pub records: Vec<Record>,
    pub manifest: TransferManifest,
}

impl Delivery {
    /// Check that the manifest covers exactly the blocks reachable from
    /// `records` and that nothing outside the delivery still holds them.
    ///
    /// A block referenced `refs` times inside the delivery must have exactly
    /// `refs` live handles; any extra handle means the sender kept a copy.
    pub fn seal(records: Vec<Record>, manifest: TransferManifest) -> Result<Self, DecodeError> {
        let mut reachable: HashMap<BlockId, usize> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            let Some(cloud) = &record.point_cloud else {
                continue;
            };
            for (field, block) in cloud.blocks() {
                let id = block.id();
                let entry = manifest.get(id).ok_or_else(|| {
                    DecodeError::transfer(format!(
                        "record {index} {field}: block {id} is not listed in the manifest"
                    ))
                })?;
                if block.holders() != entry.refs {
                    return Err(DecodeError::transfer(format!(
                        "record {index} {field}: block {id} has {} holders but {} inside the delivery",
                        block.holders(),
                        entry.refs
                    )));
                }
                *reachable.entry(id).or_default() += 1;
            }
        }

        for entry in manifest.entries() {
            let seen = reachable.get(&entry.id).copied().unwrap_or(0);
            if seen != entry.refs {
                return Err(DecodeError::transfer(format!(
                    "block {} listed with {} refs, {seen} reachable",
                    entry.id, entry.refs
                )));
            }
        }

        Ok(Self { records, manifest })
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// One decode-and-deliver cycle
// ---------------------------------------------------------------------------

/// Publishes state changes of one worker.
struct StateTracker {
    worker: u64,
    tx: watch::Sender<WorkerState>,
}

impl StateTracker {
    fn advance(&self, next: WorkerState) {
        self.tx.send_modify(|state| {
            debug_assert!(
                state.can_advance_to(next),
                "worker {}: illegal transition {state:?} -> {next:?}",
                self.worker
            );
            tracing::trace!(worker = self.worker, from = ?*state, to = ?next, "worker state");
            *state = next;
        });
    }

    fn current(&self) -> WorkerState {
        *self.tx.borrow()
    }
}

/// Body of one worker, run on the blocking pool.
type Process = fn(&Arc<ParserConfig>, &[u8], &StateTracker) -> Result<Delivery, DecodeError>;

/// Decode → normalize → extract → seal, on the calling thread.
fn process(
    config: &Arc<ParserConfig>,
    bytes: &[u8],
    tracker: &StateTracker,
) -> Result<Delivery, DecodeError> {
    tracker.advance(WorkerState::Decoding);
    let envelope = EnvelopeDecoder::new(config).decode(bytes)?;

    tracker.advance(WorkerState::Normalizing);
    let records = Normalizer::new(config.clone()).normalize(&envelope)?;
    drop(envelope);

    tracker.advance(WorkerState::Extracting);
    let (records, manifest) = extract(records);

    tracker.advance(WorkerState::Delivering);
    Delivery::seal(records, manifest)
}

async fn run_worker(
    config: Arc<ParserConfig>,
    inbound: oneshot::Receiver<Vec<u8>>,
    outbound: oneshot::Sender<Result<Delivery, DecodeError>>,
    tracker: Arc<StateTracker>,
    permit: Option<OwnedSemaphorePermit>,
    process: Process,
) {
    let worker = tracker.worker;

    let result = match inbound.await {
        Ok(bytes) => {
            let size = bytes.len();
            let task_tracker = tracker.clone();
            let decoded = tokio::task::spawn_blocking(move || {
                process(&config, &bytes, &task_tracker)
            })
            .await;
            match decoded {
                Ok(result) => {
                    if let Ok(delivery) = &result {
                        tracing::debug!(
                            worker,
                            bytes = size,
                            records = delivery.records.len(),
                            blocks = delivery.manifest.len(),
                            moved_bytes = delivery.manifest.byte_len(),
                            "decoded message"
                        );
                    }
                    result
                }
                Err(e) => Err(DecodeError::transfer(format!("decode task aborted: {e}"))),
            }
        }
        Err(_) => Err(DecodeError::transfer("inbound channel closed before a message arrived")),
    };

    if let Err(e) = &result {
        tracing::warn!(worker, state = ?tracker.current(), error = %e, "worker failed");
        tracker.advance(WorkerState::Failed);
    }

    // The blocks move with the delivery; nothing stays behind in this task.
    if outbound.send(result).is_err() {
        tracing::warn!(worker, "receiver dropped before delivery");
    }

    tracker.advance(WorkerState::Terminated);
    drop(permit);
}

// ---------------------------------------------------------------------------
// Caller-side handles
// ---------------------------------------------------------------------------

/// A freshly spawned worker waiting for its single message.
///
/// `post` consumes the handle: one message per worker.
pub struct WorkerHandle {
    id: u64,
    inbound: oneshot::Sender<Vec<u8>>,
    pending: PendingDelivery,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish()
    }
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.pending.state()
    }

    /// Hand the payload to the worker. The bytes are moved, not copied.
    pub fn post(self, payload: Vec<u8>) -> PendingDelivery {
        if self.inbound.send(payload).is_err() {
            tracing::warn!(worker = self.id, "worker gone before the message was posted");
        }
        self.pending
    }

    /// Give up without posting. The worker reports a `TransferFailure`.
    pub fn abandon(self) -> PendingDelivery {
        drop(self.inbound);
        self.pending
    }
}

/// Outbound half: resolves to the delivery or the failure of one worker.
pub struct PendingDelivery {
    id: u64,
    outbound: oneshot::Receiver<Result<Delivery, DecodeError>>,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<()>,
}

impl std::fmt::Debug for PendingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDelivery")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl PendingDelivery {
    pub fn worker_id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Wait for the outcome. Returns once the worker task has completed.
    pub async fn wait(self) -> Result<Delivery, DecodeError> {
        let result = self.outbound.await.unwrap_or_else(|_| {
            Err(DecodeError::transfer("worker terminated without delivering"))
        });
        if let Err(e) = self.join.await {
            tracing::warn!(worker = self.id, error = %e, "worker task did not complete cleanly");
        }
        result
    }
}

/// Spawn a one-shot worker on the current tokio runtime.
///
/// The worker owns its copy of the configuration handle and ends once it has
/// delivered (or failed to deliver) a single message.
pub fn spawn_worker(config: Arc<ParserConfig>) -> WorkerHandle {
    spawn_with_permit(config, None)
}

pub(crate) fn spawn_with_permit(
    config: Arc<ParserConfig>,
    permit: Option<OwnedSemaphorePermit>,
) -> WorkerHandle {
    spawn_running(config, permit, process)
}

fn spawn_running(
    config: Arc<ParserConfig>,
    permit: Option<OwnedSemaphorePermit>,
    process: Process,
) -> WorkerHandle {
    let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
    let (inbound_tx, inbound_rx) = oneshot::channel();
    let (outbound_tx, outbound_rx) = oneshot::channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
    let tracker = Arc::new(StateTracker { worker: id, tx: state_tx });

    let join = tokio::spawn(run_worker(config, inbound_rx, outbound_tx, tracker, permit, process));
    tracing::trace!(worker = id, "spawned worker");

    WorkerHandle {
        id,
        inbound: inbound_tx,
        pending: PendingDelivery { id, outbound: outbound_rx, state: state_rx, join },
    }
}

/// Decode one message on a fresh worker and wait for the outcome.
pub async fn decode_off_thread(
    config: Arc<ParserConfig>,
    payload: Vec<u8>,
) -> Result<Delivery, DecodeError> {
    spawn_worker(config).post(payload).wait().await
}
