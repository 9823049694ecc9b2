use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::task::{DeadLetterTask, Lease, TaskEnvelope, TaskMessage};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: seq={0}")]
    TaskNotFound(u64),

    #[error("Task seq={0} is not in flight")]
    NotInFlight(u64),

    #[error("Task seq={seq} is leased by {holder}, not {worker_id}")]
    LeaseMismatch {
        seq: u64,
        holder: String,
        worker_id: String,
    },

    #[error("Invalid queue name: {0:?}")]
    InvalidQueue(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Worker {worker_id} already holds {inflight} task(s), prefetch is {prefetch}")]
    PrefetchExceeded {
        worker_id: String,
        inflight: usize,
        prefetch: usize,
    },

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

const META_NEXT_SEQ: &[u8] = b"next_seq";

/// FjallQueue persists named task queues, leases and the DLQ
///
/// Architecture:
/// - `tasks` partition: u64 (big-endian) → TaskMessage (JSON)
/// - `pending` partition: q:{queue}:{seq:020} → empty (FIFO per queue)
/// - `inflight` partition: u64 (big-endian) → Lease (JSON)
/// - `dlq` partition: u64 (big-endian) → DeadLetterTask (JSON)
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
///
/// A task lives in `tasks` from enqueue until it is acknowledged or
/// dead-lettered, and is referenced by exactly one of `pending`/`inflight`
/// at a time.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    pending: PartitionHandle,
    inflight: PartitionHandle,
    dlq: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let inflight = keyspace.open_partition("inflight", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(META_NEXT_SEQ)?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            pending,
            inflight,
            dlq,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a task at the tail of `queue` and return its sequence number
    pub fn enqueue(&self, queue: &str, task: &TaskMessage) -> Result<u64> {
        validate_queue_name(queue)?;

        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        self.tasks.insert(seq.to_be_bytes(), serde_json::to_vec(task)?)?;
        self.pending.insert(pending_key(queue, seq), Vec::<u8>::new())?;
        self.metadata.insert(META_NEXT_SEQ, (seq + 1).to_be_bytes())?;

        debug!(seq, queue, task_id = %task.task_id, "Task enqueued");

        Ok(seq)
    }

    /// Lease the oldest pending task of `queue` to `worker_id`
    pub fn reserve(&self, queue: &str, worker_id: &str) -> Result<Option<TaskEnvelope>> {
        validate_queue_name(queue)?;

        let Some(item) = self.pending.prefix(pending_prefix(queue)).next() else {
            return Ok(None);
        };
        let (key, _) = item?;
        let seq = decode_pending_seq(&key).ok_or(QueueError::InvalidQueue(queue.to_string()))?;

        let task = self.get_task(seq)?.ok_or(QueueError::TaskNotFound(seq))?;

        let lease = Lease {
            queue: queue.to_string(),
            worker_id: worker_id.to_string(),
            leased_at: Utc::now(),
        };
        self.inflight.insert(seq.to_be_bytes(), serde_json::to_vec(&lease)?)?;
        self.pending.remove(key)?;

        debug!(seq, queue, worker_id, "Task leased");

        Ok(Some(TaskEnvelope {
            seq,
            queue: queue.to_string(),
            task,
        }))
    }

    /// Acknowledge a completed task, deleting it
    pub fn ack(&self, seq: u64, worker_id: &str) -> Result<()> {
        self.take_lease(seq, worker_id)?;
        self.tasks.remove(seq.to_be_bytes())?;
        debug!(seq, worker_id, "Task acknowledged");
        Ok(())
    }

    /// Return a leased task to its queue, in sequence order, with the attempt bumped
    pub fn requeue(&self, seq: u64, worker_id: &str) -> Result<String> {
        let lease = self.take_lease(seq, worker_id)?;
        self.restore_pending(seq, &lease)?;
        Ok(lease.queue)
    }

    /// Move a leased task to the Dead Letter Queue (DLQ)
    ///
    /// Called when a task exhausts all retries or can never succeed.
    pub fn move_to_dlq(
        &self,
        seq: u64,
        worker_id: &str,
        failure_code: &str,
        failure_message: &str,
    ) -> Result<()> {
        let lease = self.take_lease(seq, worker_id)?;
        let task = self.get_task(seq)?.ok_or(QueueError::TaskNotFound(seq))?;

        let dlq_entry = DeadLetterTask {
            attempts: task.attempt,
            task,
            queue: lease.queue,
            failure_code: failure_code.to_string(),
            failure_message: failure_message.to_string(),
            failed_at: Utc::now(),
        };

        self.dlq.insert(seq.to_be_bytes(), serde_json::to_vec(&dlq_entry)?)?;
        self.tasks.remove(seq.to_be_bytes())?;

        info!(seq, attempts = dlq_entry.attempts, failure_code, "Task moved to DLQ");

        Ok(())
    }

    /// Requeue every task leased to `worker_id`; returns their sequences
    pub fn requeue_worker(&self, worker_id: &str) -> Result<Vec<(u64, String)>> {
        let mut requeued = Vec::new();
        for (seq, lease) in self.leases()? {
            if lease.worker_id == worker_id {
                self.inflight.remove(seq.to_be_bytes())?;
                self.restore_pending(seq, &lease)?;
                requeued.push((seq, lease.queue));
            }
        }
        if !requeued.is_empty() {
            warn!(worker_id, count = requeued.len(), "Requeued tasks of lost worker");
        }
        Ok(requeued)
    }

    /// Requeue every in-flight task (all workers gone, e.g. after restart)
    pub fn requeue_all_inflight(&self) -> Result<usize> {
        let leases = self.leases()?;
        for (seq, lease) in &leases {
            self.inflight.remove(seq.to_be_bytes())?;
            self.restore_pending(*seq, lease)?;
        }
        if !leases.is_empty() {
            info!(count = leases.len(), "Recovered in-flight tasks");
        }
        Ok(leases.len())
    }

    /// Number of tasks currently leased to `worker_id`
    pub fn inflight_for(&self, worker_id: &str) -> Result<usize> {
        Ok(self
            .leases()?
            .iter()
            .filter(|(_, lease)| lease.worker_id == worker_id)
            .count())
    }

    /// Number of pending (not leased) tasks in `queue`
    pub fn depth(&self, queue: &str) -> Result<usize> {
        let mut count = 0;
        for item in self.pending.prefix(pending_prefix(queue)) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Retrieve a task by sequence number
    pub fn get_task(&self, seq: u64) -> Result<Option<TaskMessage>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get a task from the DLQ by sequence number
    pub fn get_dlq_task(&self, seq: u64) -> Result<Option<DeadLetterTask>> {
        match self.dlq.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List DLQ tasks (for debugging/inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        let mut results = Vec::new();

        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            results.push((seq, serde_json::from_slice(&value)?));
        }

        Ok(results)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(META_NEXT_SEQ)?;
        Ok(())
    }

    fn take_lease(&self, seq: u64, worker_id: &str) -> Result<Lease> {
        let bytes = self
            .inflight
            .get(seq.to_be_bytes())?
            .ok_or(QueueError::NotInFlight(seq))?;
        let lease: Lease = serde_json::from_slice(&bytes)?;

        if lease.worker_id != worker_id {
            return Err(QueueError::LeaseMismatch {
                seq,
                holder: lease.worker_id,
                worker_id: worker_id.to_string(),
            });
        }

        self.inflight.remove(seq.to_be_bytes())?;
        Ok(lease)
    }

    fn restore_pending(&self, seq: u64, lease: &Lease) -> Result<()> {
        let mut task = self.get_task(seq)?.ok_or(QueueError::TaskNotFound(seq))?;
        task.attempt += 1;
        self.tasks.insert(seq.to_be_bytes(), serde_json::to_vec(&task)?)?;
        self.pending.insert(pending_key(&lease.queue, seq), Vec::<u8>::new())?;
        debug!(seq, queue = %lease.queue, attempt = task.attempt, "Task requeued");
        Ok(())
    }

    fn leases(&self) -> Result<Vec<(u64, Lease)>> {
        let mut leases = Vec::new();
        for item in self.inflight.iter() {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            leases.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(leases)
    }
}

/// Queue names become key segments, so `:` is reserved
pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.is_empty() || queue.contains(':') {
        return Err(QueueError::InvalidQueue(queue.to_string()));
    }
    Ok(())
}

fn pending_key(queue: &str, seq: u64) -> Vec<u8> {
    format!("q:{}:{:020}", queue, seq).into_bytes()
}

fn pending_prefix(queue: &str) -> Vec<u8> {
    format!("q:{}:", queue).into_bytes()
}

fn decode_pending_seq(key: &[u8]) -> Option<u64> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.rsplit(':').next()?.parse().ok()
}
