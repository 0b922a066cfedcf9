//! Send scheduler: owns the single transmission slot.
//!
//! Callers hand a transaction to [`Scheduler::transmit`] (the scheduler is
//! itself a [`Link`]) and wait on a oneshot. The run loop repeatedly picks
//! the most urgent sendable transaction, forwards it to the underlying link
//! under a timeout, reports the outcome for the target node and wakes the
//! caller. Transactions for sleeping nodes stay queued until
//! [`Scheduler::target_changed`] says something moved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use zw_domain::config::SchedulerConfig;
use zw_domain::trace::TraceEvent;
use zw_domain::NodeId;
use zw_protocol::{Response, TransmissionError};

use crate::link::{Link, OutcomeSink, TargetStateSource};
use crate::queue::{QueueFull, TransactionQueue};
use crate::transaction::Transaction;

type Reply = oneshot::Sender<Result<Response, TransmissionError>>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
    #[error("scheduler is shut down")]
    ShutDown,
}

struct Inner {
    queue: TransactionQueue,
    /// transaction id → waiting caller.
    waiters: HashMap<Uuid, Reply>,
}

pub struct Scheduler {
    link: Arc<dyn Link>,
    states: Arc<dyn TargetStateSource>,
    outcomes: Mutex<Option<Arc<dyn OutcomeSink>>>,
    inner: Mutex<Inner>,
    wake: Notify,
    shutdown: CancellationToken,
    timeout: Duration,
}

impl Scheduler {
    pub fn new(
        link: Arc<dyn Link>,
        states: Arc<dyn TargetStateSource>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            link,
            states,
            outcomes: Mutex::new(None),
            inner: Mutex::new(Inner {
                queue: TransactionQueue::new(config.queue_capacity),
                waiters: HashMap::new(),
            }),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            timeout: Duration::from_millis(config.transaction_timeout_ms),
        }
    }

    /// Install the sink that turns outcomes into reachability updates.
    pub fn set_outcome_sink(&self, sink: Arc<dyn OutcomeSink>) {
        *self.outcomes.lock() = Some(sink);
    }

    /// Queue a transaction; the receiver resolves with its final outcome.
    pub fn enqueue(
        &self,
        tx: Transaction,
    ) -> Result<oneshot::Receiver<Result<Response, TransmissionError>>, SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let (reply, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            let id = tx.id;
            inner.queue.push(tx)?;
            inner.waiters.insert(id, reply);
        }
        self.wake.notify_one();
        Ok(rx)
    }

    /// Re-evaluate held transactions, e.g. after a node woke up.
    pub fn target_changed(&self) {
        self.wake.notify_one();
    }

    /// Drop everything queued for `node`; waiters see `Dropped`.
    pub fn cancel_for_node(&self, node: NodeId) -> usize {
        let replies: Vec<Reply> = {
            let mut inner = self.inner.lock();
            let removed = inner.queue.cancel_for_node(node);
            removed
                .iter()
                .filter_map(|tx| inner.waiters.remove(&tx.id))
                .collect()
        };
        let count = replies.len();
        for reply in replies {
            let _ = reply.send(Err(TransmissionError::Dropped));
        }
        if count > 0 {
            tracing::debug!(node_id = %node, count, "dropped queued transactions");
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Queued transactions in the order they would be sent now.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.inner.lock().queue.ordered(&*self.states)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Run until [`shutdown`](Self::shutdown). Queued transactions left at
    /// shutdown resolve as `Dropped`.
    pub async fn run(&self) {
        tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "send scheduler started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let next = {
                let mut inner = self.inner.lock();
                inner.queue.pop_sendable(&*self.states).map(|tx| {
                    let reply = inner.waiters.remove(&tx.id);
                    (tx, reply)
                })
            };
            let Some((tx, reply)) = next else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.wake.notified() => {}
                }
                continue;
            };

            let started = Instant::now();
            let result = tokio::select! {
                r = tokio::time::timeout(self.timeout, self.link.transmit(&tx)) => {
                    r.unwrap_or(Err(TransmissionError::Timeout))
                }
                _ = self.shutdown.cancelled() => Err(TransmissionError::Dropped),
            };
            self.finish(&tx, started, &result);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }

        let orphaned: Vec<Reply> = {
            let mut inner = self.inner.lock();
            inner.queue.drain();
            inner.waiters.drain().map(|(_, r)| r).collect()
        };
        for reply in orphaned {
            let _ = reply.send(Err(TransmissionError::Dropped));
        }
        tracing::debug!("send scheduler stopped");
    }

    fn finish(
        &self,
        tx: &Transaction,
        started: Instant,
        result: &Result<Response, TransmissionError>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => tracing::debug!(
                target_node = %tx.target,
                msg = %tx.message,
                response = response.kind(),
                duration_ms,
                "transaction complete"
            ),
            Err(e) => tracing::debug!(
                target_node = %tx.target,
                msg = %tx.message,
                error = %e,
                duration_ms,
                "transaction failed"
            ),
        }
        TraceEvent::TransactionCompleted {
            node_id: tx.target.node(),
            priority: tx.priority.to_string(),
            success: result.is_ok(),
            duration_ms,
        }
        .emit();

        if let Some(node) = tx.target.node() {
            let sink = self.outcomes.lock().clone();
            if let Some(sink) = sink {
                sink.transaction_outcome(node, result.as_ref().map(|_| ()).map_err(|e| *e));
            }
        }
    }
}

#[async_trait]
impl Link for Scheduler {
    async fn transmit(&self, tx: &Transaction) -> Result<Response, TransmissionError> {
        let rx = self.enqueue(tx.clone()).map_err(|e| {
            tracing::warn!(error = %e, "transaction rejected");
            TransmissionError::Dropped
        })?;
        rx.await.unwrap_or(Err(TransmissionError::Dropped))
    }
}
