//! Delivery queue: serializes every outbound send through one slot.
//!
//! Jobs run strictly one at a time in FIFO order. A failed attempt puts the
//! job back at the front after `retry_delay`, so a retried job always runs
//! before anything queued behind it. A job that exhausts its attempts, or
//! panics inside an attempt, is resolved with an error and the queue moves on.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use crate::channels::channel::SenderChannel;
use crate::clock::Clock;
use crate::config::DeliveryConfig;
use crate::delivery::model::{DeliveryJob, DeliveryPayload, DeliveryStats};
use crate::error::DeliveryError;

/// Outcome delivered to whoever submitted a job.
pub type DeliveryOutcome = Result<(), DeliveryError>;

struct PendingJob {
    job: DeliveryJob,
    reply: oneshot::Sender<DeliveryOutcome>,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<PendingJob>,
    /// True while a worker task owns the in-flight slot.
    processing: bool,
}

/// Single-flight outbound queue.
pub struct DeliveryQueue {
    config: DeliveryConfig,
    sender: Arc<dyn SenderChannel>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    sent: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl DeliveryQueue {
    pub fn new(
        config: DeliveryConfig,
        sender: Arc<dyn SenderChannel>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sender,
            clock,
            state: Mutex::new(QueueState::default()),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        })
    }

    /// Queue a job and wait for its final outcome.
    pub async fn enqueue(
        self: &Arc<Self>,
        contact_id: &str,
        payload: DeliveryPayload,
    ) -> DeliveryOutcome {
        self.submit(contact_id, payload)
            .await
            .await
            .unwrap_or(Err(DeliveryError::Dropped))
    }

    /// Queue a job and return a receiver for its outcome without waiting.
    pub async fn submit(
        self: &Arc<Self>,
        contact_id: &str,
        payload: DeliveryPayload,
    ) -> oneshot::Receiver<DeliveryOutcome> {
        let (tx, rx) = oneshot::channel();
        let job = DeliveryJob::new(contact_id, payload, self.clock.now());

        debug!(job_id = %job.id, contact_id = %job.contact_id, "Delivery job queued");

        let start_worker = {
            let mut state = self.state.lock().await;
            state.jobs.push_back(PendingJob { job, reply: tx });
            if state.processing {
                false
            } else {
                state.processing = true;
                true
            }
        };

        if start_worker {
            tokio::spawn(Arc::clone(self).process());
        }
        rx
    }

    /// Jobs waiting for the slot (excludes the one in flight).
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_processing(&self) -> bool {
        self.state.lock().await.processing
    }

    /// Reject every job that has not started yet. In-flight work is untouched.
    ///
    /// Returns the number of jobs cancelled.
    pub async fn clear_pending(&self) -> usize {
        let drained: Vec<PendingJob> = self.state.lock().await.jobs.drain(..).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.reply.send(Err(DeliveryError::Cancelled {
                job_id: pending.job.id,
                contact_id: pending.job.contact_id,
            }));
        }
        if count > 0 {
            info!(count, "Cancelled pending delivery jobs");
        }
        count
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }

    // ── Worker ──────────────────────────────────────────────────────

    /// Drain the queue. Exactly one of these runs at a time.
    async fn process(self: Arc<Self>) {
        loop {
            let mut pending = {
                let mut state = self.state.lock().await;
                match state.jobs.pop_front() {
                    Some(pending) => pending,
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            pending.job.attempt += 1;
            let attempt = pending.job.attempt;

            let result = AssertUnwindSafe(self.attempt(&pending.job))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    info!(
                        job_id = %pending.job.id,
                        contact_id = %pending.job.contact_id,
                        attempt,
                        "Delivered"
                    );
                    let _ = pending.reply.send(Ok(()));
                }
                Ok(Err(reason)) if attempt >= self.config.max_send_retries => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        job_id = %pending.job.id,
                        contact_id = %pending.job.contact_id,
                        attempts = attempt,
                        error = %reason,
                        "Delivery failed, giving up"
                    );
                    let _ = pending.reply.send(Err(DeliveryError::RetriesExhausted {
                        job_id: pending.job.id,
                        contact_id: pending.job.contact_id,
                        attempts: attempt,
                        last_error: reason,
                    }));
                }
                Ok(Err(reason)) => {
                    self.retried.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        job_id = %pending.job.id,
                        contact_id = %pending.job.contact_id,
                        attempt,
                        error = %reason,
                        "Delivery attempt failed, retrying"
                    );
                    self.clock.sleep(self.config.retry_delay).await;
                    self.state.lock().await.jobs.push_front(pending);
                }
                Err(panic) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    let reason = panic_message(panic.as_ref());
                    error!(
                        job_id = %pending.job.id,
                        contact_id = %pending.job.contact_id,
                        reason = %reason,
                        "Delivery attempt panicked"
                    );
                    let _ = pending.reply.send(Err(DeliveryError::Internal {
                        job_id: pending.job.id,
                        contact_id: pending.job.contact_id,
                        reason,
                    }));
                    self.clock.sleep(self.config.internal_cooldown).await;
                }
            }
        }
    }

    /// One bounded send attempt. The error string feeds the retry log.
    async fn attempt(&self, job: &DeliveryJob) -> Result<(), String> {
        let send = async {
            match &job.payload {
                DeliveryPayload::Text(text) => self.sender.send_text(&job.contact_id, text).await,
                DeliveryPayload::Tool(tool_ref) => {
                    self.sender.send_tool(&job.contact_id, tool_ref).await
                }
            }
        };

        match tokio::time::timeout(self.config.lock_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(DeliveryError::Timeout(self.config.lock_timeout).to_string()),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
