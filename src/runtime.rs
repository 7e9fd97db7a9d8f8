//! Mailbox runtime for the resolution service.
//!
//! `ResolutionService` is already safe to call from many threads. This
//! module adds a small, bounded, thread-based runtime in front of it: every
//! worker owns one mailbox, and all requests for a session go to the same
//! mailbox, so a session's requests are served in submission order while
//! unrelated sessions resolve in parallel. Full mailboxes fail fast with
//! `QueueFull` instead of blocking the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::Decision;
use crate::service::{ResolutionService, Response};
use crate::session::{Metadata, SessionId};

enum Job {
    Init {
        metadata: Metadata,
        reply: Sender<Response>,
    },
    Select {
        session_id: SessionId,
        decision: Decision,
        metadata: Metadata,
        reply: Sender<Response>,
    },
    Current {
        session_id: SessionId,
        reply: Sender<Response>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct Mailbox {
    tx: Sender<Job>,
    worker: JoinHandle<()>,
}

impl Mailbox {
    fn start(idx: usize, queue_capacity: usize, service: Arc<ResolutionService>) -> ResolutionResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let worker = thread::Builder::new()
            .name(format!("kyroconf-worker-{idx}"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Init { metadata, reply } => {
                            let _ = reply.send(service.init(metadata));
                        }
                        Job::Select {
                            session_id,
                            decision,
                            metadata,
                            reply,
                        } => {
                            let _ = reply.send(service.select(&session_id, &decision, &metadata));
                        }
                        Job::Current { session_id, reply } => {
                            let _ = reply.send(service.current(&session_id));
                        }

                        #[cfg(test)]
                        Job::Sleep { duration, reply } => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                }
            })
            .map_err(|e| ResolutionError::internal(format!("failed to spawn worker {idx}: {e}")))?;
        Ok(Self { tx, worker })
    }
}

/// Handle to a submitted request.
pub struct ResolutionHandle {
    rx: Receiver<Response>,
}

impl ResolutionHandle {
    /// Waits for the response.
    pub fn join(self) -> ResolutionResult<Response> {
        self.rx
            .recv()
            .map_err(|_| ResolutionError::internal("worker dropped the request"))
    }

    /// Waits for the response, giving up after `timeout`.
    ///
    /// The request itself keeps running; only the wait is abandoned.
    pub fn join_timeout(self, timeout: Duration) -> ResolutionResult<Response> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                ResolutionError::internal(format!("no response within {} ms", timeout.as_millis()))
            }
            RecvTimeoutError::Disconnected => ResolutionError::internal("worker dropped the request"),
        })
    }
}

/// Routes service calls onto per-worker mailboxes.
pub struct ResolutionRuntime {
    service: Arc<ResolutionService>,
    mailboxes: Vec<Mailbox>,
    next: AtomicUsize,
    queue_capacity: usize,
}

impl ResolutionRuntime {
    /// Starts `config.workers` workers in front of `service`.
    ///
    /// Fails with `Internal` if a worker thread cannot be spawned; workers
    /// already started exit once their mailboxes are dropped.
    pub fn new(service: ResolutionService, config: RuntimeConfig) -> ResolutionResult<Self> {
        let service = Arc::new(service);
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let mailboxes = (0..workers)
            .map(|idx| Mailbox::start(idx, queue_capacity, Arc::clone(&service)))
            .collect::<ResolutionResult<Vec<_>>>()?;
        Ok(Self {
            service,
            mailboxes,
            next: AtomicUsize::new(0),
            queue_capacity,
        })
    }

    /// Mailbox serving `session_id`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn route(&self, session_id: &SessionId) -> usize {
        // the remainder is below the mailbox count
        (session_id.as_uuid().as_u128() % self.mailboxes.len() as u128) as usize
    }

    fn submit(&self, idx: usize, job: Job) -> ResolutionResult<()> {
        match self.mailboxes[idx].tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ResolutionError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => {
                Err(ResolutionError::internal(format!("worker {idx} has shut down")))
            }
        }
    }

    /// Creates a session on the next mailbox, round-robin.
    pub fn init_async(&self, metadata: Metadata) -> ResolutionResult<ResolutionHandle> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.mailboxes.len();
        let (reply, rx) = bounded(1);
        self.submit(idx, Job::Init { metadata, reply })?;
        Ok(ResolutionHandle { rx })
    }

    /// Queues a decision on the session's mailbox.
    pub fn select_async(
        &self,
        session_id: SessionId,
        decision: Decision,
        metadata: Metadata,
    ) -> ResolutionResult<ResolutionHandle> {
        let idx = self.route(&session_id);
        debug!(session_id = %session_id, mailbox = idx, "queueing decision");
        let (reply, rx) = bounded(1);
        self.submit(
            idx,
            Job::Select {
                session_id,
                decision,
                metadata,
                reply,
            },
        )?;
        Ok(ResolutionHandle { rx })
    }

    /// Queues a read behind the session's pending decisions.
    pub fn current_async(&self, session_id: SessionId) -> ResolutionResult<ResolutionHandle> {
        let idx = self.route(&session_id);
        let (reply, rx) = bounded(1);
        self.submit(idx, Job::Current { session_id, reply })?;
        Ok(ResolutionHandle { rx })
    }

    /// Creates a session and waits for the response.
    pub fn init(&self, metadata: Metadata) -> ResolutionResult<Response> {
        self.init_async(metadata)?.join()
    }

    /// Applies a decision and waits for the response.
    pub fn select(&self, session_id: SessionId, decision: Decision, metadata: Metadata) -> ResolutionResult<Response> {
        self.select_async(session_id, decision, metadata)?.join()
    }

    /// Reads the session's knowledge behind its pending decisions.
    pub fn current(&self, session_id: SessionId) -> ResolutionResult<Response> {
        self.current_async(session_id)?.join()
    }

    /// The service the workers call into.
    #[must_use]
    pub fn service(&self) -> &ResolutionService {
        &self.service
    }

    #[cfg(test)]
    fn submit_sleep(&self, idx: usize, duration: Duration) -> ResolutionResult<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.submit(idx, Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for ResolutionRuntime {
    fn drop(&mut self) {
        // Closing a mailbox lets its worker drain queued jobs and exit.
        for mailbox in self.mailboxes.drain(..) {
            drop(mailbox.tx);
            let _ = mailbox.worker.join();
        }
    }
}
