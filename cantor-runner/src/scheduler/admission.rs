//! Admission control
//!
//! A job passes through three handles on its way to running:
//! - `Reservation`: capacity claimed synchronously at intake, before any
//!   record exists, so an over-limit submission can be refused outright
//! - `QueueTicket`: the reservation bound to a job id, waiting in FIFO order
//! - `ExecutionSlot`: the permit held while the pipeline runs
//!
//! Each handle gives back what it holds when dropped, so no early-return
//! path can leak a slot or a queue entry, and a slot is released exactly once.

use std::collections::VecDeque;
use std::sync::Arc;

use cantor_core::dto::stats::SchedulerStats;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AdmissionError;

#[derive(Debug, Default)]
struct QueueState {
    /// Pipelines holding an execution slot
    active: usize,
    /// Capacity claimed by submissions not yet bound to a job id
    reserved: usize,
    /// Jobs waiting for a slot, oldest first
    waiting: VecDeque<Uuid>,
    closed: bool,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.reserved + self.waiting.len()
    }
}

#[derive(Debug)]
struct Inner {
    max_concurrent: usize,
    max_queued: usize,
    /// Fair semaphore; waiters are served in the order they started waiting
    slots: Arc<Semaphore>,
    state: Mutex<QueueState>,
}

/// Admission controller shared by job intake and the pipelines
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler running at most `max_concurrent` pipelines with up
    /// to `max_queued` more waiting.
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent,
                max_queued,
                slots: Arc::new(Semaphore::new(max_concurrent)),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Claims room for one more job, or refuses if running plus waiting jobs
    /// already fill the queue.
    pub fn try_reserve(&self) -> Result<Reservation, AdmissionError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(AdmissionError::Closed);
        }

        let capacity = self.inner.max_concurrent + self.inner.max_queued;
        if state.active + state.queued() >= capacity {
            return Err(AdmissionError::QueueFull {
                active: state.active,
                queued: state.queued(),
            });
        }

        state.reserved += 1;
        Ok(Reservation {
            scheduler: self.clone(),
            pending: true,
        })
    }

    /// Takes a slot without waiting. Succeeds iff fewer than `max_concurrent`
    /// pipelines are running and nobody is queued ahead.
    pub fn try_acquire_slot(&self) -> Option<ExecutionSlot> {
        let permit = Arc::clone(&self.inner.slots).try_acquire_owned().ok()?;
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.active += 1;
        drop(state);

        Some(ExecutionSlot::new(self.clone(), permit))
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queued()
    }

    /// 1-based position of a waiting job, `None` once it runs or if unknown
    pub fn queue_position(&self, job_id: Uuid) -> Option<usize> {
        self.inner
            .state
            .lock()
            .waiting
            .iter()
            .position(|id| *id == job_id)
            .map(|i| i + 1)
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            active: state.active,
            queued: state.queued(),
            max_concurrent: self.inner.max_concurrent,
            max_queued: self.inner.max_queued,
        }
    }

    /// Stops admitting jobs. Waiting tickets resolve to `AdmissionError::Closed`;
    /// running pipelines keep their slots.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.slots.close();
        debug!("Scheduler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        if state.active == 0 {
            warn!("Execution slot released with no active pipelines");
            return;
        }
        state.active -= 1;
    }
}

/// Queue capacity claimed for a job that does not exist yet
#[derive(Debug)]
pub struct Reservation {
    scheduler: Scheduler,
    pending: bool,
}

impl Reservation {
    /// Binds the reservation to a job and puts it at the back of the queue
    pub fn enqueue(mut self, job_id: Uuid) -> QueueTicket {
        {
            let mut state = self.scheduler.inner.state.lock();
            state.reserved = state.reserved.saturating_sub(1);
            state.waiting.push_back(job_id);
        }
        self.pending = false;

        QueueTicket {
            scheduler: self.scheduler.clone(),
            job_id,
            waiting: true,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.pending {
            let mut state = self.scheduler.inner.state.lock();
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

/// A queued job waiting for an execution slot
#[derive(Debug)]
pub struct QueueTicket {
    scheduler: Scheduler,
    job_id: Uuid,
    waiting: bool,
}

impl QueueTicket {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Waits for a free slot. Dropping the future leaves the queue.
    pub async fn ready(mut self) -> Result<ExecutionSlot, AdmissionError> {
        let permit = Arc::clone(&self.scheduler.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        {
            let mut state = self.scheduler.inner.state.lock();
            if let Some(pos) = state.waiting.iter().position(|id| *id == self.job_id) {
                state.waiting.remove(pos);
            }
            state.active += 1;
        }
        self.waiting = false;

        debug!("Job {} acquired an execution slot", self.job_id);
        Ok(ExecutionSlot::new(self.scheduler.clone(), permit))
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.waiting {
            let mut state = self.scheduler.inner.state.lock();
            if let Some(pos) = state.waiting.iter().position(|id| *id == self.job_id) {
                state.waiting.remove(pos);
            }
        }
    }
}

/// Permit to run one pipeline. Released exactly once, on drop.
#[derive(Debug)]
pub struct ExecutionSlot {
    scheduler: Scheduler,
    _permit: OwnedSemaphorePermit,
}

impl ExecutionSlot {
    fn new(scheduler: Scheduler, permit: OwnedSemaphorePermit) -> Self {
        Self {
            scheduler,
            _permit: permit,
        }
    }

    /// Gives the slot back. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        // The counter goes down before the permit returns to the semaphore,
        // so a woken waiter never sees `active` above the bound.
        self.scheduler.release_slot();
    }
}
