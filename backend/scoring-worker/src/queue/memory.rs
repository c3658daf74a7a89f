use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{DeadLetter, Delivery, JobPublisher, JobSource};
use crate::errors::QueueError;
use crate::models::jobs::{Job, JobEnvelope, JobKind};

#[derive(Default)]
struct Lanes {
    pending: HashMap<JobKind, VecDeque<String>>,
    processing: HashMap<JobKind, Vec<String>>,
    dead: Vec<DeadLetter>,
}

/// In-process queue with the same delivery semantics as the Redis queue,
/// minus durability. Retry delays are not honoured: rescheduled jobs go
/// straight back to pending.
#[derive(Default)]
pub struct InMemoryJobQueue {
    lanes: Mutex<Lanes>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending envelopes of one kind, oldest first.
    pub fn pending(&self, kind: JobKind) -> Vec<JobEnvelope> {
        self.lanes()
            .pending
            .get(&kind)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn in_flight(&self, kind: JobKind) -> usize {
        self.lanes().processing.get(&kind).map_or(0, Vec::len)
    }

    /// Pushes a raw entry onto the pending list, bypassing serialization.
    pub fn push_raw(&self, kind: JobKind, raw: impl Into<String>) {
        self.lanes()
            .pending
            .entry(kind)
            .or_default()
            .push_back(raw.into());
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lanes().dead.clone()
    }

    fn remove_in_flight(lanes: &mut Lanes, delivery: &Delivery) {
        if let Some(in_flight) = lanes.processing.get_mut(&delivery.envelope.kind) {
            if let Some(pos) = in_flight.iter().position(|raw| raw == &delivery.raw) {
                in_flight.remove(pos);
            }
        }
    }
}

#[async_trait]
impl JobPublisher for InMemoryJobQueue {
    async fn publish(&self, job: Job) -> Result<(), QueueError> {
        self.publish_all(vec![job]).await
    }

    async fn publish_all(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let mut entries = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let envelope = JobEnvelope::new(job)?;
            entries.push((envelope.kind, serde_json::to_string(&envelope)?));
        }

        let mut lanes = self.lanes();
        for (kind, raw) in entries {
            lanes.pending.entry(kind).or_default().push_back(raw);
        }
        Ok(())
    }
}

#[async_trait]
impl JobSource for InMemoryJobQueue {
    async fn reserve(&self, kind: JobKind) -> Result<Option<Delivery>, QueueError> {
        let mut lanes = self.lanes();
        while let Some(raw) = lanes.pending.get_mut(&kind).and_then(VecDeque::pop_front) {
            match Delivery::from_raw(raw.clone()) {
                Ok(delivery) => {
                    lanes.processing.entry(kind).or_default().push(raw);
                    return Ok(Some(delivery));
                }
                Err(err) => {
                    tracing::error!(
                        queue = %kind,
                        error = %err,
                        "Unreadable job entry, moving to dead letters"
                    );
                    lanes.dead.push(DeadLetter::unreadable(raw, &err));
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        Self::remove_in_flight(&mut self.lanes(), delivery);
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, _delay: Duration) -> Result<(), QueueError> {
        let next = serde_json::to_string(&delivery.envelope.next_attempt())?;
        let mut lanes = self.lanes();
        Self::remove_in_flight(&mut lanes, delivery);
        lanes
            .pending
            .entry(delivery.envelope.kind)
            .or_default()
            .push_back(next);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut lanes = self.lanes();
        Self::remove_in_flight(&mut lanes, delivery);
        lanes.dead.push(DeadLetter::for_delivery(delivery, reason));
        Ok(())
    }

    async fn recover_in_flight(&self, kind: JobKind) -> Result<usize, QueueError> {
        let mut lanes = self.lanes();
        let in_flight = lanes.processing.remove(&kind).unwrap_or_default();
        let recovered = in_flight.len();
        let pending = lanes.pending.entry(kind).or_default();
        for raw in in_flight.into_iter().rev() {
            pending.push_front(raw);
        }
        Ok(recovered)
    }

    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError> {
        Ok(self.lanes().pending.get(&kind).map_or(0, VecDeque::len))
    }
}
