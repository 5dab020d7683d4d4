use std::collections::VecDeque;

use crate::habit::{Habit, HabitId};
use crate::store::{HabitStore, OwnerId, StoreError};

/// A habit write that failed and is waiting for another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub owner: OwnerId,
    pub habit: Habit,
    pub attempts: u32,
    pub last_error: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: Vec<HabitId>,
    pub still_pending: usize,
    pub last_error: Option<StoreError>,
}

/// Failed upserts, at most one per (owner, habit). The newest habit state wins.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: VecDeque<PendingWrite>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingWrite> {
        self.pending.iter()
    }

    pub fn enqueue(&mut self, owner: OwnerId, habit: Habit, error: StoreError) {
        let attempts = match self.take(&owner, &habit.id) {
            Some(previous) if previous.habit.revision > habit.revision => {
                self.pending.push_back(previous);
                return;
            }
            Some(previous) => previous.attempts + 1,
            None => 1,
        };
        self.pending.push_back(PendingWrite {
            owner,
            habit,
            attempts,
            last_error: error,
        });
    }

    /// Drop a queued write that a newer write supersedes.
    pub fn discard(&mut self, owner: &OwnerId, habit: &HabitId) -> bool {
        self.take(owner, habit).is_some()
    }

    /// Empty the queue, handing every job to the caller.
    pub fn take_all(&mut self) -> Vec<PendingWrite> {
        self.pending.drain(..).collect()
    }

    /// Put back a job that failed again. A write for the same habit queued in
    /// the meantime is newer and wins.
    pub fn requeue(&mut self, job: PendingWrite) {
        let superseded = self
            .pending
            .iter()
            .any(|queued| queued.owner == job.owner && queued.habit.id == job.habit.id);
        if !superseded {
            self.pending.push_back(job);
        }
    }

    /// Habit states still waiting to be written for `owner`.
    pub fn queued_habits<'a>(&'a self, owner: &'a OwnerId) -> impl Iterator<Item = &'a Habit> + 'a {
        self.pending
            .iter()
            .filter(move |job| &job.owner == owner)
            .map(|job| &job.habit)
    }

    fn take(&mut self, owner: &OwnerId, habit: &HabitId) -> Option<PendingWrite> {
        let idx = self
            .pending
            .iter()
            .position(|job| &job.owner == owner && &job.habit.id == habit)?;
        self.pending.remove(idx)
    }
}

/// Outcome of one retry round over jobs taken out of a [`WriteQueue`].
#[derive(Debug, Default)]
pub struct Delivery {
    pub written: Vec<HabitId>,
    pub failed: Vec<PendingWrite>,
    pub last_error: Option<StoreError>,
}

/// Retry `jobs` once each, in order. Meant to run with no queue lock held.
pub fn deliver(store: &dyn HabitStore, jobs: Vec<PendingWrite>) -> Delivery {
    let mut delivery = Delivery::default();

    for mut job in jobs {
        match store.upsert(&job.owner, &job.habit) {
            Ok(()) => {
                tracing::info!(owner = %job.owner, habit_id = %job.habit.id, attempts = job.attempts, "queued write delivered");
                delivery.written.push(job.habit.id);
            }
            Err(err) => {
                job.attempts += 1;
                job.last_error = err.clone();
                delivery.last_error = Some(err);
                delivery.failed.push(job);
            }
        }
    }

    delivery
}
