//! Scheduled events owned by a match and fired from its tick path

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use uuid::Uuid;

/// Deferred work. Each entry carries the token its target must still hold
/// when it fires, so events aimed at a torn-down or re-spawned combatant are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Magazine refill at the end of a reload
    ReloadComplete { user_id: Uuid, token: u64 },
    /// One step of the respawn countdown; respawns at zero
    Respawn {
        user_id: Uuid,
        life: u64,
        seconds_left: u32,
    },
    /// One step of the post-victory countdown; tears the match down at zero
    WinCountdown { winner: Uuid, seconds_left: u32 },
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub fire_at: u64,
    seq: u64,
    pub kind: TimerKind,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of events by fire time; equal times fire in scheduling order
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, fire_at: u64, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(ScheduledEvent { fire_at, seq, kind }));
    }

    /// Pop the earliest event due at or before `now`
    pub fn pop_due(&mut self, now: u64) -> Option<ScheduledEvent> {
        match self.queue.peek() {
            Some(Reverse(event)) if event.fire_at <= now => self.queue.pop().map(|r| r.0),
            _ => None,
        }
    }

    pub fn next_fire_at(&self) -> Option<u64> {
        self.queue.peek().map(|r| r.0.fire_at)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
