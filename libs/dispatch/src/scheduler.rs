//! Global Scheduler
//!
//! Queue of "handlers with posted work" plus the Idle/Armed wake-up state.
//! Each queue slot stands for one undelivered message of that handler; a
//! cycle drains exactly the slots present when it started, bounded by a
//! sentinel pushed at the tail:
//!
//! ```text
//!   front                                      back
//!   [ H3 | H1 | H2 | H1 | SENTINEL | H2 (posted during the cycle) ]
//!    \_______ generation N ______/   \__ generation N+1 __/
//! ```

use crate::handler::HandlerId;
use crate::host::{WakeToken, WakeUpCallback, WakeUpHost};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Entry in the pending-handler queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Handler(HandlerId),
    /// Generation boundary, never dispatched
    Sentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A wake-up is scheduled with the host
    Armed { ticket: u64, token: WakeToken },
}

pub struct Scheduler {
    queue: RefCell<VecDeque<Slot>>,
    state: Cell<SchedulerState>,
    next_ticket: Cell<u64>,
    host: Rc<dyn WakeUpHost>,
}

impl Scheduler {
    pub fn new(host: Rc<dyn WakeUpHost>) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            state: Cell::new(SchedulerState::Idle),
            next_ticket: Cell::new(0),
            host,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state.get()
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state.get(), SchedulerState::Armed { .. })
    }

    /// Record one undelivered message for `id`
    pub fn enqueue(&self, id: HandlerId) {
        self.queue.borrow_mut().push_back(Slot::Handler(id));
    }

    pub fn has_pending_work(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Slots currently queued, sentinels included
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Arm a wake-up if there is queued work and none is armed yet
    ///
    /// `make_callback` receives the ticket the callback must present to
    /// [`consume`](Self::consume). Returns whether a wake-up was scheduled.
    pub fn request_wake_up(&self, make_callback: impl FnOnce(u64) -> WakeUpCallback) -> bool {
        if self.is_armed() || self.is_empty() {
            return false;
        }
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket.wrapping_add(1));
        let token = self.host.schedule_once(make_callback(ticket));
        self.state.set(SchedulerState::Armed { ticket, token });
        trace!(ticket, %token, "Armed dispatch wake-up");
        true
    }

    /// Armed → Idle for the wake-up holding `ticket`
    ///
    /// Returns false for a stale callback (cancelled or superseded).
    pub fn consume(&self, ticket: u64) -> bool {
        match self.state.get() {
            SchedulerState::Armed { ticket: armed, .. } if armed == ticket => {
                self.state.set(SchedulerState::Idle);
                true
            }
            _ => false,
        }
    }

    /// Cancel the armed wake-up, if any
    pub fn disarm(&self) {
        if let SchedulerState::Armed { token, .. } = self.state.get() {
            self.state.set(SchedulerState::Idle);
            self.host.cancel(token);
        }
    }

    /// Close the current generation with a sentinel
    ///
    /// Returns false when there is nothing to drain. A sentinel already at
    /// the tail (left by an aborted cycle) is reused.
    pub fn begin_generation(&self) -> bool {
        let mut queue = self.queue.borrow_mut();
        match queue.back() {
            None => false,
            Some(Slot::Sentinel) => true,
            Some(Slot::Handler(_)) => {
                queue.push_back(Slot::Sentinel);
                true
            }
        }
    }

    pub fn pop_front(&self) -> Option<Slot> {
        self.queue.borrow_mut().pop_front()
    }

    /// Drop every slot for `id`
    pub fn purge(&self, id: HandlerId) {
        self.queue
            .borrow_mut()
            .retain(|slot| *slot != Slot::Handler(id));
    }

    pub fn purge_many(&self, ids: &[HandlerId]) {
        if ids.is_empty() {
            return;
        }
        self.queue
            .borrow_mut()
            .retain(|slot| !matches!(slot, Slot::Handler(id) if ids.contains(id)));
    }

    /// Drop every slot and cancel the armed wake-up
    pub fn clear(&self) {
        self.disarm();
        self.queue.borrow_mut().clear();
    }

    /// Copy of the queue, front first
    pub fn snapshot(&self) -> Vec<Slot> {
        self.queue.borrow().iter().copied().collect()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state.get())
            .field("queued", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;

    fn noop(_ticket: u64) -> WakeUpCallback {
        Box::new(|| Ok(()))
    }

    fn scheduler() -> (Rc<ManualHost>, Scheduler) {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        (host, scheduler)
    }

    #[test]
    fn test_arms_only_with_work() {
        let (host, scheduler) = scheduler();
        assert!(!scheduler.request_wake_up(noop));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.enqueue(HandlerId::from_raw(1));
        assert!(scheduler.request_wake_up(noop));
        assert!(scheduler.is_armed());

        // idempotent while armed
        assert!(!scheduler.request_wake_up(noop));
        assert_eq!(host.pending(), 1);
    }

    #[test]
    fn test_consume_rejects_stale_ticket() {
        let (host, scheduler) = scheduler();
        scheduler.enqueue(HandlerId::from_raw(1));
        scheduler.request_wake_up(noop);
        let SchedulerState::Armed { ticket, .. } = scheduler.state() else {
            panic!("expected armed scheduler");
        };

        assert!(!scheduler.consume(ticket + 1));
        assert!(scheduler.consume(ticket));
        assert!(!scheduler.is_armed());
        assert!(!scheduler.consume(ticket));

        scheduler.request_wake_up(noop);
        scheduler.disarm();
        assert!(!scheduler.is_armed());
        // first callback still queued on the host, second was cancelled
        assert_eq!(host.pending(), 1);
    }

    #[test]
    fn test_sentinel_pushed_once() {
        let (_host, scheduler) = scheduler();
        assert!(!scheduler.begin_generation());

        let a = HandlerId::from_raw(1);
        scheduler.enqueue(a);
        assert!(scheduler.begin_generation());
        assert!(scheduler.begin_generation());
        assert_eq!(scheduler.snapshot(), vec![Slot::Handler(a), Slot::Sentinel]);
    }

    #[test]
    fn test_purge() {
        let (_host, scheduler) = scheduler();
        let a = HandlerId::from_raw(1);
        let b = HandlerId::from_raw(2);
        let c = HandlerId::from_raw(3);
        for id in [a, b, a, c, a] {
            scheduler.enqueue(id);
        }
        scheduler.begin_generation();

        scheduler.purge(a);
        assert_eq!(
            scheduler.snapshot(),
            vec![Slot::Handler(b), Slot::Handler(c), Slot::Sentinel]
        );

        scheduler.purge_many(&[b, c]);
        assert_eq!(scheduler.snapshot(), vec![Slot::Sentinel]);
    }
}
