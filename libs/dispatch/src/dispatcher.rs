//! Dispatcher
//!
//! Owns the registry, the scheduler and the wake-up host for one thread.
//! No `RefCell` borrow is held while handler, filter or compression code
//! runs, so every operation below may be called re-entrantly from inside
//! those callbacks.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::filter::{FilterCursor, FilterRef, MessageFilter};
use crate::handler::{HandlerId, HandlerRef};
use crate::host::{WakeUpCallback, WakeUpHost};
use crate::message::{Message, PendingMessages};
use crate::registry::DispatchRegistry;
use crate::scheduler::{Scheduler, SchedulerState, Slot};
use crate::stats::{DispatchStats, DispatchStatsSnapshot};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Observer for failures that abort a dispatch cycle
pub type ErrorHook = Rc<dyn Fn(&DispatchError)>;

/// Handle to a dispatcher; clones share the same state
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

struct DispatcherInner {
    registry: RefCell<DispatchRegistry>,
    scheduler: Scheduler,
    config: DispatchConfig,
    stats: DispatchStats,
    /// Set while a cycle is draining
    cycling: Cell<bool>,
    error_hook: RefCell<Option<ErrorHook>>,
}

/// Clears the cycling flag on every exit path
struct CycleGuard<'a>(&'a Cell<bool>);

impl<'a> CycleGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Dispatcher {
    pub fn new(host: Rc<dyn WakeUpHost>) -> Self {
        Self::with_config(host, DispatchConfig::default())
    }

    pub fn with_config(host: Rc<dyn WakeUpHost>, config: DispatchConfig) -> Self {
        Self {
            inner: Rc::new(DispatcherInner {
                registry: RefCell::new(DispatchRegistry::new(config.registry_sweep_threshold)),
                scheduler: Scheduler::new(host),
                config,
                stats: DispatchStats::default(),
                cycling: Cell::new(false),
                error_hook: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Observe errors that abort a cycle; the error still propagates
    pub fn set_error_hook(&self, hook: impl Fn(&DispatchError) + 'static) {
        *self.inner.error_hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_error_hook(&self) {
        self.inner.error_hook.borrow_mut().take();
    }

    /// Deliver `message` to `handler` now
    ///
    /// Runs the handler's filters, newest first, then `process_message`.
    /// A suppressed message is dropped. Errors from filter or handler code
    /// are returned to the caller.
    pub fn send_message(&self, handler: &HandlerRef, message: Message) -> Result<(), DispatchError> {
        let cursor = {
            let mut registry = self.inner.registry.borrow_mut();
            let (state, swept) = registry.get_or_create(handler);
            let cursor = state.filter_cursor();
            drop(registry);
            self.forget(&swept);
            cursor
        };
        self.deliver(handler, HandlerId::of(handler), message, cursor)
    }

    /// Queue `message` for `handler` and arm a wake-up
    ///
    /// If messages are already pending the handler may compress the new one
    /// away. Filters run when the message is drained, not here.
    pub fn post_message(&self, handler: &HandlerRef, message: Message) {
        let id = HandlerId::of(handler);

        let detached = {
            let mut registry = self.inner.registry.borrow_mut();
            let (state, swept) = registry.get_or_create(handler);
            let detached = state
                .has_pending()
                .then(|| (state.take_pending(), state.clear_epoch()));
            drop(registry);
            self.forget(&swept);
            detached
        };

        if let Some((queue, epoch)) = detached {
            let compressed = handler.compress_message(&message, PendingMessages::new(&queue));
            if let Some(state) = self.inner.registry.borrow_mut().lookup_mut(id) {
                state.restore_pending(queue, epoch);
            }
            if compressed {
                self.inner.stats.record_compressed();
                trace!(%id, msg_type = message.msg_type(), "Compressed posted message");
                return;
            }
        }

        let swept = {
            let mut registry = self.inner.registry.borrow_mut();
            let (state, swept) = registry.get_or_create(handler);
            state.push_pending(message);
            swept
        };
        self.forget(&swept);
        self.inner.scheduler.enqueue(id);
        self.inner.stats.record_posted();
        self.request_wake_up();
    }

    pub fn has_pending_messages(&self, handler: &HandlerRef) -> bool {
        self.inner
            .registry
            .borrow()
            .lookup(HandlerId::of(handler))
            .is_some_and(|state| state.has_pending())
    }

    pub fn pending_message_count(&self, handler: &HandlerRef) -> usize {
        self.inner
            .registry
            .borrow()
            .lookup(HandlerId::of(handler))
            .map_or(0, |state| state.pending_count())
    }

    /// Deliver the oldest pending message of `handler`, if any, through the
    /// send path
    pub fn send_pending_message(&self, handler: &HandlerRef) -> Result<(), DispatchError> {
        let id = HandlerId::of(handler);
        let (message, cursor) = {
            let mut registry = self.inner.registry.borrow_mut();
            let Some(state) = registry.lookup_mut(id) else {
                return Ok(());
            };
            let Some(message) = state.pop_pending() else {
                return Ok(());
            };
            (message, state.filter_cursor())
        };
        self.deliver(handler, id, message, cursor)
    }

    /// Install `filter` on `handler`; it runs before previously installed
    /// filters
    pub fn install_message_filter(&self, handler: &HandlerRef, filter: FilterRef) {
        let swept = {
            let mut registry = self.inner.registry.borrow_mut();
            let (state, swept) = registry.get_or_create(handler);
            state.install_filter(filter);
            swept
        };
        self.forget(&swept);
    }

    /// Remove every installation of `filter` from `handler`
    ///
    /// Safe to call from inside that filter while it runs. Returns the
    /// number of installations removed.
    pub fn remove_message_filter(&self, handler: &HandlerRef, filter: &dyn MessageFilter) -> usize {
        self.inner
            .registry
            .borrow_mut()
            .lookup_mut(HandlerId::of(handler))
            .map_or(0, |state| state.remove_filter(filter))
    }

    /// Drop all pending messages and filters of `handler`
    ///
    /// Its slots in the scheduler queue are purged, so nothing is drained
    /// for it until it is posted to again.
    pub fn clear_message_data(&self, handler: &HandlerRef) {
        let id = HandlerId::of(handler);
        if let Some(state) = self.inner.registry.borrow_mut().lookup_mut(id) {
            state.clear();
        }
        self.inner.scheduler.purge(id);
        debug!(%id, "Cleared message data");
    }

    /// Run cycles now until no posted work remains
    ///
    /// Cancels the armed wake-up. A no-op when called from inside a cycle.
    /// Returns the number of cycles run.
    pub fn flush(&self) -> Result<usize, DispatchError> {
        if self.inner.cycling.get() {
            return Ok(0);
        }
        let max_cycles = self.inner.config.max_flush_cycles;
        let mut cycles = 0;
        loop {
            self.inner.scheduler.disarm();
            if !self.inner.scheduler.has_pending_work() {
                break;
            }
            if cycles >= max_cycles {
                self.request_wake_up();
                warn!(cycles, "Flush gave up; work is still being posted");
                return Err(DispatchError::FlushLimitExceeded { cycles });
            }
            self.run_cycle()?;
            cycles += 1;
        }
        debug!(cycles, "Flushed posted messages");
        Ok(cycles)
    }

    /// Cancel the wake-up and drop all dispatch state
    pub fn reset(&self) {
        self.inner.scheduler.clear();
        let threshold = self.inner.config.registry_sweep_threshold;
        let old = std::mem::replace(
            &mut *self.inner.registry.borrow_mut(),
            DispatchRegistry::new(threshold),
        );
        debug!(handlers = old.len(), "Reset dispatcher");
        drop(old);
    }

    /// Remove registry entries of dropped handlers
    pub fn sweep(&self) -> usize {
        let swept = self.inner.registry.borrow_mut().sweep();
        self.forget(&swept);
        swept.len()
    }

    /// Number of handlers with dispatch state
    pub fn handler_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.state()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// Handler slots waiting in the scheduler queue, sentinels excluded
    pub fn queued_handlers(&self) -> Vec<HandlerId> {
        self.inner
            .scheduler
            .snapshot()
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Handler(id) => Some(id),
                Slot::Sentinel => None,
            })
            .collect()
    }

    fn forget(&self, swept: &[HandlerId]) {
        if swept.is_empty() {
            return;
        }
        self.inner.scheduler.purge_many(swept);
        self.inner.stats.record_swept(swept.len());
    }

    fn deliver(
        &self,
        handler: &HandlerRef,
        id: HandlerId,
        message: Message,
        filters: FilterCursor,
    ) -> Result<(), DispatchError> {
        self.inner.stats.record_send();

        for filter in filters {
            match filter.filter_message(handler, &message) {
                Ok(false) => {}
                Ok(true) => {
                    self.inner.stats.record_suppressed();
                    trace!(%id, msg_type = message.msg_type(), "Message suppressed by filter");
                    return Ok(());
                }
                Err(source) => {
                    self.inner.stats.record_failure();
                    return Err(DispatchError::filter(id, message.msg_type(), source));
                }
            }
        }

        trace!(%id, msg_type = message.msg_type(), "Delivering message");
        match handler.process_message(&message) {
            Ok(()) => {
                self.inner.stats.record_delivered();
                Ok(())
            }
            Err(source) => {
                self.inner.stats.record_failure();
                Err(DispatchError::processing(id, message.msg_type(), source))
            }
        }
    }

    fn request_wake_up(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.request_wake_up(move |ticket| -> WakeUpCallback {
            Box::new(move || match weak.upgrade() {
                Some(inner) => Dispatcher { inner }.on_wake_up(ticket),
                None => Ok(()),
            })
        });
    }

    fn on_wake_up(&self, ticket: u64) -> Result<(), DispatchError> {
        if !self.inner.scheduler.consume(ticket) {
            trace!(ticket, "Ignoring stale wake-up");
            return Ok(());
        }
        if self.inner.cycling.get() {
            self.request_wake_up();
            return Ok(());
        }
        self.run_cycle()
    }

    /// Drain one generation: every slot queued before this call, once
    fn run_cycle(&self) -> Result<(), DispatchError> {
        let scheduler = &self.inner.scheduler;
        if !scheduler.begin_generation() {
            return Ok(());
        }
        let _guard = CycleGuard::enter(&self.inner.cycling);
        self.inner.stats.record_cycle();

        let mut drained = 0usize;
        while let Some(slot) = scheduler.pop_front() {
            let id = match slot {
                Slot::Sentinel => break,
                Slot::Handler(id) => id,
            };
            let Some(handler) = self.inner.registry.borrow().resolve(id) else {
                trace!(%id, "Skipping slot for unknown handler");
                continue;
            };
            if let Err(err) = self.send_pending_message(&handler) {
                // re-arm first so the rest of the generation still drains
                self.request_wake_up();
                warn!(error = %err, drained, "Dispatch cycle aborted");
                self.notify_error(&err);
                return Err(err);
            }
            drained += 1;
        }

        self.request_wake_up();
        debug!(drained, queued = scheduler.len(), "Dispatch cycle complete");
        Ok(())
    }

    fn notify_error(&self, err: &DispatchError) {
        let hook = self.inner.error_hook.borrow().clone();
        if let Some(hook) = hook {
            (*hook)(err);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handler_count())
            .field("scheduler", &self.inner.scheduler)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use crate::test_utils::{EventLog, RecordingFilter, RecordingHandler};

    fn setup() -> (Rc<ManualHost>, Dispatcher) {
        let host = Rc::new(ManualHost::new());
        let dispatcher = Dispatcher::new(host.clone());
        (host, dispatcher)
    }

    #[test]
    fn test_send_is_synchronous() {
        let (host, dispatcher) = setup();
        let handler = Rc::new(RecordingHandler::new("h"));
        let h: HandlerRef = handler.clone();

        dispatcher.send_message(&h, Message::new("one")).unwrap();
        assert_eq!(handler.received_types(), vec!["one"]);
        assert!(host.is_idle());
        assert!(!dispatcher.is_armed());
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_post_defers_until_wake_up() {
        let (host, dispatcher) = setup();
        let handler = Rc::new(RecordingHandler::new("h"));
        let h: HandlerRef = handler.clone();

        dispatcher.post_message(&h, Message::new("one"));
        dispatcher.post_message(&h, Message::new("two"));
        assert!(handler.received_types().is_empty());
        assert!(dispatcher.has_pending_messages(&h));
        assert_eq!(dispatcher.pending_message_count(&h), 2);
        assert!(dispatcher.is_armed());
        assert_eq!(host.pending(), 1);

        host.run_next().unwrap().unwrap();
        assert_eq!(handler.received_types(), vec!["one", "two"]);
        assert!(!dispatcher.has_pending_messages(&h));
        assert!(!dispatcher.is_armed());
        assert!(host.is_idle());
    }

    #[test]
    fn test_send_pending_message_runs_filters() {
        let (_host, dispatcher) = setup();
        let handler = Rc::new(RecordingHandler::new("h"));
        let h: HandlerRef = handler.clone();
        let log = EventLog::new();
        let filter = Rc::new(RecordingFilter::new("f", log.clone()).blocking(["two"]));

        dispatcher.install_message_filter(&h, filter);
        dispatcher.post_message(&h, Message::new("one"));
        dispatcher.post_message(&h, Message::new("two"));

        dispatcher.send_pending_message(&h).unwrap();
        dispatcher.send_pending_message(&h).unwrap();
        dispatcher.send_pending_message(&h).unwrap();

        assert_eq!(handler.received_types(), vec!["one"]);
        assert_eq!(log.entries(), vec!["f:one", "f:two"]);
        assert_eq!(dispatcher.stats().suppressed, 1);
    }

    #[test]
    fn test_stale_wake_up_after_flush_is_ignored() {
        let (host, dispatcher) = setup();
        let handler = Rc::new(RecordingHandler::new("h"));
        let h: HandlerRef = handler.clone();

        dispatcher.post_message(&h, Message::new("one"));
        assert_eq!(dispatcher.flush().unwrap(), 1);
        assert_eq!(handler.received_types(), vec!["one"]);
        assert!(host.is_idle());

        dispatcher.post_message(&h, Message::new("two"));
        assert_eq!(host.pending(), 1);
        host.run_next().unwrap().unwrap();
        assert_eq!(handler.received_types(), vec!["one", "two"]);
    }

    #[test]
    fn test_dropped_dispatcher_wake_up_is_noop() {
        let (host, dispatcher) = setup();
        let h: HandlerRef = Rc::new(RecordingHandler::new("h"));
        dispatcher.post_message(&h, Message::new("one"));
        drop(dispatcher);

        assert!(matches!(host.run_next(), Some(Ok(()))));
    }

    #[test]
    fn test_reset_drops_everything() {
        let (host, dispatcher) = setup();
        let handler = Rc::new(RecordingHandler::new("h"));
        let h: HandlerRef = handler.clone();
        dispatcher.post_message(&h, Message::new("one"));

        dispatcher.reset();
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(!dispatcher.is_armed());
        assert!(host.is_idle());
        assert!(dispatcher.queued_handlers().is_empty());
    }
}
