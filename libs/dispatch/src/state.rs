//! Per-handler dispatch state

use crate::filter::{FilterChain, FilterCursor, FilterRef, MessageFilter};
use crate::message::{Message, PendingMessages};
use std::collections::VecDeque;

/// Filter chain and pending messages for one handler
#[derive(Debug, Default)]
pub struct DispatchState {
    filters: FilterChain,
    /// Allocated on first post
    pending: Option<VecDeque<Message>>,
    /// Bumped by every `clear`
    clear_epoch: u64,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_filter(&mut self, filter: FilterRef) {
        self.filters.install(filter);
    }

    pub fn remove_filter(&mut self, filter: &dyn MessageFilter) -> usize {
        self.filters.remove_all(filter)
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub(crate) fn filter_cursor(&self) -> FilterCursor {
        self.filters.cursor()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|q| !q.is_empty())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.as_ref().map_or(0, VecDeque::len)
    }

    pub fn pending(&self) -> Option<PendingMessages<'_>> {
        self.pending.as_ref().map(PendingMessages::new)
    }

    pub fn push_pending(&mut self, message: Message) {
        self.pending.get_or_insert_with(VecDeque::new).push_back(message);
    }

    pub fn pop_pending(&mut self) -> Option<Message> {
        self.pending.as_mut().and_then(VecDeque::pop_front)
    }

    /// Detach the pending queue so it can be inspected without holding a
    /// borrow of the registry
    pub(crate) fn take_pending(&mut self) -> VecDeque<Message> {
        self.pending.take().unwrap_or_default()
    }

    pub(crate) fn clear_epoch(&self) -> u64 {
        self.clear_epoch
    }

    /// Put a detached queue back in front of anything queued meanwhile
    ///
    /// A queue detached before a `clear` (`epoch` is stale) was cleared
    /// too and is dropped.
    pub(crate) fn restore_pending(&mut self, mut queue: VecDeque<Message>, epoch: u64) {
        if epoch != self.clear_epoch {
            return;
        }
        if let Some(newer) = self.pending.as_mut() {
            queue.append(newer);
        }
        self.pending = Some(queue);
    }

    /// Drop every pending message and filter
    pub fn clear(&mut self) {
        if let Some(queue) = self.pending.as_mut() {
            queue.clear();
        }
        self.filters.clear();
        self.clear_epoch = self.clear_epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_fifo() {
        let mut state = DispatchState::new();
        assert!(!state.has_pending());
        assert!(state.pending().is_none());

        state.push_pending(Message::new("one"));
        state.push_pending(Message::new("two"));
        assert!(state.has_pending());
        assert_eq!(state.pending_count(), 2);

        assert_eq!(state.pop_pending().map(|m| m.msg_type().to_string()), Some("one".into()));
        assert_eq!(state.pop_pending().map(|m| m.msg_type().to_string()), Some("two".into()));
        assert!(state.pop_pending().is_none());
        assert!(!state.has_pending());
    }

    #[test]
    fn test_restore_keeps_order() {
        let mut state = DispatchState::new();
        state.push_pending(Message::new("one"));
        let epoch = state.clear_epoch();
        let detached = state.take_pending();
        state.push_pending(Message::new("two"));
        state.restore_pending(detached, epoch);

        let order: Vec<_> = std::iter::from_fn(|| state.pop_pending())
            .map(|m| m.msg_type().to_string())
            .collect();
        assert_eq!(order, vec!["one", "two"]);
    }

    #[test]
    fn test_restore_after_clear_drops_detached_queue() {
        let mut state = DispatchState::new();
        state.push_pending(Message::new("one"));
        let epoch = state.clear_epoch();
        let detached = state.take_pending();

        state.clear();
        state.restore_pending(detached, epoch);
        assert!(!state.has_pending());
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_clear_drops_messages_and_filters() {
        let mut state = DispatchState::new();
        let filter: FilterRef = std::rc::Rc::new(
            |_: &crate::HandlerRef, _: &Message| -> crate::HandlerResult<bool> { Ok(true) },
        );
        state.install_filter(filter);
        state.push_pending(Message::new("one"));

        state.clear();
        assert!(!state.has_pending());
        assert!(state.filters().is_empty());
    }
}
