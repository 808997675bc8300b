//! Dispatch Registry
//!
//! Identity-keyed side table from handler to its dispatch state. Entries hold
//! a `Weak` to the handler, so registering a handler never extends its
//! lifetime; entries whose handler is gone are removed by [`sweep`].
//!
//! [`sweep`]: DispatchRegistry::sweep

use crate::handler::{HandlerId, HandlerRef, WeakHandler};
use crate::state::DispatchState;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
struct RegistryEntry {
    handler: WeakHandler,
    state: DispatchState,
}

/// Handler id → dispatch state
#[derive(Debug)]
pub struct DispatchRegistry {
    entries: HashMap<HandlerId, RegistryEntry>,
    /// Registry size that triggers the next automatic sweep
    sweep_at: usize,
    sweep_threshold: usize,
}

impl DispatchRegistry {
    pub fn new(sweep_threshold: usize) -> Self {
        let sweep_threshold = sweep_threshold.max(1);
        Self {
            entries: HashMap::new(),
            sweep_at: sweep_threshold,
            sweep_threshold,
        }
    }

    /// State for `handler`, created on first use
    ///
    /// Returns the ids of any dead entries swept while making room.
    pub fn get_or_create(&mut self, handler: &HandlerRef) -> (&mut DispatchState, Vec<HandlerId>) {
        let id = HandlerId::of(handler);
        let mut swept = Vec::new();
        if !self.entries.contains_key(&id) {
            if self.entries.len() >= self.sweep_at {
                swept = self.sweep();
                self.sweep_at = self.entries.len().max(1) * 2;
                self.sweep_at = self.sweep_at.max(self.sweep_threshold);
            }
            debug!(%id, "Registering dispatch state");
        }
        let entry = self.entries.entry(id).or_insert_with(|| RegistryEntry {
            handler: Rc::downgrade(handler),
            state: DispatchState::new(),
        });
        (&mut entry.state, swept)
    }

    pub fn lookup(&self, id: HandlerId) -> Option<&DispatchState> {
        self.entries.get(&id).map(|e| &e.state)
    }

    pub fn lookup_mut(&mut self, id: HandlerId) -> Option<&mut DispatchState> {
        self.entries.get_mut(&id).map(|e| &mut e.state)
    }

    /// Strong reference to a registered handler that is still alive
    pub fn resolve(&self, id: HandlerId) -> Option<HandlerRef> {
        self.entries.get(&id).and_then(|e| e.handler.upgrade())
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries whose handler has been dropped, returning their ids
    pub fn sweep(&mut self) -> Vec<HandlerId> {
        let dead: Vec<HandlerId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.handler.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.entries.remove(id);
        }
        if !dead.is_empty() {
            debug!(removed = dead.len(), remaining = self.entries.len(), "Swept dispatch registry");
        }
        dead
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.sweep_at = self.sweep_threshold;
    }
}
