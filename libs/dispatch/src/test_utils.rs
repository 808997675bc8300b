use crate::{HandlerRef, HandlerResult, Message, MessageFilter, MessageHandler, PendingMessages};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Shared, ordered log of events written by test handlers and filters
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// A handler that records every message it processes
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    received: RefCell<Vec<Message>>,
    log: Option<EventLog>,
    /// Types compressed when an equal type is already pending
    compressible: HashSet<String>,
    /// Types whose processing fails
    failing: HashSet<String>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: RefCell::new(Vec::new()),
            log: None,
            compressible: HashSet::new(),
            failing: HashSet::new(),
        }
    }

    /// Also write `name:type` to a shared log on every delivery
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Compress posts of these types while one of the same type is pending
    pub fn compressing<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compressible.extend(types.into_iter().map(Into::into));
        self
    }

    /// Fail processing of these types
    pub fn failing_on<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.borrow().clone()
    }

    pub fn received_types(&self) -> Vec<String> {
        self.received
            .borrow()
            .iter()
            .map(|m| m.msg_type().to_string())
            .collect()
    }

    pub fn clear_received(&self) {
        self.received.borrow_mut().clear();
    }
}

impl MessageHandler for RecordingHandler {
    fn process_message(&self, message: &Message) -> HandlerResult {
        if self.failing.contains(message.msg_type()) {
            anyhow::bail!("{} refused '{}'", self.name, message.msg_type());
        }
        self.received.borrow_mut().push(message.clone());
        if let Some(log) = &self.log {
            log.push(format!("{}:{}", self.name, message.msg_type()));
        }
        Ok(())
    }

    fn compress_message(&self, message: &Message, pending: PendingMessages<'_>) -> bool {
        self.compressible.contains(message.msg_type()) && pending.contains_type(message.msg_type())
    }
}

/// A filter that logs `name:type` for every message it sees and suppresses
/// the configured types
#[derive(Debug)]
pub struct RecordingFilter {
    name: String,
    log: EventLog,
    blocked: HashSet<String>,
}

impl RecordingFilter {
    pub fn new(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
            blocked: HashSet::new(),
        }
    }

    pub fn blocking<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked.extend(types.into_iter().map(Into::into));
        self
    }
}

impl MessageFilter for RecordingFilter {
    fn filter_message(&self, _handler: &HandlerRef, message: &Message) -> HandlerResult<bool> {
        self.log.push(format!("{}:{}", self.name, message.msg_type()));
        Ok(self.blocked.contains(message.msg_type()))
    }
}
