//! Message values and the read-only view of a handler's pending queue

use std::any::Any;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Immutable message delivered to a handler
///
/// The `msg_type` discriminant is the only part the engine inspects.
/// Extra data rides along as a typed payload and is recovered with
/// [`Message::payload`].
#[derive(Clone)]
pub struct Message {
    msg_type: Cow<'static, str>,
    payload: Option<Rc<dyn Any>>,
}

impl Message {
    /// Create a message carrying only a type
    pub fn new(msg_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: None,
        }
    }

    /// Create a message with an attached payload
    pub fn with_payload<T: Any>(msg_type: impl Into<Cow<'static, str>>, payload: T) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: Some(Rc::new(payload)),
        }
    }

    /// Message type discriminant
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn is_type(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    /// Borrow the payload if it is a `T`
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_type", &self.msg_type)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Read view of the messages still waiting for one handler, oldest first
#[derive(Debug, Clone, Copy)]
pub struct PendingMessages<'a> {
    queue: &'a VecDeque<Message>,
}

impl<'a> PendingMessages<'a> {
    pub(crate) fn new(queue: &'a VecDeque<Message>) -> Self {
        Self { queue }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Oldest pending message
    pub fn front(&self) -> Option<&'a Message> {
        self.queue.front()
    }

    /// Most recently queued message
    pub fn back(&self) -> Option<&'a Message> {
        self.queue.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Message> + 'a {
        self.queue.iter()
    }

    /// True if any pending message satisfies `predicate`
    pub fn any(&self, predicate: impl FnMut(&Message) -> bool) -> bool {
        self.queue.iter().any(predicate)
    }

    /// True if a message of `msg_type` is already waiting
    pub fn contains_type(&self, msg_type: &str) -> bool {
        self.any(|msg| msg.is_type(msg_type))
    }
}
