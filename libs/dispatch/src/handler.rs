//! Handler capability and identity

use crate::error::HandlerResult;
use crate::message::{Message, PendingMessages};
use std::fmt;
use std::rc::{Rc, Weak};

/// Shared reference to a handler, as passed to every dispatch operation
pub type HandlerRef = Rc<dyn MessageHandler>;

/// Non-owning reference kept by the registry
pub(crate) type WeakHandler = Weak<dyn MessageHandler>;

/// An object that receives messages
///
/// Handlers are called with `&self`; state that changes on delivery lives
/// behind `Cell`/`RefCell`. Every dispatch operation may be re-entered
/// from inside these callbacks.
pub trait MessageHandler {
    /// Process a delivered message
    fn process_message(&self, message: &Message) -> HandlerResult;

    /// Decide whether a newly posted `message` is already covered by
    /// something in `pending`
    ///
    /// Only consulted for posted messages, and only when `pending` is
    /// non-empty. Returning `true` discards the new message. The default
    /// never compresses.
    fn compress_message(&self, message: &Message, pending: PendingMessages<'_>) -> bool {
        let _ = (message, pending);
        false
    }
}

/// Identity of a handler: the address of the shared value
///
/// Two structurally equal handlers in different allocations never share an
/// id. The registry holds a `Weak` for every id it knows, which keeps the
/// allocation (and therefore the address) reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(usize);

impl HandlerId {
    /// Identity of a shared handler
    pub fn of(handler: &HandlerRef) -> Self {
        Self(Rc::as_ptr(handler) as *const () as usize)
    }

    /// Build an id from a raw address
    pub fn from_raw(addr: usize) -> Self {
        Self(addr)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{:#x}", self.0)
    }
}
