//! Thread-default dispatcher
//!
//! A thread can install one [`Dispatcher`] as its default and use the free
//! functions here instead of passing the dispatcher around. The default is
//! explicit: nothing is installed until [`init`] and [`reset`] tears it
//! down again.

use crate::error::DispatchError;
use crate::filter::{FilterRef, MessageFilter};
use crate::handler::HandlerRef;
use crate::message::Message;
use crate::Dispatcher;
use std::cell::RefCell;

thread_local! {
    static CURRENT: RefCell<Option<Dispatcher>> = const { RefCell::new(None) };
}

/// Install `dispatcher` as this thread's default, returning the previous one
pub fn init(dispatcher: Dispatcher) -> Option<Dispatcher> {
    CURRENT.with(|current| current.borrow_mut().replace(dispatcher))
}

/// Reset and uninstall this thread's default dispatcher
pub fn reset() {
    let previous = CURRENT.with(|current| current.borrow_mut().take());
    if let Some(dispatcher) = previous {
        dispatcher.reset();
    }
}

pub fn is_initialized() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// This thread's default dispatcher
pub fn current() -> Result<Dispatcher, DispatchError> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or(DispatchError::NotInitialized)
}

pub fn send_message(handler: &HandlerRef, message: Message) -> Result<(), DispatchError> {
    current()?.send_message(handler, message)
}

pub fn post_message(handler: &HandlerRef, message: Message) -> Result<(), DispatchError> {
    current()?.post_message(handler, message);
    Ok(())
}

pub fn has_pending_messages(handler: &HandlerRef) -> bool {
    current().is_ok_and(|d| d.has_pending_messages(handler))
}

pub fn send_pending_message(handler: &HandlerRef) -> Result<(), DispatchError> {
    current()?.send_pending_message(handler)
}

pub fn install_message_filter(handler: &HandlerRef, filter: FilterRef) -> Result<(), DispatchError> {
    current()?.install_message_filter(handler, filter);
    Ok(())
}

pub fn remove_message_filter(
    handler: &HandlerRef,
    filter: &dyn MessageFilter,
) -> Result<usize, DispatchError> {
    Ok(current()?.remove_message_filter(handler, filter))
}

/// Clear `handler`'s pending messages and filters; no-op without a default
/// dispatcher
pub fn clear_message_data(handler: &HandlerRef) {
    if let Ok(dispatcher) = current() {
        dispatcher.clear_message_data(handler);
    }
}

pub fn flush() -> Result<usize, DispatchError> {
    current()?.flush()
}
