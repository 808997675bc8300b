//! Message Dispatch Engine
//!
//! Single-threaded delivery of typed messages to handler objects. A message
//! is either *sent* (delivered before the call returns) or *posted*
//! (queued and delivered on a later scheduling cycle). Filters can veto
//! delivery and handlers can compress redundant posts away.
//!
//! # Architecture
//!
//! ```text
//!  send_message ──────────────────────────────┐
//!                                             ▼
//!  post_message ─► compress? ─► pending queue   filters ─► process_message
//!                                   │             ▲
//!                                   ▼             │
//!                        ┌─────────────────────┐  │
//!                        │ Scheduler           │  │ one message per slot
//!                        │ [H1|H2|H1|SENTINEL] │──┘
//!                        └─────────┬───────────┘
//!                                  │ schedule_once
//!                        ┌─────────▼───────────┐
//!                        │ WakeUpHost          │
//!                        │ (manual / tokio)    │
//!                        └─────────────────────┘
//! ```
//!
//! # Ordering
//!
//! - sent messages are processed synchronously, in call order
//! - posted messages reach one handler in post order
//! - within one cycle, posted messages reach their handlers in global post
//!   order; posts made while a cycle runs wait for the next cycle
//!
//! # Examples
//!
//! ```rust
//! use message_dispatch::{Dispatcher, HandlerRef, HandlerResult, ManualHost, Message, MessageHandler};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! struct Widget {
//!     seen: RefCell<Vec<String>>,
//! }
//!
//! impl MessageHandler for Widget {
//!     fn process_message(&self, message: &Message) -> HandlerResult {
//!         self.seen.borrow_mut().push(message.msg_type().to_string());
//!         Ok(())
//!     }
//! }
//!
//! let host = Rc::new(ManualHost::new());
//! let dispatcher = Dispatcher::new(host.clone());
//! let widget = Rc::new(Widget { seen: RefCell::new(Vec::new()) });
//! let handler: HandlerRef = widget.clone();
//!
//! dispatcher.post_message(&handler, Message::new("update-request"));
//! dispatcher.send_message(&handler, Message::new("resize")).unwrap();
//! assert_eq!(*widget.seen.borrow(), vec!["resize"]);
//!
//! host.run_until_idle(8).unwrap();
//! assert_eq!(*widget.seen.borrow(), vec!["resize", "update-request"]);
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod global;
pub mod handler;
pub mod host;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod test_utils;

pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, ErrorHook};
pub use error::{DispatchError, HandlerResult};
pub use filter::{FilterChain, FilterCursor, FilterRef, MessageFilter};
pub use handler::{HandlerId, HandlerRef, MessageHandler};
pub use host::{ManualHost, TokioLocalHost, WakeToken, WakeUpCallback, WakeUpHost};
pub use message::{Message, PendingMessages};
pub use registry::DispatchRegistry;
pub use scheduler::{Scheduler, SchedulerState, Slot};
pub use state::DispatchState;
pub use stats::{DispatchStats, DispatchStatsSnapshot};
