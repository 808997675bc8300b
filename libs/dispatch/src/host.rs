//! Deferred-callback hosts
//!
//! The scheduler never decides when a cycle runs; it hands a single-shot
//! callback to a [`WakeUpHost`] and the host invokes it on a later turn.
//! Errors returned by the callback belong to the host.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{error, trace};

/// Single-shot callback scheduled by the dispatcher
pub type WakeUpCallback = Box<dyn FnOnce() -> Result<(), DispatchError>>;

/// Identifier of one scheduled wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeToken(u64);

impl WakeToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WakeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wake-{}", self.0)
    }
}

/// Host facility that runs a callback once, on a later turn
pub trait WakeUpHost {
    /// Schedule `callback` to run once; must not run it synchronously
    fn schedule_once(&self, callback: WakeUpCallback) -> WakeToken;

    /// Best-effort cancellation of a scheduled callback
    fn cancel(&self, token: WakeToken) {
        let _ = token;
    }
}

/// Host that runs callbacks only when told to
///
/// Used by tests and by applications that drive dispatch from their own
/// loop.
#[derive(Default)]
pub struct ManualHost {
    scheduled: RefCell<VecDeque<(WakeToken, WakeUpCallback)>>,
    next_token: Cell<u64>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting to run
    pub fn pending(&self) -> usize {
        self.scheduled.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.borrow().is_empty()
    }

    /// Run the oldest scheduled callback, if any
    pub fn run_next(&self) -> Option<Result<(), DispatchError>> {
        let (token, callback) = self.scheduled.borrow_mut().pop_front()?;
        trace!(%token, "Running manual wake-up");
        Some(callback())
    }

    /// Run callbacks until none are left or `max_runs` have run
    ///
    /// Stops at the first error. Returns how many callbacks ran.
    pub fn run_until_idle(&self, max_runs: usize) -> Result<usize, DispatchError> {
        let mut runs = 0;
        while runs < max_runs {
            match self.run_next() {
                Some(result) => {
                    runs += 1;
                    result?;
                }
                None => break,
            }
        }
        Ok(runs)
    }
}

impl WakeUpHost for ManualHost {
    fn schedule_once(&self, callback: WakeUpCallback) -> WakeToken {
        let token = WakeToken::new(self.next_token.get());
        self.next_token.set(token.id() + 1);
        self.scheduled.borrow_mut().push_back((token, callback));
        token
    }

    fn cancel(&self, token: WakeToken) {
        self.scheduled.borrow_mut().retain(|(t, _)| *t != token);
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Host backed by a tokio [`LocalSet`]
///
/// Each wake-up is a local task that yields (or sleeps for the configured
/// delay) before running the callback. The local set must be driven, e.g.
/// with `LocalSet::run_until`, for wake-ups to fire. Callback errors are
/// logged and forwarded to the optional error channel.
pub struct TokioLocalHost {
    local: Rc<LocalSet>,
    delay: Duration,
    next_token: Cell<u64>,
    tasks: Rc<RefCell<HashMap<WakeToken, JoinHandle<()>>>>,
    errors: Option<UnboundedSender<DispatchError>>,
}

impl TokioLocalHost {
    pub fn new(local: Rc<LocalSet>, delay: Duration) -> Self {
        Self {
            local,
            delay,
            next_token: Cell::new(0),
            tasks: Rc::new(RefCell::new(HashMap::new())),
            errors: None,
        }
    }

    /// Host using the configured `wake_up_delay_ms`
    pub fn from_config(local: Rc<LocalSet>, config: &DispatchConfig) -> Self {
        Self::new(local, config.wake_up_delay())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Forward callback errors to `errors`
    pub fn with_error_channel(mut self, errors: UnboundedSender<DispatchError>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Number of wake-ups scheduled and not yet fired
    pub fn scheduled(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl WakeUpHost for TokioLocalHost {
    fn schedule_once(&self, callback: WakeUpCallback) -> WakeToken {
        let token = WakeToken::new(self.next_token.get());
        self.next_token.set(token.id() + 1);

        let delay = self.delay;
        let tasks = Rc::clone(&self.tasks);
        let errors = self.errors.clone();
        let handle = self.local.spawn_local(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            tasks.borrow_mut().remove(&token);
            if let Err(err) = callback() {
                error!(%token, error = %err, "Dispatch cycle failed");
                if let Some(errors) = errors {
                    let _ = errors.send(err);
                }
            }
        });
        self.tasks.borrow_mut().insert(token, handle);
        token
    }

    fn cancel(&self, token: WakeToken) {
        if let Some(handle) = self.tasks.borrow_mut().remove(&token) {
            handle.abort();
        }
    }
}

impl fmt::Debug for TokioLocalHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioLocalHost")
            .field("delay", &self.delay)
            .field("scheduled", &self.scheduled())
            .finish()
    }
}
