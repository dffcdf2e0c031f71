//! Cancellation-aware context threaded through every store round-trip
//!
//! A `Context` carries three things:
//! - correlation data for logging (`RequestContext`)
//! - a cancellation signal shared with every context derived from it
//! - an optional deadline
//!
//! The driver checks the context before each statement and registers an
//! interrupt callback while a statement runs, so cancelling a context aborts
//! work already in flight.

use crate::errors::{Result, StoreError};
use lockerstore_core_types::RequestContext;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Callback = Arc<dyn Fn() + Send + Sync>;

struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl CancelState {
    fn new(parent: Option<Arc<CancelState>>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent,
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .map(|cbs| cbs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for cb in callbacks {
            cb();
        }
    }

    fn register(&self, cb: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.push((id, cb));
        }
        id
    }

    fn unregister(&self, id: u64) {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.retain(|(cb_id, _)| *cb_id != id);
        }
    }
}

/// Cancellation-aware operation context
#[derive(Clone)]
pub struct Context {
    request: RequestContext,
    cancel: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request.request_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Context {
    /// A root context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            request: RequestContext::new(),
            cancel: CancelState::new(None),
            deadline: None,
        }
    }

    /// Derive a context that can be cancelled independently of its parent
    ///
    /// Cancelling the parent still cancels the child.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let state = CancelState::new(Some(self.cancel.clone()));
        let ctx = Context {
            request: self.request.clone(),
            cancel: state.clone(),
            deadline: self.deadline,
        };
        (ctx, CancelHandle { state })
    }

    /// Derive a context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline` (or earlier if the parent does)
    ///
    /// A statement still running when the deadline passes is interrupted.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Context {
            request: self.request.clone(),
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// Attach caller correlation data
    pub fn with_request(&self, request: RequestContext) -> Context {
        Context {
            request,
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn request_id(&self) -> &str {
        self.request.request_id.as_str()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The reason this context is done, if it is
    pub fn err(&self) -> Option<StoreError> {
        if self.cancel.is_cancelled() {
            return Some(StoreError::cancelled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StoreError::deadline_exceeded()),
            _ => None,
        }
    }

    /// Fail fast when the context is done
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run `f` when this context (or any ancestor) is cancelled
    ///
    /// The callback stays registered until the returned guard drops.
    pub fn on_cancel(&self, f: impl Fn() + Send + Sync + 'static) -> CancelGuard {
        let cb: Callback = Arc::new(f);
        let mut registrations = Vec::new();
        let mut state = Some(self.cancel.clone());
        while let Some(current) = state {
            let id = current.register(cb.clone());
            state = current.parent.clone();
            registrations.push((current, id));
        }
        CancelGuard { registrations }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Handle that cancels the context returned by [`Context::with_cancel`]
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

/// Keeps an `on_cancel` callback registered
pub struct CancelGuard {
    registrations: Vec<(Arc<CancelState>, u64)>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        for (state, id) in &self.registrations {
            state.unregister(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_marks_context_done() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = ctx.check().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.code(), "ERR_CANCELLED");
    }

    #[test]
    fn test_parent_cancel_reaches_child() {
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _child_cancel) = parent.with_cancel();
        cancel.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_leaves_parent_alive() {
        let (parent, _cancel) = Context::background().with_cancel();
        let (child, child_cancel) = parent.with_cancel();
        child_cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        let err = ctx.check().unwrap_err();
        assert_eq!(err.code(), "ERR_DEADLINE_EXCEEDED");
    }

    #[test]
    fn test_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_callbacks_fire_once_and_unregister() {
        let (ctx, cancel) = Context::background().with_cancel();
        let hits = Arc::new(AtomicUsize::new(0));

        let guard = {
            let hits = hits.clone();
            ctx.on_cancel(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        drop(guard);

        let _live = {
            let hits = hits.clone();
            ctx.on_cancel(move || {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        cancel.cancel();
        cancel.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}
