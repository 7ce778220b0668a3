//! Wait handles and lazy components.
//!
//! A component that cannot render yet returns `RenderSignal::Suspended` with a
//! [`WaitHandle`]. The handle is settled by the embedder once the data
//! arrives; every listener registered with [`WaitHandle::then`] runs exactly
//! once at that point.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::{ElementType, FALLBACK_PROP};
use crate::error::{RenderSignal, UserError};
use crate::fiber::{Fiber, MemoizedState};
use crate::host_config::HostConfig;

static NEXT_WAIT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Resolved,
    Rejected,
}

struct WaitInner {
    id: WaitId,
    state: Cell<WaitState>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

#[derive(Clone)]
pub struct WaitHandle(Rc<WaitInner>);

impl Default for WaitHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitHandle {
    pub fn new() -> Self {
        Self(Rc::new(WaitInner {
            id: WaitId(NEXT_WAIT_ID.fetch_add(1, Ordering::Relaxed)),
            state: Cell::new(WaitState::Pending),
            listeners: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> WaitId {
        self.0.id
    }

    pub fn state(&self) -> WaitState {
        self.0.state.get()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == WaitState::Pending
    }

    pub fn resolve(&self) {
        self.settle(WaitState::Resolved);
    }

    pub fn reject(&self) {
        self.settle(WaitState::Rejected);
    }

    /// Runs `f` once the handle settles, either way. Runs it immediately if it
    /// already has.
    pub fn then(&self, f: impl FnOnce() + 'static) {
        if self.is_pending() {
            self.0.listeners.borrow_mut().push(Box::new(f));
        } else {
            f();
        }
    }

    fn settle(&self, state: WaitState) {
        if !self.is_pending() {
            return;
        }
        self.0.state.set(state);
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

impl PartialEq for WaitHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for WaitHandle {}

impl Hash for WaitHandle {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("id", &self.0.id.0)
            .field("state", &self.state())
            .finish()
    }
}

enum LazyStatus {
    Pending,
    Resolved(ElementType),
    Rejected(UserError),
}

struct LazyInner {
    status: RefCell<LazyStatus>,
    wait: WaitHandle,
}

/// A component type that is not known yet, e.g. code that is still loading.
/// Rendering it suspends until [`LazyComponent::resolve`] is called.
#[derive(Clone)]
pub struct LazyComponent(Rc<LazyInner>);

impl Default for LazyComponent {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyComponent {
    pub fn new() -> Self {
        Self(Rc::new(LazyInner {
            status: RefCell::new(LazyStatus::Pending),
            wait: WaitHandle::new(),
        }))
    }

    pub fn resolve(&self, ty: ElementType) {
        {
            let mut status = self.0.status.borrow_mut();
            if !matches!(*status, LazyStatus::Pending) {
                return;
            }
            *status = LazyStatus::Resolved(ty);
        }
        self.0.wait.resolve();
    }

    pub fn reject(&self, error: UserError) {
        {
            let mut status = self.0.status.borrow_mut();
            if !matches!(*status, LazyStatus::Pending) {
                return;
            }
            *status = LazyStatus::Rejected(error);
        }
        self.0.wait.reject();
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn read(&self) -> Result<ElementType, RenderSignal> {
        match &*self.0.status.borrow() {
            LazyStatus::Resolved(ty) => Ok(ty.clone()),
            LazyStatus::Rejected(e) => Err(RenderSignal::Failed(e.clone())),
            LazyStatus::Pending => Err(RenderSignal::Suspended(self.0.wait.clone())),
        }
    }
}

/// Timed-out marker stored in a suspense boundary's memoized state while it
/// shows its fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuspenseState {
    pub timed_out_at: crate::expiration::ExpirationTime,
}

/// A boundary captures a suspension only if it has a fallback and is not
/// already showing it; otherwise the signal moves on to the next boundary.
pub(crate) fn should_capture_suspense<H: HostConfig>(fiber: &Fiber<H>) -> bool {
    let has_fallback = fiber
        .memoized_props
        .props()
        .is_some_and(|p| p.get(FALLBACK_PROP).is_some());
    has_fallback && !matches!(fiber.memoized_state, MemoizedState::Suspense(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_run_once_on_settle() {
        let hits = Rc::new(Cell::new(0));
        let wait = WaitHandle::new();
        let h = hits.clone();
        wait.then(move || h.set(h.get() + 1));
        wait.resolve();
        wait.resolve();
        wait.reject();
        assert_eq!(hits.get(), 1);
        assert_eq!(wait.state(), WaitState::Resolved);
    }

    #[test]
    fn test_then_after_settle_runs_immediately() {
        let wait = WaitHandle::new();
        wait.reject();
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        wait.then(move || h.set(true));
        assert!(hit.get());
    }

    #[test]
    fn test_lazy_suspends_until_resolved() {
        let lazy = LazyComponent::new();
        assert!(matches!(lazy.read(), Err(RenderSignal::Suspended(_))));
        lazy.resolve(ElementType::Fragment);
        assert!(matches!(lazy.read(), Ok(ElementType::Fragment)));
    }
}
