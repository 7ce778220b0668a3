//! Shared execution context.
//!
//! [`Runtime`] is the part of the reconciler that user-side handles
//! ([`crate::hooks::Dispatch`], [`crate::class::Updater`], suspense retries)
//! can reach without holding the reconciler itself. It knows which batching
//! scope is active and what is currently rendering, so a dispatch can pick its
//! expiration time on the spot, and it buffers the resulting updates in an
//! inbox that the reconciler drains at every entry point.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::expiration::{
    ExpirationTime, NO_WORK, SYNC, compute_async_expiration, compute_interactive_expiration,
};
use crate::fiber::{FiberId, Mode};
use crate::suspense::WaitId;
use crate::update_queue::Update;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct QueueId(u64);

/// A hook queue that can try to compute its next state at drain time, while
/// its fiber has no other pending work.
pub(crate) trait EagerState {
    /// Computes the state the queued action `seq` leads to. Returns true when
    /// it equals the last rendered state, i.e. the update can be dropped
    /// without scheduling a render.
    fn compute_eager(&self, seq: u64) -> bool;
}

pub(crate) enum ScheduledUpdate {
    Hook {
        fiber: FiberId,
        expiration_time: ExpirationTime,
        eager: Rc<dyn EagerState>,
        seq: u64,
    },
    Class {
        fiber: FiberId,
        update: Rc<Update>,
    },
    Retry {
        boundary: FiberId,
        wait: WaitId,
    },
}

#[derive(Default)]
pub struct Runtime {
    pub(crate) current_time: Cell<ExpirationTime>,
    pub(crate) expiration_context: Cell<ExpirationTime>,

    pub(crate) is_batching_updates: Cell<bool>,
    pub(crate) is_unbatching_updates: Cell<bool>,
    pub(crate) is_batching_interactive_updates: Cell<bool>,
    pub(crate) is_working: Cell<bool>,
    pub(crate) is_committing: Cell<bool>,
    pub(crate) is_rendering: Cell<bool>,

    pub(crate) next_render_expiration_time: Cell<ExpirationTime>,
    pub(crate) has_next_root: Cell<bool>,
    pub(crate) lowest_priority_pending_interactive: Cell<ExpirationTime>,

    /// The function fiber whose body is executing, with its alternate.
    pub(crate) rendering_fiber: Cell<Option<(FiberId, Option<FiberId>)>>,
    pub(crate) did_schedule_render_phase_update: Cell<bool>,
    pub(crate) render_phase_updates: RefCell<HashMap<QueueId, Vec<Box<dyn Any>>>>,

    inbox: RefCell<VecDeque<ScheduledUpdate>>,
    next_queue_id: Cell<u64>,
}

impl Runtime {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn next_queue_id(&self) -> QueueId {
        let id = self.next_queue_id.get() + 1;
        self.next_queue_id.set(id);
        QueueId(id)
    }

    pub fn is_rendering(&self) -> bool {
        self.is_rendering.get()
    }

    /// Picks the expiration time for an update scheduled on a fiber of `mode`
    /// from whatever scope is active right now.
    pub(crate) fn compute_expiration_for_fiber(&self, mode: Mode) -> ExpirationTime {
        let context = self.expiration_context.get();
        let expiration_time = if context != NO_WORK {
            // an explicit deferred_updates / sync_updates scope
            context
        } else if self.is_working.get() {
            if self.is_committing.get() {
                SYNC
            } else {
                // updates during the render phase join the render in progress
                self.next_render_expiration_time.get()
            }
        } else if mode.contains(Mode::CONCURRENT) {
            let now = self.current_time.get();
            let mut e = if self.is_batching_interactive_updates.get() {
                compute_interactive_expiration(now)
            } else {
                compute_async_expiration(now)
            };
            // don't join a render that is already in flight at this level
            if self.has_next_root.get() && e == self.next_render_expiration_time.get() {
                e = e.decrement();
            }
            e
        } else {
            SYNC
        };

        if self.is_batching_interactive_updates.get() {
            let lowest = self.lowest_priority_pending_interactive.get();
            if lowest == NO_WORK || expiration_time < lowest {
                self.lowest_priority_pending_interactive.set(expiration_time);
            }
        }
        expiration_time
    }

    /// True while the body of `fiber` (or its alternate) is executing.
    pub(crate) fn is_rendering_fiber(&self, fiber: FiberId) -> bool {
        match self.rendering_fiber.get() {
            Some((wip, alt)) => wip == fiber || alt == Some(fiber),
            None => false,
        }
    }

    pub(crate) fn push_render_phase_update(&self, queue: QueueId, action: Box<dyn Any>) {
        self.did_schedule_render_phase_update.set(true);
        self.render_phase_updates
            .borrow_mut()
            .entry(queue)
            .or_default()
            .push(action);
    }

    pub(crate) fn take_render_phase_updates(&self, queue: QueueId) -> Option<Vec<Box<dyn Any>>> {
        self.render_phase_updates.borrow_mut().remove(&queue)
    }

    pub(crate) fn clear_render_phase_updates(&self) {
        self.did_schedule_render_phase_update.set(false);
        self.render_phase_updates.borrow_mut().clear();
    }

    pub(crate) fn enqueue(&self, update: ScheduledUpdate) {
        self.inbox.borrow_mut().push_back(update);
    }

    pub(crate) fn take_inbox(&self) -> VecDeque<ScheduledUpdate> {
        std::mem::take(&mut *self.inbox.borrow_mut())
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.inbox.borrow().is_empty()
    }

    /// Runs `f` with a fixed expiration context, restoring the previous one
    /// even if `f` unwinds.
    pub(crate) fn with_expiration_context<R>(
        &self,
        expiration_time: ExpirationTime,
        f: impl FnOnce() -> R,
    ) -> R {
        let _restore = CellGuard::set(&self.expiration_context, expiration_time);
        f()
    }
}

/// Sets a `Cell` for the lifetime of the guard and restores the previous
/// value on drop.
pub(crate) struct CellGuard<'a, T: Copy> {
    cell: &'a Cell<T>,
    prev: T,
}

impl<'a, T: Copy> CellGuard<'a, T> {
    pub(crate) fn set(cell: &'a Cell<T>, value: T) -> Self {
        let prev = cell.replace(value);
        Self { cell, prev }
    }
}

impl<T: Copy> Drop for CellGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.set(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_mode_is_sync() {
        let rt = Runtime::new();
        assert_eq!(rt.compute_expiration_for_fiber(Mode::empty()), SYNC);
    }

    #[test]
    fn test_concurrent_mode_is_async_unless_interactive() {
        let rt = Runtime::new();
        rt.current_time.set(ExpirationTime::from_ms(0.0));
        let low = rt.compute_expiration_for_fiber(Mode::CONCURRENT);
        rt.is_batching_interactive_updates.set(true);
        let high = rt.compute_expiration_for_fiber(Mode::CONCURRENT);
        assert!(high > low);
        assert_eq!(rt.lowest_priority_pending_interactive.get(), high);
    }

    #[test]
    fn test_new_update_avoids_in_flight_level() {
        let rt = Runtime::new();
        rt.current_time.set(ExpirationTime::from_ms(0.0));
        let e = rt.compute_expiration_for_fiber(Mode::CONCURRENT);
        rt.has_next_root.set(true);
        rt.next_render_expiration_time.set(e);
        assert_eq!(rt.compute_expiration_for_fiber(Mode::CONCURRENT), e.decrement());
    }

    #[test]
    fn test_expiration_context_restores() {
        let rt = Runtime::new();
        let inner = rt.with_expiration_context(SYNC, || rt.compute_expiration_for_fiber(Mode::CONCURRENT));
        assert_eq!(inner, SYNC);
        assert_eq!(rt.expiration_context.get(), NO_WORK);
    }

    #[test]
    fn test_cell_guard_restores_on_drop() {
        let cell = Cell::new(false);
        {
            let _g = CellGuard::set(&cell, true);
            assert!(cell.get());
        }
        assert!(!cell.get());
    }
}
