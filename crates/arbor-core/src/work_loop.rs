//! Root scheduling, the render loop and the commit driver.
//!
//! Roots with pending work sit in a schedule. Synchronous work is flushed
//! before control returns to the embedder, everything else waits for a host
//! callback. Rendering walks the work-in-progress tree one fiber at a time and
//! may stop between fibers when the host asks it to yield. A completed tree is
//! committed in one go.

use std::rc::Rc;

use crate::current_fiber::{CapturedValue, log_captured_error};
use crate::error::{Invariant, ReconcilerError, RenderResult, RenderSignal, UserError};
use crate::expiration::{ExpirationTime, NEVER, NO_WORK, SYNC};
use crate::fiber::{EffectTag, FiberId, FiberProps, Mode, RootId, StateNode};
use crate::host_config::{CallbackHandle, CallbackKind, HostConfig};
use crate::reconciler::{CommitInfo, Reconciler};
use crate::scheduler::{CellGuard, ScheduledUpdate};
use crate::suspense::{WaitHandle, WaitId};

/// Passive effects of the last commit, waiting for their host callback.
pub(crate) struct PendingPassive {
    pub(crate) root: RootId,
    pub(crate) effects: Vec<FiberId>,
    pub(crate) handle: Option<CallbackHandle>,
}

#[derive(Default)]
pub(crate) struct WorkState {
    pub(crate) next_unit_of_work: Option<FiberId>,
    pub(crate) next_root: Option<RootId>,
    pub(crate) next_render_expiration_time: ExpirationTime,
    pub(crate) next_render_did_error: bool,

    /// Roots with pending work, in scheduling order.
    pub(crate) schedule: Vec<RootId>,
    pub(crate) next_flushed_root: Option<RootId>,
    pub(crate) next_flushed_expiration_time: ExpirationTime,
    pub(crate) callback: Option<(CallbackHandle, ExpirationTime)>,
    pub(crate) did_yield: bool,

    pub(crate) renderer_time: ExpirationTime,
    pub(crate) scheduler_time: ExpirationTime,

    pub(crate) passive: Option<PendingPassive>,
    /// Deleted subtrees of the commit in progress, released once it ends.
    pub(crate) deleted: Vec<FiberId>,
    pub(crate) needs_sweep: bool,

    pub(crate) nested_update_count: usize,
    pub(crate) last_committed_root: Option<RootId>,
    pub(crate) unhandled_error: Option<UserError>,
}

/// How a commit-phase step can fail.
pub(crate) enum CommitError {
    User(UserError),
    Invariant(Invariant),
}

impl From<UserError> for CommitError {
    fn from(e: UserError) -> Self {
        CommitError::User(e)
    }
}

impl From<Invariant> for CommitError {
    fn from(e: Invariant) -> Self {
        CommitError::Invariant(e)
    }
}

impl<H: HostConfig> Reconciler<H> {
    // -- time --

    fn recompute_renderer_time(&mut self) {
        let ms = self.host.now() - self.start_time_ms;
        self.work.renderer_time = ExpirationTime::from_ms(ms);
    }

    /// The time used to compute expiration times for new updates. Stays fixed
    /// while rendering and while work is pending, so updates scheduled in one
    /// event land in one batch.
    pub(crate) fn request_current_time(&mut self) -> ExpirationTime {
        if self.runtime.is_rendering.get() {
            return self.work.scheduler_time;
        }
        self.find_highest_priority_root();
        let exp = self.work.next_flushed_expiration_time;
        if exp == NO_WORK || exp == NEVER {
            self.recompute_renderer_time();
            self.work.scheduler_time = self.work.renderer_time;
        }
        self.runtime.current_time.set(self.work.scheduler_time);
        self.work.scheduler_time
    }

    // -- scheduling --

    /// Marks `fiber` and its ancestors as having work at `expiration_time` and
    /// asks for the root to be rendered.
    pub(crate) fn schedule_work(
        &mut self,
        fiber: FiberId,
        expiration_time: ExpirationTime,
    ) -> Result<(), ReconcilerError> {
        let Some(root) = self.schedule_work_to_root(fiber, expiration_time) else {
            log::warn!("can't perform an update on an unmounted component; this is a no-op");
            return Ok(());
        };
        if !self.runtime.is_working.get()
            && self.work.next_render_expiration_time != NO_WORK
            && expiration_time > self.work.next_render_expiration_time
        {
            log::debug!("higher priority update interrupts the render in progress");
            self.reset_stack();
        }
        self.mark_pending(root, expiration_time);
        if !self.runtime.is_working.get()
            || self.runtime.is_committing.get()
            || self.work.next_root != Some(root)
        {
            let root_expiration = self.roots[root].expiration_time;
            self.request_work(root, root_expiration)?;
        }
        Ok(())
    }

    fn schedule_work_to_root(&mut self, fiber: FiberId, expiration_time: ExpirationTime) -> Option<RootId> {
        let f = self.fibers.get_mut(fiber)?;
        if f.expiration_time < expiration_time {
            f.expiration_time = expiration_time;
        }
        let mut alternate = f.alternate;
        let mut parent = f.parent;
        let mut node = fiber;
        if let Some(alt) = alternate
            && let Some(a) = self.fibers.get_mut(alt)
            && a.expiration_time < expiration_time
        {
            a.expiration_time = expiration_time;
        }
        loop {
            let Some(p) = parent else {
                return match self.fibers[node].state_node {
                    StateNode::Root(root) if self.roots.contains_key(root) => Some(root),
                    _ => None,
                };
            };
            let pf = self.fibers.get_mut(p)?;
            if pf.child_expiration_time < expiration_time {
                pf.child_expiration_time = expiration_time;
            }
            alternate = pf.alternate;
            parent = pf.parent;
            if let Some(alt) = alternate
                && let Some(a) = self.fibers.get_mut(alt)
                && a.child_expiration_time < expiration_time
            {
                a.child_expiration_time = expiration_time;
            }
            node = p;
        }
    }

    fn mark_pending(&mut self, root: RootId, expiration_time: ExpirationTime) {
        let r = &mut self.roots[root];
        r.did_error = false;
        if r.earliest_pending_time == NO_WORK {
            r.earliest_pending_time = expiration_time;
            r.latest_pending_time = expiration_time;
        } else if r.earliest_pending_time < expiration_time {
            r.earliest_pending_time = expiration_time;
        } else if r.latest_pending_time > expiration_time {
            r.latest_pending_time = expiration_time;
        }
        self.find_next_expiration_time_to_work_on(root);
    }

    fn mark_committed(&mut self, root: RootId, earliest_remaining: ExpirationTime) {
        let r = &mut self.roots[root];
        r.did_error = false;
        if earliest_remaining == NO_WORK {
            r.earliest_pending_time = NO_WORK;
            r.latest_pending_time = NO_WORK;
            self.find_next_expiration_time_to_work_on(root);
            return;
        }
        if r.latest_pending_time != NO_WORK {
            if r.latest_pending_time > earliest_remaining {
                r.earliest_pending_time = NO_WORK;
                r.latest_pending_time = NO_WORK;
            } else if r.earliest_pending_time > earliest_remaining {
                r.earliest_pending_time = r.latest_pending_time;
            }
        }
        self.mark_pending(root, earliest_remaining);
    }

    fn find_next_expiration_time_to_work_on(&mut self, root: RootId) {
        let r = &mut self.roots[root];
        r.next_expiration_time_to_work_on = r.earliest_pending_time;
        r.expiration_time = r.earliest_pending_time;
    }

    pub(crate) fn request_work(&mut self, root: RootId, expiration_time: ExpirationTime) -> Result<(), ReconcilerError> {
        self.add_root_to_schedule(root, expiration_time);
        if self.runtime.is_rendering.get() {
            // picked up once the current render or commit finishes
            return Ok(());
        }
        if self.runtime.is_batching_updates.get() {
            if self.runtime.is_unbatching_updates.get() {
                self.work.next_flushed_root = Some(root);
                self.work.next_flushed_expiration_time = SYNC;
                self.perform_work_on_root(root, SYNC, false)?;
            }
            return Ok(());
        }
        if expiration_time == SYNC {
            self.perform_sync_work()
        } else {
            self.schedule_callback_with_expiration_time(expiration_time);
            Ok(())
        }
    }

    fn add_root_to_schedule(&mut self, root: RootId, expiration_time: ExpirationTime) {
        let r = &mut self.roots[root];
        if !r.scheduled {
            r.scheduled = true;
            r.expiration_time = expiration_time;
            self.work.schedule.push(root);
        } else if expiration_time > r.expiration_time {
            r.expiration_time = expiration_time;
        }
    }

    fn find_highest_priority_root(&mut self) {
        let mut highest = NO_WORK;
        let mut highest_root = None;
        let roots = &mut self.roots;
        self.work.schedule.retain(|id| {
            let Some(r) = roots.get_mut(*id) else {
                return false;
            };
            if r.expiration_time == NO_WORK {
                r.scheduled = false;
                return false;
            }
            if r.expiration_time > highest {
                highest = r.expiration_time;
                highest_root = Some(*id);
            }
            true
        });
        self.work.next_flushed_root = highest_root;
        self.work.next_flushed_expiration_time = highest;
    }

    fn schedule_callback_with_expiration_time(&mut self, expiration_time: ExpirationTime) {
        if let Some((handle, existing)) = self.work.callback {
            if expiration_time < existing {
                // the pending callback already fires early enough
                return;
            }
            self.host.cancel_callback(handle);
        }
        let current_ms = self.host.now() - self.start_time_ms;
        let timeout = (expiration_time.to_ms() - current_ms).max(0.0);
        let handle = self.host.schedule_callback(CallbackKind::Work, Some(timeout));
        self.work.callback = Some((handle, expiration_time));
    }

    // -- performing work --

    pub(crate) fn perform_sync_work(&mut self) -> Result<(), ReconcilerError> {
        self.perform_work(SYNC, false)
    }

    pub(crate) fn perform_async_work(&mut self) -> Result<(), ReconcilerError> {
        self.perform_work(NO_WORK, true)
    }

    /// Works on scheduled roots, most urgent first, down to `min_expiration`.
    pub(crate) fn perform_work(&mut self, min_expiration: ExpirationTime, yieldy: bool) -> Result<(), ReconcilerError> {
        self.work.did_yield = false;
        let result = self.perform_work_inner(min_expiration, yieldy);
        if yieldy {
            self.work.callback = None;
        }
        if let Err(e) = result {
            self.work.nested_update_count = 0;
            self.work.last_committed_root = None;
            self.work.unhandled_error = None;
            return Err(e);
        }
        if self.work.next_flushed_expiration_time != NO_WORK {
            self.schedule_callback_with_expiration_time(self.work.next_flushed_expiration_time);
        }
        self.finish_rendering()
    }

    fn perform_work_inner(&mut self, min_expiration: ExpirationTime, yieldy: bool) -> Result<(), ReconcilerError> {
        self.drain_inbox()?;
        self.find_highest_priority_root();
        if yieldy {
            self.recompute_renderer_time();
            self.work.scheduler_time = self.work.renderer_time;
        }
        while let Some(root) = self.work.next_flushed_root {
            let exp = self.work.next_flushed_expiration_time;
            if exp == NO_WORK || min_expiration > exp {
                break;
            }
            let not_expired = self.work.renderer_time > exp;
            if yieldy && self.work.did_yield && not_expired {
                break;
            }
            self.perform_work_on_root(root, exp, yieldy && not_expired)?;
            self.drain_inbox()?;
            self.find_highest_priority_root();
            if yieldy {
                self.recompute_renderer_time();
                self.work.scheduler_time = self.work.renderer_time;
            }
        }
        Ok(())
    }

    fn finish_rendering(&mut self) -> Result<(), ReconcilerError> {
        self.work.nested_update_count = 0;
        self.work.last_committed_root = None;
        self.maybe_sweep();
        match self.work.unhandled_error.take() {
            Some(error) => Err(ReconcilerError::Uncaught(error)),
            None => Ok(()),
        }
    }

    /// Reclaims orphaned fibers, but only between renders.
    fn maybe_sweep(&mut self) {
        if !self.work.needs_sweep
            || self.work.next_unit_of_work.is_some()
            || self.roots.values().any(|r| r.finished_work.is_some())
        {
            return;
        }
        self.work.needs_sweep = false;
        let roots: Vec<FiberId> = self.roots.values().map(|r| r.current).collect();
        self.fibers.sweep(roots);
    }

    pub(crate) fn perform_work_on_root(
        &mut self,
        root: RootId,
        expiration_time: ExpirationTime,
        yieldy: bool,
    ) -> Result<(), ReconcilerError> {
        let rt = self.runtime.clone();
        let _rendering = CellGuard::set(&rt.is_rendering, true);

        if let Some(finished) = self.roots[root].finished_work {
            return self.complete_root(root, finished, expiration_time);
        }
        let result = self.render_root(root, yieldy);
        if let Err(e) = result {
            self.fail_root(root);
            return Err(e);
        }
        if let Some(finished) = self.roots[root].finished_work {
            if !yieldy || !self.host.should_yield() {
                return self.complete_root(root, finished, expiration_time);
            }
            // committed on the next slice
            self.work.did_yield = true;
        }
        Ok(())
    }

    /// Drops all in-flight work of a root after a fatal error.
    fn fail_root(&mut self, root: RootId) {
        self.reset_stack();
        if let Some(r) = self.roots.get_mut(root) {
            r.finished_work = None;
            r.expiration_time = NO_WORK;
            r.earliest_pending_time = NO_WORK;
            r.latest_pending_time = NO_WORK;
            r.next_expiration_time_to_work_on = NO_WORK;
            r.scheduled = false;
        }
        self.work.schedule.retain(|r| *r != root);
        self.work.needs_sweep = true;
    }

    fn render_root(&mut self, root: RootId, yieldy: bool) -> Result<(), ReconcilerError> {
        self.flush_passive_effects_internal()?;
        let rt = self.runtime.clone();
        let _working = CellGuard::set(&rt.is_working, true);

        let expiration_time = self.roots[root].next_expiration_time_to_work_on;
        if expiration_time != self.work.next_render_expiration_time
            || self.work.next_root != Some(root)
            || self.work.next_unit_of_work.is_none()
        {
            self.reset_stack();
            self.work.next_root = Some(root);
            self.work.next_render_expiration_time = expiration_time;
            rt.next_render_expiration_time.set(expiration_time);
            rt.has_next_root.set(true);
            let current = self.roots[root].current;
            let wip = self.fibers.create_work_in_progress(current, FiberProps::None);
            self.fibers[wip].parent = None;
            self.work.next_unit_of_work = Some(wip);
            self.roots[root].pending_commit_expiration_time = NO_WORK;
            log::trace!("render root {root:?} at {expiration_time:?}");
        }

        loop {
            let signal = match self.work_loop(yieldy) {
                Ok(()) => break,
                Err(signal) => signal,
            };
            rt.rendering_fiber.set(None);
            rt.clear_render_phase_updates();
            let Some(source) = self.work.next_unit_of_work else {
                return Err(self.render_signal_to_error(signal));
            };
            if self.fibers[source].mode.contains(Mode::PROFILE) {
                let now = self.host.now();
                self.profiler.stop_and_record(&mut self.fibers, source, now, true);
            }
            let signal = match signal {
                RenderSignal::Fatal(inv) => return Err(inv.into()),
                other => other,
            };
            let Some(return_fiber) = self.fibers[source].parent else {
                return Err(self.render_signal_to_error(signal));
            };
            self.throw_exception(root, return_fiber, source, signal, expiration_time)?;
            let next = self.complete_unit_of_work(source)?;
            self.work.next_unit_of_work = next;
        }

        if self.work.next_unit_of_work.is_some() {
            // yielded; the work-in-progress tree stays for the next slice
            return Ok(());
        }

        let root_wip = self.fibers[self.roots[root].current].alternate;
        self.work.next_root = None;
        rt.has_next_root.set(false);

        if self.work.next_render_did_error && yieldy && !self.roots[root].did_error {
            // retry once, synchronously, before showing an error boundary
            log::debug!("render of {root:?} errored; retrying synchronously");
            let r = &mut self.roots[root];
            r.did_error = true;
            r.next_expiration_time_to_work_on = expiration_time;
            r.expiration_time = SYNC;
            r.finished_work = None;
            self.work.needs_sweep = true;
            return Ok(());
        }

        let r = &mut self.roots[root];
        r.pending_commit_expiration_time = expiration_time;
        r.finished_work = root_wip;
        Ok(())
    }

    fn render_signal_to_error(&mut self, signal: RenderSignal) -> ReconcilerError {
        match signal {
            RenderSignal::Fatal(inv) => inv.into(),
            RenderSignal::Failed(error) => {
                log_captured_error(None, &error);
                ReconcilerError::Uncaught(error)
            }
            RenderSignal::Suspended(_) => ReconcilerError::Uncaught(UserError::new(
                "the root suspended while rendering, but no fallback UI was specified",
            )),
        }
    }

    fn work_loop(&mut self, yieldy: bool) -> RenderResult<()> {
        while let Some(unit) = self.work.next_unit_of_work {
            if yieldy && self.host.should_yield() {
                self.work.did_yield = true;
                break;
            }
            let next = self.perform_unit_of_work(unit)?;
            self.work.next_unit_of_work = next;
        }
        Ok(())
    }

    fn perform_unit_of_work(&mut self, wip: FiberId) -> RenderResult<Option<FiberId>> {
        let current = self.fibers[wip].alternate;
        let profiling = self.fibers[wip].mode.contains(Mode::PROFILE);
        if profiling {
            let now = self.host.now();
            self.profiler.start(&mut self.fibers, wip, now);
        }
        let next = self.begin_work(current, wip, self.work.next_render_expiration_time)?;
        let f = &mut self.fibers[wip];
        f.memoized_props = f.pending_props.clone();
        if profiling {
            let now = self.host.now();
            self.profiler.stop_and_record(&mut self.fibers, wip, now, true);
        }
        match next {
            Some(next) => Ok(Some(next)),
            None => Ok(self.complete_unit_of_work(wip)?),
        }
    }

    /// Discards the work-in-progress tree, unwinding every context pushed on
    /// the way down to the interrupted fiber.
    pub(crate) fn reset_stack(&mut self) {
        if let Some(unit) = self.work.next_unit_of_work.take() {
            let mut interrupted = self.fibers.get(unit).and_then(|f| f.parent);
            while let Some(id) = interrupted {
                if !self.fibers.contains(id) {
                    break;
                }
                self.unwind_interrupted_work(id);
                interrupted = self.fibers[id].parent;
            }
        }
        self.legacy.reset();
        self.providers.reset();
        self.host_cx.reset();
        self.reset_hydration_state();
        self.work.next_root = None;
        self.work.next_render_expiration_time = NO_WORK;
        self.work.next_render_did_error = false;
        self.runtime.next_render_expiration_time.set(NO_WORK);
        self.runtime.has_next_root.set(false);
        self.work.needs_sweep = true;
    }

    // -- commit --

    fn complete_root(&mut self, root: RootId, finished: FiberId, expiration_time: ExpirationTime) -> Result<(), ReconcilerError> {
        self.roots[root].finished_work = None;
        if self.work.last_committed_root == Some(root) {
            self.work.nested_update_count += 1;
            if self.work.nested_update_count > self.config.nested_update_limit {
                self.work.nested_update_count = 0;
                self.fail_root(root);
                return Err(Invariant::NestedUpdateLimit(self.config.nested_update_limit).into());
            }
        } else {
            self.work.last_committed_root = Some(root);
            self.work.nested_update_count = 0;
        }
        log::trace!("commit root {root:?} at {expiration_time:?}");
        if let Err(e) = self.commit_root(root, finished) {
            self.fail_root(root);
            return Err(e);
        }
        Ok(())
    }

    fn commit_root(&mut self, root: RootId, finished: FiberId) -> Result<(), ReconcilerError> {
        self.flush_passive_effects_internal()?;
        let rt = self.runtime.clone();
        let committed_expiration = self.roots[root].pending_commit_expiration_time;
        if committed_expiration == NO_WORK {
            return Err(Invariant::Other("cannot commit a root without pending work").into());
        }
        self.roots[root].pending_commit_expiration_time = NO_WORK;

        let remaining = self.fibers[finished]
            .expiration_time
            .max(self.fibers[finished].child_expiration_time);
        self.mark_committed(root, remaining);

        let mut effects: Vec<FiberId> = Vec::new();
        let mut next = self.fibers[finished].first_effect;
        while let Some(e) = next {
            effects.push(e);
            next = self.fibers[e].next_effect;
        }
        if self.fibers[finished].effect_tag.has_side_effects() {
            effects.push(finished);
        }

        let started = self.host.now();
        let container = self.roots[root].container.clone();
        {
            let _working = CellGuard::set(&rt.is_working, true);
            let _committing = CellGuard::set(&rt.is_committing, true);

            self.host.prepare_for_commit(&container);
            for &effect in &effects {
                if self.fibers[effect].effect_tag.contains(EffectTag::SNAPSHOT) {
                    let result = self.commit_before_mutation_lifecycles(effect);
                    self.handle_commit_result(effect, result)?;
                }
            }

            if self.config.profile || self.fibers[finished].mode.contains(Mode::PROFILE) {
                self.profiler.record_commit_time(self.host.now());
            }

            for &effect in &effects {
                let result = self.commit_mutation_effect(effect);
                self.handle_commit_result(effect, result)?;
            }
            self.host.reset_after_commit(&container);
            self.roots[root].current = finished;

            let mut passive = Vec::new();
            for &effect in &effects {
                let tag = self.fibers[effect].effect_tag;
                if tag.intersects(EffectTag::UPDATE | EffectTag::CALLBACK) {
                    let current = self.fibers[effect].alternate;
                    let result = self.commit_lifecycles(current, effect, committed_expiration);
                    self.handle_commit_result(effect, result)?;
                }
                if tag.contains(EffectTag::REF) {
                    let result = self.commit_attach_ref(effect);
                    self.handle_commit_result(effect, result)?;
                }
                if tag.contains(EffectTag::PASSIVE) {
                    passive.push(effect);
                }
            }
            if !passive.is_empty() {
                let handle = self.host.schedule_callback(CallbackKind::PassiveEffects, None);
                self.work.passive = Some(PendingPassive {
                    root,
                    effects: passive,
                    handle: Some(handle),
                });
            }
        }

        let remaining = self.fibers[finished]
            .expiration_time
            .max(self.fibers[finished].child_expiration_time);
        if remaining == NO_WORK {
            self.failed_boundaries.clear();
        }
        let r = &mut self.roots[root];
        r.expiration_time = r.expiration_time.max(remaining);
        r.finished_work = None;

        for deleted in std::mem::take(&mut self.work.deleted) {
            self.fibers.release_subtree(deleted);
        }
        self.work.needs_sweep = true;

        let info = CommitInfo {
            root,
            expiration_time: committed_expiration,
            effect_count: effects.len(),
            duration_ms: self.host.now() - started,
            live_fibers: self.fibers.len(),
        };
        log::debug!(
            "committed {root:?} at {committed_expiration:?}: {} effects",
            info.effect_count
        );
        self.notify_commit(&info);
        Ok(())
    }

    fn handle_commit_result(&mut self, fiber: FiberId, result: Result<(), CommitError>) -> Result<(), ReconcilerError> {
        match result {
            Ok(()) => Ok(()),
            Err(CommitError::User(error)) => {
                self.capture_commit_phase_error(fiber, error)?;
                Ok(())
            }
            Err(CommitError::Invariant(inv)) => Err(inv.into()),
        }
    }

    // -- passive effects --

    pub(crate) fn flush_passive_effects_internal(&mut self) -> Result<(), ReconcilerError> {
        let Some(pending) = self.work.passive.take() else {
            return Ok(());
        };
        if let Some(handle) = pending.handle {
            self.host.cancel_callback(handle);
        }
        self.commit_passive_effects(pending.root, pending.effects)
    }

    fn commit_passive_effects(&mut self, root: RootId, effects: Vec<FiberId>) -> Result<(), ReconcilerError> {
        {
            let rt = self.runtime.clone();
            let _rendering = CellGuard::set(&rt.is_rendering, true);
            for effect in effects {
                if !self.fibers.contains(effect) {
                    continue;
                }
                if let Err(error) = self.commit_passive_hook_effects(effect) {
                    self.capture_commit_phase_error(effect, error)?;
                }
            }
        }
        let Some(r) = self.roots.get(root) else {
            return Ok(());
        };
        let exp = r.expiration_time;
        if exp != NO_WORK {
            self.request_work(root, exp)?;
        }
        Ok(())
    }

    // -- errors outside the render loop --

    /// Routes an error raised during commit to the nearest boundary that can
    /// still take it, or to the root.
    pub(crate) fn capture_commit_phase_error(&mut self, source: FiberId, error: UserError) -> Result<(), ReconcilerError> {
        let captured = CapturedValue::new(&self.fibers, error, Some(source));
        if matches!(self.fibers[source].kind, crate::fiber::FiberKind::HostRoot) {
            return self.capture_on_root(source, captured);
        }
        let mut node = self.fibers[source].parent;
        while let Some(id) = node {
            let Some(f) = self.fibers.get(id) else {
                break;
            };
            match &f.kind {
                crate::fiber::FiberKind::ClassComponent(ty) => {
                    let eligible = ty.factory().derives_state_from_error()
                        || (ty.factory().has_did_catch()
                            && f
                                .class_instance()
                                .is_some_and(|i| !self.failed_boundaries.contains(&i.id())));
                    if eligible {
                        let update = self.create_class_error_update(id, &captured, SYNC);
                        crate::update_queue::enqueue_update(&mut self.fibers, id, update);
                        return self.schedule_work(id, SYNC);
                    }
                }
                crate::fiber::FiberKind::HostRoot => return self.capture_on_root(id, captured),
                _ => {}
            }
            node = f.parent;
        }
        // no mounted ancestor; report it directly
        log_captured_error(None, &captured.error);
        if self.work.unhandled_error.is_none() {
            self.work.unhandled_error = Some(captured.error);
        }
        Ok(())
    }

    fn capture_on_root(&mut self, root_fiber: FiberId, captured: CapturedValue) -> Result<(), ReconcilerError> {
        let update = self.create_root_error_update(&captured, SYNC);
        crate::update_queue::enqueue_update(&mut self.fibers, root_fiber, update);
        self.schedule_work(root_fiber, SYNC)
    }

    /// Records an error that reached a root with no boundary. Entry points
    /// return it once the current batch of work is done.
    pub(crate) fn on_uncaught_error(&mut self, error: UserError) {
        if self.work.unhandled_error.is_none() {
            self.work.unhandled_error = Some(error);
        }
    }

    // -- suspense retries --

    pub(crate) fn retry_timed_out_boundary(&mut self, boundary: FiberId, wait: WaitId) -> Result<(), ReconcilerError> {
        let Some(f) = self.fibers.get(boundary) else {
            return Ok(());
        };
        let cache = match (&f.state_node, &f.memoized_state) {
            (StateNode::RetryCache(c), _) => Some(c.clone()),
            (_, crate::fiber::MemoizedState::RetryCache(c)) => Some(c.clone()),
            _ => None,
        };
        if let Some(cache) = cache {
            cache.borrow_mut().remove(&wait);
        }
        let mode = f.mode;
        self.request_current_time();
        let expiration_time = self.runtime.compute_expiration_for_fiber(mode);
        let Some(root) = self.schedule_work_to_root(boundary, expiration_time) else {
            return Ok(());
        };
        self.mark_pending(root, expiration_time);
        let root_expiration = self.roots[root].expiration_time;
        if root_expiration != NO_WORK {
            self.request_work(root, root_expiration)?;
        }
        Ok(())
    }

    /// Asks `wait` to schedule a retry of `boundary` once it settles, unless
    /// the boundary already listens to it.
    pub(crate) fn attach_retry_listener(
        &self,
        boundary: FiberId,
        cache: &Rc<std::cell::RefCell<std::collections::HashSet<WaitId>>>,
        wait: &WaitHandle,
    ) {
        if !cache.borrow_mut().insert(wait.id()) {
            return;
        }
        let runtime = Rc::downgrade(&self.runtime);
        let id = wait.id();
        wait.then(move || {
            if let Some(rt) = runtime.upgrade() {
                rt.enqueue(ScheduledUpdate::Retry { boundary, wait: id });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::element::{Node, component, host};
    use crate::element::FunctionComponent;
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    fn concurrent(r: &mut Reconciler<MemoryHost>) -> (RootId, crate::testing::NodeId) {
        let container = r.host_mut().create_root();
        let root = r.create_container(
            container,
            RootOptions {
                concurrent: true,
                ..Default::default()
            },
        );
        (root, container)
    }

    #[test]
    fn test_yielding_render_resumes_on_next_callback() {
        let mut r = Reconciler::new(MemoryHost::new());
        let (root, container) = concurrent(&mut r);
        let items: Vec<Node> = (0..6).map(|i| host("li").key(i as i64).child(format!("{i}")).into()).collect();
        r.update_container(root, host("ul").children(items), None, None).unwrap();

        r.host_mut().set_yield_after(Some(3));
        r.perform_scheduled_work().unwrap();
        assert!(r.work.next_unit_of_work.is_some());
        assert_eq!(r.host().render(container), "");
        assert!(r.host().pending_tasks().contains(&CallbackKind::Work));

        r.host_mut().set_yield_after(None);
        r.run_scheduled_tasks().unwrap();
        assert_eq!(
            r.host().render(container),
            "<ul><li>0</li><li>1</li><li>2</li><li>3</li><li>4</li><li>5</li></ul>"
        );
    }

    #[test]
    fn test_sync_update_interrupts_yielded_render() {
        let mut r = Reconciler::new(MemoryHost::new());
        let (root, container) = concurrent(&mut r);
        r.update_container(root, host("p").child("slow"), None, None).unwrap();
        r.host_mut().set_yield_after(Some(1));
        r.perform_scheduled_work().unwrap();
        assert!(r.work.next_unit_of_work.is_some());

        r.host_mut().set_yield_after(None);
        r.flush_sync(|r| r.update_container(root, host("p").child("fast"), None, None).unwrap())
            .unwrap();
        assert_eq!(r.host().render(container), "<p>fast</p>");
    }

    #[test]
    fn test_nested_update_limit_is_an_invariant() {
        use crate::hooks::EffectResult;
        let loops = FunctionComponent::new("Loop", |cx, _| {
            let (n, set) = cx.use_state(|| 0i64);
            cx.use_layout_effect(None, move || -> EffectResult {
                set.set(n + 1);
                Ok(None)
            });
            Ok(Node::from(format!("{n}")))
        });
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        let err = r.render(root, component(&loops)).unwrap_err();
        assert!(matches!(err, ReconcilerError::Invariant(Invariant::NestedUpdateLimit(50))));
    }

    #[test]
    fn test_passive_effects_wait_for_their_callback() {
        let ran = Rc::new(Cell::new(0));
        let seen = ran.clone();
        let app = FunctionComponent::new("App", move |cx, _| {
            let seen = seen.clone();
            cx.use_effect(Some(vec![]), move || {
                seen.set(seen.get() + 1);
                Ok(None)
            });
            Ok(Node::Empty)
        });
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, component(&app)).unwrap();
        assert_eq!(ran.get(), 0);
        assert_eq!(r.host().pending_tasks(), vec![CallbackKind::PassiveEffects]);
        r.run_scheduled_tasks().unwrap();
        assert_eq!(ran.get(), 1);
    }
}
