//! The public face of the reconciler: roots, entry points and batching.
//!
//! Every public method here is an *entry point*. On the way in it samples the
//! clock and drains the [`Runtime`] inbox (dispatches and `set_state` calls
//! made since the last entry point). On the way out it flushes whatever
//! synchronous work became pending, unless an enclosing batch will do so.

use std::any::Any;
use std::collections::HashSet;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::class::InstanceHandle;
use crate::context::{LegacyContext, LegacyContextStack, ProviderStack};
use crate::element::{Node, RefTarget};
use crate::error::ReconcilerError;
use crate::expiration::{ExpirationTime, NO_WORK, SYNC, compute_async_expiration};
use crate::fiber::{FiberArena, FiberId, FiberKind, Mode, RootId, StateNode};
use crate::host_config::{HostConfig, HostNode};
use crate::host_context::HostContextStack;
use crate::hydration::HydrationState;
use crate::profiler::ProfilerTimer;
use crate::scheduler::{CellGuard, Runtime, ScheduledUpdate};
use crate::update_queue::{Update, UpdateCallback, UpdateKind, enqueue_update};
use crate::work_loop::WorkState;

/// Tunables. The defaults match what applications expect.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Render-phase re-renders of one component before giving up.
    pub re_render_limit: usize,
    /// Synchronous commits of one root inside one batch before giving up.
    pub nested_update_limit: usize,
    /// Put every new root in profile mode, so `Profiler` timings cover the
    /// whole tree.
    pub profile: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            re_render_limit: 25,
            nested_update_limit: 50,
            profile: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RootOptions {
    /// Render with time slicing and async priorities instead of synchronously.
    pub concurrent: bool,
    /// Adopt the host nodes already in the container instead of creating new
    /// ones.
    pub hydrate: bool,
}

/// Per-container bookkeeping.
pub struct FiberRoot<H: HostConfig> {
    pub(crate) container: H::Container,
    pub(crate) current: FiberId,
    /// Persistent mode: the child set waiting to replace the container's.
    pub(crate) pending_children: Option<H::ChildSet>,
    pub(crate) context: Option<LegacyContext>,
    pub(crate) pending_context: Option<LegacyContext>,
    pub(crate) hydrate: bool,

    pub(crate) earliest_pending_time: ExpirationTime,
    pub(crate) latest_pending_time: ExpirationTime,
    pub(crate) did_error: bool,
    pub(crate) pending_commit_expiration_time: ExpirationTime,
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) next_expiration_time_to_work_on: ExpirationTime,
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) scheduled: bool,
}

impl<H: HostConfig> FiberRoot<H> {
    pub fn container(&self) -> &H::Container {
        &self.container
    }

    /// The committed host root fiber.
    pub fn current(&self) -> FiberId {
        self.current
    }

    /// Highest priority with work left, `NO_WORK` when idle.
    pub fn expiration_time(&self) -> ExpirationTime {
        self.expiration_time
    }
}

/// What observers learn about every commit.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitInfo {
    pub root: RootId,
    pub expiration_time: ExpirationTime,
    /// Fibers on the effect list, deletions included.
    pub effect_count: usize,
    /// Wall time spent in the three commit passes.
    pub duration_ms: f64,
    /// Fibers alive in the arena after the commit.
    pub live_fibers: usize,
}

type CommitObserver = Box<dyn FnMut(&CommitInfo)>;

pub struct Reconciler<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) config: ReconcilerConfig,
    pub(crate) fibers: FiberArena<H>,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H>>,
    pub(crate) runtime: Rc<Runtime>,

    pub(crate) legacy: LegacyContextStack,
    pub(crate) providers: ProviderStack,
    pub(crate) host_cx: HostContextStack<H>,
    pub(crate) hydration: HydrationState<H>,

    pub(crate) work: WorkState,
    pub(crate) profiler: ProfilerTimer,
    observers: Vec<CommitObserver>,

    /// Instances of error boundaries that already caught an error in this
    /// batch and have no `derived_state_from_error` to recover with.
    pub(crate) failed_boundaries: HashSet<u64>,
    /// Set by begin-work when the fiber being rendered has new input.
    pub(crate) did_receive_update: bool,
    pub(crate) start_time_ms: f64,
}

impl<H: HostConfig> Reconciler<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, ReconcilerConfig::default())
    }

    pub fn with_config(host: H, config: ReconcilerConfig) -> Self {
        let start_time_ms = host.now();
        let runtime = Runtime::new();
        runtime.current_time.set(ExpirationTime::from_ms(0.0));
        Self {
            host,
            config,
            fibers: FiberArena::default(),
            roots: SlotMap::with_key(),
            runtime,
            legacy: LegacyContextStack::default(),
            providers: ProviderStack::default(),
            host_cx: HostContextStack::default(),
            hydration: HydrationState::default(),
            work: WorkState::default(),
            profiler: ProfilerTimer::default(),
            observers: Vec::new(),
            failed_boundaries: HashSet::new(),
            did_receive_update: false,
            start_time_ms,
        }
    }

    // -- accessors --

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn fibers(&self) -> &FiberArena<H> {
        &self.fibers
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub fn root(&self, root: RootId) -> Option<&FiberRoot<H>> {
        self.roots.get(root)
    }

    /// The committed host root fiber of `root`.
    pub fn root_current(&self, root: RootId) -> Option<FiberId> {
        self.roots.get(root).map(|r| r.current)
    }

    pub fn roots(&self) -> impl Iterator<Item = RootId> + '_ {
        self.roots.keys()
    }

    /// Registers a callback invoked after every commit.
    pub fn on_commit(&mut self, observer: impl FnMut(&CommitInfo) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub(crate) fn notify_commit(&mut self, info: &CommitInfo) {
        for observer in &mut self.observers {
            observer(info);
        }
    }

    // -- containers --

    /// Creates a root for `container`. Nothing renders until
    /// [`Reconciler::update_container`].
    pub fn create_container(&mut self, container: H::Container, options: RootOptions) -> RootId {
        let mut mode = if options.concurrent {
            Mode::CONCURRENT | Mode::STRICT
        } else {
            Mode::empty()
        };
        if self.config.profile {
            mode |= Mode::PROFILE;
        }
        let fibers = &mut self.fibers;
        let root = self.roots.insert_with_key(|root| {
            let current = fibers.create_host_root(root, mode);
            FiberRoot {
                container,
                current,
                pending_children: None,
                context: None,
                pending_context: None,
                hydrate: options.hydrate,
                earliest_pending_time: NO_WORK,
                latest_pending_time: NO_WORK,
                did_error: false,
                pending_commit_expiration_time: NO_WORK,
                finished_work: None,
                next_expiration_time_to_work_on: NO_WORK,
                expiration_time: NO_WORK,
                scheduled: false,
            }
        });
        log::debug!("created root {root:?} (concurrent: {})", options.concurrent);
        root
    }

    /// Schedules `element` to be rendered into `root`. `parent` supplies the
    /// legacy context when rendering a subtree from inside another tree.
    /// `callback` runs once the update is committed.
    pub fn update_container(
        &mut self,
        root: RootId,
        element: impl Into<Node>,
        parent: Option<FiberId>,
        callback: Option<Box<dyn FnOnce() -> Result<(), crate::error::UserError>>>,
    ) -> Result<ExpirationTime, ReconcilerError> {
        let current = self.roots.get(root).ok_or(ReconcilerError::UnknownRoot)?.current;
        self.begin_entry()?;
        let expiration_time = self.runtime.compute_expiration_for_fiber(self.fibers[current].mode);
        let context = self.context_for_subtree(parent);
        let r = &mut self.roots[root];
        if r.context.is_none() {
            r.context = Some(context);
        } else {
            r.pending_context = Some(context);
        }

        let element = element.into();
        let payload: crate::update_queue::Payload = Rc::new(move |_: &dyn Any, _| {
            Some(Rc::new(crate::update_queue::RootState {
                element: element.clone(),
            }) as Rc<dyn Any>)
        });
        let mut update = Update::new(expiration_time, UpdateKind::Update(payload));
        if let Some(callback) = callback {
            update = update.with_callback(UpdateCallback::Fn(std::cell::RefCell::new(Some(callback))));
        }
        self.flush_passive_effects_internal()?;
        enqueue_update(&mut self.fibers, current, Rc::new(update));
        self.schedule_work(current, expiration_time)?;
        self.finish_entry()?;
        Ok(expiration_time)
    }

    /// Legacy-style render: unbatched, then flushed synchronously.
    pub fn render(&mut self, root: RootId, element: impl Into<Node>) -> Result<(), ReconcilerError> {
        let element = element.into();
        self.unbatched_updates(|r| r.update_container(root, element, None, None))?;
        Ok(())
    }

    /// Renders nothing into `root` and forgets it once the unmount commits.
    pub fn unmount(&mut self, root: RootId) -> Result<(), ReconcilerError> {
        if !self.roots.contains_key(root) {
            return Err(ReconcilerError::UnknownRoot);
        }
        self.unbatched_updates(|r| r.update_container(root, Node::Empty, None, None))?;
        if self.roots[root].expiration_time == NO_WORK {
            if let Some(r) = self.roots.remove(root) {
                self.work.schedule.retain(|s| *s != root);
                self.fibers.release_subtree(r.current);
            }
        }
        Ok(())
    }

    /// The public instance of the root's first child: a class handle or the
    /// host's public instance.
    pub fn get_public_root_instance(&self, root: RootId) -> Option<RefTarget> {
        let current = self.roots.get(root)?.current;
        let child = self.fibers[current].child?;
        self.public_instance_of(child)
    }

    pub(crate) fn public_instance_of(&self, fiber: FiberId) -> Option<RefTarget> {
        match &self.fibers[fiber].state_node {
            StateNode::Instance(i) => Some(RefTarget::Host(Rc::from(self.host.public_instance(i)))),
            StateNode::Class(c) => Some(RefTarget::Instance(c.handle())),
            _ => None,
        }
    }

    /// The first host node rendered by a mounted class instance.
    pub fn find_host_instance(&self, handle: &InstanceHandle) -> Option<HostNode<H>> {
        let fiber = handle.fiber()?;
        let start = self.fibers.get(fiber)?;
        let mut stack: Vec<FiberId> = start.child.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(f) = self.fibers.get(id) else {
                continue;
            };
            if let Some(sibling) = f.sibling {
                stack.push(sibling);
            }
            if let Some(node) = f.host_node() {
                return Some(node);
            }
            if !matches!(f.kind, FiberKind::HostPortal)
                && let Some(child) = f.child
            {
                stack.push(child);
            }
        }
        None
    }

    /// The legacy context visible at `parent`, or the empty context.
    pub fn context_for_subtree(&self, parent: Option<FiberId>) -> LegacyContext {
        let Some(mut node) = parent else {
            return self.legacy.empty();
        };
        loop {
            let Some(f) = self.fibers.get(node) else {
                return self.legacy.empty();
            };
            match &f.kind {
                FiberKind::HostRoot => {
                    if let StateNode::Root(r) = f.state_node
                        && let Some(root) = self.roots.get(r)
                    {
                        return root.context.clone().unwrap_or_else(|| self.legacy.empty());
                    }
                    return self.legacy.empty();
                }
                FiberKind::ClassComponent(ty) if ty.is_context_provider() => {
                    if let Some(merged) = f
                        .class_instance()
                        .and_then(|i| i.0.merged_child_context.borrow().clone())
                    {
                        return merged;
                    }
                }
                _ => {}
            }
            match f.parent {
                Some(p) => node = p,
                None => return self.legacy.empty(),
            }
        }
    }

    // -- batching --

    /// Runs `f` with updates batched: nothing renders until `f` returns.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        self.sample_time();
        let rt = self.runtime.clone();
        let out = {
            let _batching = CellGuard::set(&rt.is_batching_updates, true);
            let out = f(self);
            self.drain_inbox()?;
            out
        };
        self.finish_entry()?;
        Ok(out)
    }

    /// Inside a batch, lets updates scheduled by `f` render immediately.
    pub fn unbatched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.runtime.is_batching_updates.get() && !self.runtime.is_unbatching_updates.get() {
            let rt = self.runtime.clone();
            let _unbatching = CellGuard::set(&rt.is_unbatching_updates, true);
            return f(self);
        }
        f(self)
    }

    /// Runs a discrete user interaction. Updates get interactive priority, and
    /// interactive updates still pending from a previous interaction are
    /// flushed first.
    pub fn interactive_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        self.sample_time();
        let rt = self.runtime.clone();
        let lowest = rt.lowest_priority_pending_interactive.get();
        if !rt.is_batching_updates.get() && !rt.is_rendering.get() && lowest != NO_WORK {
            self.drain_inbox()?;
            self.perform_work(lowest, false)?;
            rt.lowest_priority_pending_interactive.set(NO_WORK);
        }
        let out = {
            let _interactive = CellGuard::set(&rt.is_batching_interactive_updates, true);
            let _batching = CellGuard::set(&rt.is_batching_updates, true);
            let out = f(self);
            self.drain_inbox()?;
            out
        };
        self.finish_entry()?;
        Ok(out)
    }

    /// Flushes interactive updates left over from earlier interactions.
    pub fn flush_interactive_updates(&mut self) -> Result<(), ReconcilerError> {
        let rt = self.runtime.clone();
        let lowest = rt.lowest_priority_pending_interactive.get();
        if !rt.is_rendering.get() && lowest != NO_WORK {
            self.begin_entry()?;
            self.perform_work(lowest, false)?;
            rt.lowest_priority_pending_interactive.set(NO_WORK);
        }
        Ok(())
    }

    /// Runs `f` in a batch and renders everything it scheduled synchronously
    /// before returning. Not allowed while rendering.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        if self.runtime.is_rendering.get() {
            return Err(crate::error::Invariant::Other(
                "flush_sync was called from inside a lifecycle method",
            )
            .into());
        }
        self.sample_time();
        let rt = self.runtime.clone();
        let out = {
            let _batching = CellGuard::set(&rt.is_batching_updates, true);
            let out = rt.with_expiration_context(SYNC, || f(self));
            self.drain_inbox()?;
            out
        };
        self.drain_inbox()?;
        self.perform_sync_work()?;
        Ok(out)
    }

    /// Gives every update scheduled by `f` synchronous priority.
    pub fn sync_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        self.sample_time();
        let rt = self.runtime.clone();
        let out = rt.with_expiration_context(SYNC, || f(self));
        self.drain_inbox()?;
        self.finish_entry()?;
        Ok(out)
    }

    /// Gives every update scheduled by `f` low (async) priority.
    pub fn deferred_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        let now = self.request_current_time();
        let rt = self.runtime.clone();
        let out = rt.with_expiration_context(compute_async_expiration(now), || f(self));
        self.drain_inbox()?;
        self.finish_entry()?;
        Ok(out)
    }

    /// Processes updates dispatched since the last entry point and renders
    /// whatever became synchronous.
    pub fn flush_updates(&mut self) -> Result<(), ReconcilerError> {
        self.begin_entry()?;
        self.finish_entry()
    }

    /// Host callback for [`crate::host_config::CallbackKind::Work`].
    pub fn perform_scheduled_work(&mut self) -> Result<(), ReconcilerError> {
        self.work.callback = None;
        self.begin_entry()?;
        self.perform_async_work()?;
        self.finish_entry()
    }

    /// Host callback for [`crate::host_config::CallbackKind::PassiveEffects`].
    /// Safe to call at any time; does nothing when no passive effects wait.
    pub fn flush_passive_effects(&mut self) -> Result<(), ReconcilerError> {
        self.sample_time();
        {
            let rt = self.runtime.clone();
            let _batching = CellGuard::set(&rt.is_batching_updates, true);
            self.flush_passive_effects_internal()?;
            self.drain_inbox()?;
        }
        self.finish_entry()
    }

    // -- entry point plumbing --

    fn sample_time(&mut self) {
        if !self.runtime.is_rendering.get() {
            self.request_current_time();
        }
    }

    pub(crate) fn begin_entry(&mut self) -> Result<(), ReconcilerError> {
        self.sample_time();
        self.drain_inbox()
    }

    pub(crate) fn finish_entry(&mut self) -> Result<(), ReconcilerError> {
        let rt = &self.runtime;
        if !rt.is_batching_updates.get() && !rt.is_rendering.get() {
            self.perform_sync_work()?;
        }
        Ok(())
    }

    /// Turns everything in the inbox into scheduled work. Runs as a batch so
    /// nothing renders until the caller decides to.
    pub(crate) fn drain_inbox(&mut self) -> Result<(), ReconcilerError> {
        if !self.runtime.has_pending_updates() {
            return Ok(());
        }
        let rt = self.runtime.clone();
        let _batching = CellGuard::set(&rt.is_batching_updates, true);
        let _unbatching = CellGuard::set(&rt.is_unbatching_updates, false);
        self.flush_passive_effects_internal()?;
        loop {
            let inbox = rt.take_inbox();
            if inbox.is_empty() {
                break;
            }
            for update in inbox {
                self.apply_scheduled_update(update)?;
            }
        }
        Ok(())
    }

    fn apply_scheduled_update(&mut self, update: ScheduledUpdate) -> Result<(), ReconcilerError> {
        match update {
            ScheduledUpdate::Hook {
                fiber,
                expiration_time,
                eager,
                seq,
            } => {
                let Some(f) = self.fibers.get(fiber) else {
                    log::warn!(
                        "can't perform a state update on an unmounted component; this is a no-op"
                    );
                    return Ok(());
                };
                let idle = f.expiration_time == NO_WORK
                    && f.alternate
                        .and_then(|a| self.fibers.get(a))
                        .is_none_or(|a| a.expiration_time == NO_WORK);
                if idle && eager.compute_eager(seq) {
                    log::trace!("state update on {} bailed out eagerly", f.display_name());
                    return Ok(());
                }
                self.schedule_work(fiber, expiration_time)
            }
            ScheduledUpdate::Class { fiber, update } => {
                if !self.fibers.contains(fiber) {
                    log::warn!(
                        "can't call set_state on a component that is not yet mounted or was unmounted; this is a no-op"
                    );
                    return Ok(());
                }
                let expiration_time = update.expiration_time;
                enqueue_update(&mut self.fibers, fiber, update);
                self.schedule_work(fiber, expiration_time)
            }
            ScheduledUpdate::Retry { boundary, wait } => self.retry_timed_out_boundary(boundary, wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;
    use crate::testing::MemoryHost;

    #[test]
    fn test_legacy_render_commits_synchronously() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let mut r = Reconciler::new(h);
        let root = r.create_container(container, RootOptions::default());
        r.render(root, host("div").attr("id", "a").child("hi")).unwrap();
        assert_eq!(r.host().render(container), "<div id=\"a\">hi</div>");
        assert_eq!(r.root(root).map(|x| x.expiration_time()), Some(NO_WORK));
    }

    #[test]
    fn test_concurrent_render_waits_for_callback() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let mut r = Reconciler::new(h);
        let root = r.create_container(
            container,
            RootOptions {
                concurrent: true,
                ..Default::default()
            },
        );
        r.update_container(root, host("p").child("x"), None, None).unwrap();
        assert_eq!(r.host().render(container), "");
        r.run_scheduled_tasks().unwrap();
        assert_eq!(r.host().render(container), "<p>x</p>");
    }

    #[test]
    fn test_unknown_root_is_an_error() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let mut r = Reconciler::new(h);
        let root = r.create_container(container, RootOptions::default());
        r.unmount(root).unwrap();
        assert!(matches!(
            r.render(root, Node::Empty),
            Err(ReconcilerError::UnknownRoot)
        ));
    }

    #[test]
    fn test_batched_updates_render_once_at_the_end() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let mut r = Reconciler::new(h);
        let root = r.create_container(container, RootOptions::default());
        r.batched_updates(|r| {
            r.update_container(root, host("a"), None, None).unwrap();
            assert_eq!(r.host().render(container), "");
            r.update_container(root, host("b"), None, None).unwrap();
        })
        .unwrap();
        assert_eq!(r.host().render(container), "<b></b>");
    }

    #[test]
    fn test_commit_observers_see_every_commit() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let mut r = Reconciler::new(h);
        let seen = Rc::new(std::cell::Cell::new(0));
        let s = seen.clone();
        r.on_commit(move |_| s.set(s.get() + 1));
        let root = r.create_container(container, RootOptions::default());
        r.render(root, "a").unwrap();
        r.render(root, "b").unwrap();
        assert_eq!(seen.get(), 2);
    }
}
