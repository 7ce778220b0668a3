//! Hooks: per-fiber state for function components.
//!
//! A function component receives a [`HookCx`] and calls hooks on it in a
//! fixed order. Each call claims the next slot of the fiber's hook list; the
//! list is rebuilt on every render from the current fiber's list, so the
//! kinds and count of hooks must match between renders. A mismatch is an
//! [`Invariant`] surfaced once the body returns.
//!
//! ```rust
//! use arbor_core::element::{FunctionComponent, host};
//!
//! let counter = FunctionComponent::new("Counter", |cx, _props| {
//!     let (count, set_count) = cx.use_state(|| 0i64);
//!     cx.use_effect(None, move || {
//!         log::debug!("rendered {count}");
//!         Ok(None)
//!     });
//!     let _ = set_count;
//!     Ok(host("span").child(count.to_string()).into())
//! });
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::context::{ContextReads, ProviderStack};
use crate::element::{Context, FunctionComponent, PropValue, Props, Ref, RefTarget};
use crate::error::{Invariant, RenderResult, RenderSignal, UserError};
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::fiber::{ContextDependencies, EffectTag, FiberId, FiberQueue, MemoizedState, Mode};
use crate::host_config::HostConfig;
use crate::reconciler::Reconciler;
use crate::scheduler::{EagerState, QueueId, Runtime, ScheduledUpdate};

/// Cleanup returned by an effect. Runs at most once.
#[derive(Clone)]
pub struct Dispose(Rc<RefCell<Option<Box<dyn FnOnce() -> Result<(), UserError>>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() -> Result<(), UserError> + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    pub fn run(&self) -> Result<(), UserError> {
        let f = self.0.borrow_mut().take();
        match f {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

/// Helper for effects whose only job is cleanup.
pub fn on_unmount(f: impl FnOnce() + 'static) -> EffectResult {
    Ok(Some(Dispose::new(move || {
        f();
        Ok(())
    })))
}

pub type EffectResult = Result<Option<Dispose>, UserError>;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct HookEffectTag: u8 {
        const UNMOUNT_SNAPSHOT = 1 << 1;
        const UNMOUNT_MUTATION = 1 << 2;
        const MOUNT_MUTATION = 1 << 3;
        const UNMOUNT_LAYOUT = 1 << 4;
        const MOUNT_LAYOUT = 1 << 5;
        const MOUNT_PASSIVE = 1 << 6;
        const UNMOUNT_PASSIVE = 1 << 7;
    }
}

pub(crate) struct Effect {
    pub(crate) tag: HookEffectTag,
    create: RefCell<Option<Box<dyn FnOnce() -> EffectResult>>>,
    /// Shared with the effect this one replaced, so an update's unmount runs
    /// the cleanup the previous mount produced.
    destroy: Rc<RefCell<Option<Dispose>>>,
    deps: Option<Rc<[PropValue]>>,
}

impl Effect {
    pub(crate) fn unmount(&self) -> Result<(), UserError> {
        let destroy = self.destroy.borrow_mut().take();
        match destroy {
            Some(d) => d.run(),
            None => Ok(()),
        }
    }

    pub(crate) fn mount(&self) -> Result<(), UserError> {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let destroy = create()?;
            *self.destroy.borrow_mut() = destroy;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HookKind {
    State,
    Reducer,
    Effect,
    LayoutEffect,
    MutationEffect,
    ImperativeHandle,
    Memo,
    Callback,
    Ref,
}

impl HookKind {
    fn name(self) -> &'static str {
        match self {
            HookKind::State => "use_state",
            HookKind::Reducer => "use_reducer",
            HookKind::Effect => "use_effect",
            HookKind::LayoutEffect => "use_layout_effect",
            HookKind::MutationEffect => "use_mutation_effect",
            HookKind::ImperativeHandle => "use_imperative_handle",
            HookKind::Memo => "use_memo",
            HookKind::Callback => "use_callback",
            HookKind::Ref => "use_ref",
        }
    }
}

#[derive(Clone)]
pub(crate) enum HookState {
    /// A `ReducerSlot<S, A>`.
    Reducer(Rc<dyn Any>),
    Effect(Rc<Effect>),
    Memo {
        value: Rc<dyn Any>,
        deps: Option<Rc<[PropValue]>>,
    },
    Ref(Rc<dyn Any>),
}

#[derive(Clone)]
pub struct Hook {
    pub(crate) kind: HookKind,
    pub(crate) state: HookState,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())
    }
}

type ReducerFn<S, A> = dyn Fn(&S, &A) -> S;

struct Pending<S, A> {
    seq: u64,
    expiration_time: ExpirationTime,
    action: A,
    eager: RefCell<Option<(Rc<ReducerFn<S, A>>, S)>>,
}

/// Every action dispatched to one state hook, in dispatch order. Shared by
/// the current and work-in-progress hook, trimmed once the committed hook no
/// longer needs the oldest entries.
pub(crate) struct ReducerQueue<S, A> {
    id: QueueId,
    log: RefCell<VecDeque<Rc<Pending<S, A>>>>,
    next_seq: Cell<u64>,
    last_rendered_reducer: RefCell<Option<Rc<ReducerFn<S, A>>>>,
    last_rendered_state: RefCell<Option<S>>,
}

impl<S: Clone, A> ReducerQueue<S, A> {
    fn push(&self, expiration_time: ExpirationTime, action: A) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.log.borrow_mut().push_back(Rc::new(Pending {
            seq,
            expiration_time,
            action,
            eager: RefCell::new(None),
        }));
        seq
    }

    fn pending_from(&self, seq: u64) -> Vec<Rc<Pending<S, A>>> {
        self.log
            .borrow()
            .iter()
            .filter(|p| p.seq >= seq)
            .cloned()
            .collect()
    }

    fn compact_below(&self, seq: u64) {
        let mut log = self.log.borrow_mut();
        while log.front().is_some_and(|p| p.seq < seq) {
            log.pop_front();
        }
    }
}

impl<S: Clone + PartialEq + 'static, A: 'static> EagerState for ReducerQueue<S, A> {
    fn compute_eager(&self, seq: u64) -> bool {
        let Some(reducer) = self.last_rendered_reducer.borrow().clone() else {
            return false;
        };
        let Some(current) = self.last_rendered_state.borrow().clone() else {
            return false;
        };
        let Some(pending) = self.log.borrow().iter().find(|p| p.seq == seq).cloned() else {
            return false;
        };
        let eager = reducer(&current, &pending.action);
        let same = eager == current;
        *pending.eager.borrow_mut() = Some((reducer, eager));
        same
    }
}

trait ActionLog<A> {
    fn id(&self) -> QueueId;
    fn push_action(&self, expiration_time: ExpirationTime, action: A) -> u64;
}

impl<S: Clone, A> ActionLog<A> for ReducerQueue<S, A> {
    fn id(&self) -> QueueId {
        self.id
    }

    fn push_action(&self, expiration_time: ExpirationTime, action: A) -> u64 {
        self.push(expiration_time, action)
    }
}

/// Sends actions to a state or reducer hook. Cheap to clone, safe to keep
/// after the component unmounts (dispatches are then dropped with a warning).
pub struct Dispatch<A> {
    fiber: FiberId,
    mode: Mode,
    queue: Rc<dyn ActionLog<A>>,
    eager: Rc<dyn EagerState>,
    runtime: Weak<Runtime>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber,
            mode: self.mode,
            queue: self.queue.clone(),
            eager: self.eager.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<A: 'static> Dispatch<A> {
    pub fn dispatch(&self, action: A) {
        let Some(runtime) = self.runtime.upgrade() else {
            log::warn!("dispatch on a hook whose reconciler is gone");
            return;
        };
        if runtime.is_rendering_fiber(self.fiber) {
            runtime.push_render_phase_update(self.queue.id(), Box::new(action));
            return;
        }
        let expiration_time = runtime.compute_expiration_for_fiber(self.mode);
        let seq = self.queue.push_action(expiration_time, action);
        runtime.enqueue(ScheduledUpdate::Hook {
            fiber: self.fiber,
            expiration_time,
            eager: self.eager.clone(),
            seq,
        });
    }
}

pub enum StateAction<S> {
    Set(S),
    Update(Box<dyn Fn(&S) -> S>),
}

pub type SetState<S> = Dispatch<StateAction<S>>;

impl<S: 'static> Dispatch<StateAction<S>> {
    pub fn set(&self, value: S) {
        self.dispatch(StateAction::Set(value));
    }

    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(StateAction::Update(Box::new(f)));
    }
}

fn basic_state_reducer<S: Clone>(state: &S, action: &StateAction<S>) -> S {
    match action {
        StateAction::Set(v) => v.clone(),
        StateAction::Update(f) => f(state),
    }
}

struct ReducerSlot<S, A> {
    memoized: S,
    base_state: S,
    /// Sequence number of the first action not folded into `base_state`.
    base_seq: u64,
    queue: Rc<ReducerQueue<S, A>>,
    dispatch: Dispatch<A>,
}

fn deps_equal(next: Option<&[PropValue]>, prev: Option<&[PropValue]>) -> bool {
    let (Some(next), Some(prev)) = (next, prev) else {
        return false;
    };
    if next.len() != prev.len() {
        log::warn!(
            "hook dependency list changed size between renders ({} -> {}); keep it constant",
            prev.len(),
            next.len()
        );
    }
    next.iter().zip(prev).all(|(a, b)| a.same_value_zero(b))
}

/// Render-time handle for a function component's hooks.
pub struct HookCx<'a> {
    fiber: FiberId,
    mode: Mode,
    runtime: &'a Rc<Runtime>,
    providers: &'a ProviderStack,
    reads: ContextReads,
    render_expiration_time: ExpirationTime,

    current_hooks: Option<Rc<[Hook]>>,
    prev_pass: Option<Rc<[Hook]>>,
    hooks: Vec<Hook>,
    index: usize,
    is_rerender: bool,

    effects: Vec<Rc<Effect>>,
    fiber_effect: EffectTag,
    remaining_expiration_time: ExpirationTime,
    did_receive_update: bool,
    error: Option<Invariant>,
}

impl<'a> HookCx<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        fiber: FiberId,
        mode: Mode,
        runtime: &'a Rc<Runtime>,
        providers: &'a ProviderStack,
        render_expiration_time: ExpirationTime,
        current_hooks: Option<Rc<[Hook]>>,
        prev_pass: Option<Rc<[Hook]>>,
    ) -> Self {
        let is_rerender = prev_pass.is_some();
        Self {
            fiber,
            mode,
            runtime,
            providers,
            reads: ContextReads::default(),
            render_expiration_time,
            current_hooks,
            prev_pass,
            hooks: Vec::new(),
            index: 0,
            is_rerender,
            effects: Vec::new(),
            fiber_effect: EffectTag::empty(),
            remaining_expiration_time: NO_WORK,
            did_receive_update: false,
            error: None,
        }
    }

    fn fail(&mut self, error: Invariant) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// The hook this call updates from, or `None` to mount a fresh one.
    fn next_hook(&mut self, kind: HookKind) -> Option<Hook> {
        let index = self.index;
        self.index += 1;
        let source = if self.is_rerender {
            self.prev_pass.as_ref()
        } else {
            self.current_hooks.as_ref()
        }?;
        match source.get(index) {
            None => {
                self.fail(Invariant::TooManyHooks);
                None
            }
            Some(hook) if hook.kind != kind => {
                let expected = hook.kind.name();
                self.fail(Invariant::HookKindMismatch {
                    index,
                    expected,
                    found: kind.name(),
                });
                None
            }
            Some(hook) => Some(hook.clone()),
        }
    }

    /// The committed effect at the slot just claimed, if any.
    fn current_effect(&self) -> Option<Rc<Effect>> {
        let hook = self.current_hooks.as_ref()?.get(self.index - 1)?;
        match &hook.state {
            HookState::Effect(e) => Some(e.clone()),
            _ => None,
        }
    }

    fn mount_reducer<S, A>(&mut self, kind: HookKind, reducer: Rc<ReducerFn<S, A>>, initial: S) -> (S, Dispatch<A>)
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let queue = Rc::new(ReducerQueue {
            id: self.runtime.next_queue_id(),
            log: RefCell::new(VecDeque::new()),
            next_seq: Cell::new(0),
            last_rendered_reducer: RefCell::new(Some(reducer)),
            last_rendered_state: RefCell::new(Some(initial.clone())),
        });
        let dispatch = Dispatch {
            fiber: self.fiber,
            mode: self.mode,
            queue: queue.clone(),
            eager: queue.clone(),
            runtime: Rc::downgrade(self.runtime),
        };
        let slot = ReducerSlot {
            memoized: initial.clone(),
            base_state: initial.clone(),
            base_seq: 0,
            queue,
            dispatch: dispatch.clone(),
        };
        self.hooks.push(Hook {
            kind,
            state: HookState::Reducer(Rc::new(slot)),
        });
        (initial, dispatch)
    }

    fn update_reducer<S, A>(
        &mut self,
        kind: HookKind,
        hook: Hook,
        reducer: Option<Rc<ReducerFn<S, A>>>,
    ) -> Option<(S, Dispatch<A>)>
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let HookState::Reducer(any) = &hook.state else {
            return None;
        };
        let slot = any.downcast_ref::<ReducerSlot<S, A>>()?;
        let queue = slot.queue.clone();
        let reducer = match reducer {
            Some(r) => r,
            None => queue.last_rendered_reducer.borrow().clone()?,
        };

        let next = if self.is_rerender {
            self.rerender_reducer(slot, &reducer)
        } else {
            self.process_reducer(slot, &reducer)
        };
        *queue.last_rendered_reducer.borrow_mut() = Some(reducer);
        *queue.last_rendered_state.borrow_mut() = Some(next.memoized.clone());
        let result = (next.memoized.clone(), next.dispatch.clone());
        self.hooks.push(Hook {
            kind,
            state: HookState::Reducer(Rc::new(next)),
        });
        Some(result)
    }

    fn process_reducer<S, A>(&mut self, slot: &ReducerSlot<S, A>, reducer: &Rc<ReducerFn<S, A>>) -> ReducerSlot<S, A>
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let queue = &slot.queue;
        // the committed hook is where a restarted render would begin
        queue.compact_below(slot.base_seq);

        let mut state = slot.base_state.clone();
        let mut new_base: Option<(S, u64)> = None;
        for pending in queue.pending_from(slot.base_seq) {
            if pending.expiration_time < self.render_expiration_time {
                if new_base.is_none() {
                    new_base = Some((state.clone(), pending.seq));
                }
                if pending.expiration_time > self.remaining_expiration_time {
                    self.remaining_expiration_time = pending.expiration_time;
                }
                continue;
            }
            let eager = pending
                .eager
                .borrow()
                .as_ref()
                .filter(|(r, _)| Rc::ptr_eq(r, reducer))
                .map(|(_, s)| s.clone());
            state = match eager {
                Some(s) => s,
                None => reducer(&state, &pending.action),
            };
        }
        let (base_state, base_seq) = new_base.unwrap_or_else(|| (state.clone(), queue.next_seq.get()));
        if state != slot.memoized {
            self.did_receive_update = true;
        }
        ReducerSlot {
            memoized: state,
            base_state,
            base_seq,
            queue: queue.clone(),
            dispatch: slot.dispatch.clone(),
        }
    }

    fn rerender_reducer<S, A>(&mut self, slot: &ReducerSlot<S, A>, reducer: &Rc<ReducerFn<S, A>>) -> ReducerSlot<S, A>
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let mut state = slot.memoized.clone();
        let mut base_state = slot.base_state.clone();
        if let Some(actions) = self.runtime.take_render_phase_updates(slot.queue.id) {
            for action in actions {
                match action.downcast::<A>() {
                    Ok(action) => state = reducer(&state, &action),
                    Err(_) => log::error!("render-phase update with an unexpected action type"),
                }
            }
            if state != slot.memoized {
                self.did_receive_update = true;
            }
            if slot.base_seq == slot.queue.next_seq.get() {
                base_state = state.clone();
            }
        }
        ReducerSlot {
            memoized: state,
            base_state,
            base_seq: slot.base_seq,
            queue: slot.queue.clone(),
            dispatch: slot.dispatch.clone(),
        }
    }

    pub fn use_state<S>(&mut self, init: impl FnOnce() -> S) -> (S, SetState<S>)
    where
        S: Clone + PartialEq + 'static,
    {
        let kind = HookKind::State;
        if let Some(hook) = self.next_hook(kind)
            && let Some(out) = self.update_reducer::<S, StateAction<S>>(kind, hook, None)
        {
            return out;
        }
        let reducer: Rc<ReducerFn<S, StateAction<S>>> = Rc::new(basic_state_reducer::<S>);
        self.mount_reducer(kind, reducer, init())
    }

    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, &A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<A>)
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let kind = HookKind::Reducer;
        let reducer: Rc<ReducerFn<S, A>> = Rc::new(reducer);
        if let Some(hook) = self.next_hook(kind)
            && let Some(out) = self.update_reducer(kind, hook, Some(reducer.clone()))
        {
            return out;
        }
        self.mount_reducer(kind, reducer, init())
    }

    fn effect_impl(
        &mut self,
        kind: HookKind,
        fiber_tag: EffectTag,
        hook_tag: HookEffectTag,
        deps: Option<Vec<PropValue>>,
        create: Box<dyn FnOnce() -> EffectResult>,
    ) {
        let deps: Option<Rc<[PropValue]>> = deps.map(Rc::from);
        let _ = self.next_hook(kind);
        let prev = self.current_effect();
        let (tag, destroy) = match &prev {
            Some(prev) if deps_equal(deps.as_deref(), prev.deps.as_deref()) => {
                (HookEffectTag::empty(), prev.destroy.clone())
            }
            Some(prev) => {
                self.fiber_effect |= fiber_tag;
                (hook_tag, prev.destroy.clone())
            }
            None => {
                self.fiber_effect |= fiber_tag;
                (hook_tag, Rc::new(RefCell::new(None)))
            }
        };
        let effect = Rc::new(Effect {
            tag,
            create: RefCell::new(Some(create)),
            destroy,
            deps,
        });
        self.effects.push(effect.clone());
        self.hooks.push(Hook {
            kind,
            state: HookState::Effect(effect),
        });
    }

    /// Runs `create` after the commit, once the host has painted. With
    /// `deps`, only when one of them changed since the last commit.
    pub fn use_effect(&mut self, deps: Option<Vec<PropValue>>, create: impl FnOnce() -> EffectResult + 'static) {
        self.effect_impl(
            HookKind::Effect,
            EffectTag::UPDATE | EffectTag::PASSIVE,
            HookEffectTag::UNMOUNT_PASSIVE | HookEffectTag::MOUNT_PASSIVE,
            deps,
            Box::new(create),
        );
    }

    /// Runs `create` synchronously in the commit's layout pass.
    pub fn use_layout_effect(&mut self, deps: Option<Vec<PropValue>>, create: impl FnOnce() -> EffectResult + 'static) {
        self.effect_impl(
            HookKind::LayoutEffect,
            EffectTag::UPDATE,
            HookEffectTag::UNMOUNT_MUTATION | HookEffectTag::MOUNT_LAYOUT,
            deps,
            Box::new(create),
        );
    }

    /// Runs `create` during the mutation pass; its cleanup runs before
    /// mutations, in the snapshot pass.
    pub fn use_mutation_effect(&mut self, deps: Option<Vec<PropValue>>, create: impl FnOnce() -> EffectResult + 'static) {
        self.effect_impl(
            HookKind::MutationEffect,
            EffectTag::UPDATE | EffectTag::SNAPSHOT,
            HookEffectTag::UNMOUNT_SNAPSHOT | HookEffectTag::MOUNT_MUTATION,
            deps,
            Box::new(create),
        );
    }

    /// Exposes `create()`'s value through `ref_` instead of the component
    /// instance.
    pub fn use_imperative_handle<T: 'static>(
        &mut self,
        ref_: Option<&Ref>,
        deps: Option<Vec<PropValue>>,
        create: impl FnOnce() -> T + 'static,
    ) {
        let ref_ = ref_.cloned();
        self.effect_impl(
            HookKind::ImperativeHandle,
            EffectTag::UPDATE,
            HookEffectTag::UNMOUNT_MUTATION | HookEffectTag::MOUNT_LAYOUT,
            deps,
            Box::new(move || {
                let Some(ref_) = ref_ else {
                    return Ok(None);
                };
                ref_.set(Some(RefTarget::Handle(Rc::new(create()))))?;
                Ok(Some(Dispose::new(move || ref_.set(None))))
            }),
        );
    }

    pub fn use_memo<T: 'static>(&mut self, deps: Option<Vec<PropValue>>, compute: impl FnOnce() -> T) -> Rc<T> {
        self.memo_impl(HookKind::Memo, deps, || Rc::new(compute()))
    }

    /// Returns the same callback until a dependency changes.
    pub fn use_callback<F: 'static>(&mut self, deps: Option<Vec<PropValue>>, f: F) -> Rc<F> {
        self.memo_impl(HookKind::Callback, deps, || Rc::new(f))
    }

    fn memo_impl<T: 'static>(
        &mut self,
        kind: HookKind,
        deps: Option<Vec<PropValue>>,
        compute: impl FnOnce() -> Rc<T>,
    ) -> Rc<T> {
        let deps: Option<Rc<[PropValue]>> = deps.map(Rc::from);
        if let Some(hook) = self.next_hook(kind)
            && let HookState::Memo { value, deps: prev_deps } = &hook.state
            && deps_equal(deps.as_deref(), prev_deps.as_deref())
            && let Ok(value) = value.clone().downcast::<T>()
        {
            self.hooks.push(Hook {
                kind,
                state: HookState::Memo {
                    value: value.clone(),
                    deps,
                },
            });
            return value;
        }
        let value = compute();
        self.hooks.push(Hook {
            kind,
            state: HookState::Memo {
                value: value.clone(),
                deps,
            },
        });
        value
    }

    /// A mutable cell that lives as long as the component.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let kind = HookKind::Ref;
        let cell = match self.next_hook(kind) {
            Some(Hook {
                state: HookState::Ref(cell),
                ..
            }) => cell.downcast::<RefCell<T>>().ok(),
            _ => None,
        };
        let cell = cell.unwrap_or_else(|| Rc::new(RefCell::new(init())));
        self.hooks.push(Hook {
            kind,
            state: HookState::Ref(cell.clone()),
        });
        cell
    }

    /// Reads the nearest provided value of `context` and re-renders this
    /// component when it changes.
    pub fn use_context<T: PartialEq + 'static>(&mut self, context: &Context<T>) -> Rc<T> {
        self.reads.record(context.key().id());
        self.providers
            .read(context.key())
            .downcast::<T>()
            .unwrap_or_else(|_| context.default_value())
    }

    /// Labels the hook for debugging tools. Claims no slot.
    pub fn use_debug_value(&mut self, _value: impl fmt::Debug) {}

    pub fn render_expiration_time(&self) -> ExpirationTime {
        self.render_expiration_time
    }
}

/// Output of a finished hooks render, written back onto the fiber.
struct HooksOutput {
    hooks: Vec<Hook>,
    effects: Vec<Rc<Effect>>,
    fiber_effect: EffectTag,
    remaining_expiration_time: ExpirationTime,
    did_receive_update: bool,
    reads: ContextReads,
}

impl<H: HostConfig> Reconciler<H> {
    /// Runs a function component body with hooks, replaying it while it
    /// schedules updates on itself during render.
    pub(crate) fn render_with_hooks(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &FunctionComponent,
        props: &Props,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult {
        let current_hooks = current
            .and_then(|c| self.fibers[c].memoized_state.hooks().cloned())
            .filter(|h| !h.is_empty());
        let mode = self.fibers[wip].mode;
        self.fibers[wip].expiration_time = NO_WORK;

        let mut prev_pass: Option<Rc<[Hook]>> = None;
        let mut passes = 0;
        let result = loop {
            let mut cx = HookCx::new(
                wip,
                mode,
                &self.runtime,
                &self.providers,
                render_expiration_time,
                current_hooks.clone(),
                prev_pass.take(),
            );
            self.runtime.rendering_fiber.set(Some((wip, current)));
            self.runtime.did_schedule_render_phase_update.set(false);
            let rendered = component.call(&mut cx, props);
            self.runtime.rendering_fiber.set(None);

            let children = match rendered {
                Ok(children) => children,
                Err(signal) => break Err(signal),
            };
            if let Some(error) = cx.error.take() {
                break Err(RenderSignal::Fatal(error));
            }
            if let Some(expected) = current_hooks.as_ref().map(|h| h.len())
                && cx.index < expected
            {
                break Err(RenderSignal::Fatal(Invariant::TooFewHooks));
            }
            if self.runtime.did_schedule_render_phase_update.get() {
                passes += 1;
                if passes >= self.config.re_render_limit {
                    break Err(RenderSignal::Fatal(Invariant::TooManyReRenders(
                        self.config.re_render_limit,
                    )));
                }
                prev_pass = Some(Rc::from(cx.hooks));
                continue;
            }
            let output = HooksOutput {
                hooks: cx.hooks,
                effects: cx.effects,
                fiber_effect: cx.fiber_effect,
                remaining_expiration_time: cx.remaining_expiration_time,
                did_receive_update: cx.did_receive_update,
                reads: cx.reads,
            };
            self.finish_hooks(wip, output);
            break Ok(children);
        };
        self.runtime.clear_render_phase_updates();
        result
    }

    fn finish_hooks(&mut self, wip: FiberId, output: HooksOutput) {
        let fiber = &mut self.fibers[wip];
        fiber.memoized_state = if output.hooks.is_empty() {
            MemoizedState::None
        } else {
            MemoizedState::Hooks(Rc::from(output.hooks))
        };
        fiber.expiration_time = output.remaining_expiration_time;
        fiber.update_queue = if output.effects.is_empty() {
            FiberQueue::None
        } else {
            FiberQueue::Effects(Rc::from(output.effects))
        };
        fiber.effect_tag |= output.fiber_effect;
        self.merge_context_reads(wip, output.reads);
        if output.did_receive_update {
            self.did_receive_update = true;
        }
    }

    pub(crate) fn merge_context_reads(&mut self, wip: FiberId, reads: ContextReads) {
        if reads.contexts.is_empty() {
            return;
        }
        let deps = self.fibers[wip]
            .dependencies
            .get_or_insert_with(ContextDependencies::default);
        for id in reads.contexts {
            if !deps.contexts.contains(&id) {
                deps.contexts.push(id);
            }
        }
    }

    /// Skips a function component whose hooks produced nothing new.
    pub(crate) fn bailout_hooks(&mut self, current: FiberId, wip: FiberId, render_expiration_time: ExpirationTime) {
        let queue = self.fibers[current].update_queue.clone();
        let fiber = &mut self.fibers[wip];
        fiber.update_queue = queue;
        fiber.effect_tag.remove(EffectTag::PASSIVE | EffectTag::UPDATE);
        if self.fibers[current].expiration_time <= render_expiration_time {
            self.fibers[current].expiration_time = NO_WORK;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProviderStack;
    use slotmap::SlotMap;

    fn fiber_id() -> FiberId {
        let mut ids: SlotMap<FiberId, ()> = SlotMap::with_key();
        ids.insert(())
    }

    #[test]
    fn test_deps_compare_same_value_zero() {
        let a = [PropValue::Int(1), PropValue::Float(f64::NAN)];
        let b = [PropValue::Int(1), PropValue::Float(f64::NAN)];
        assert!(deps_equal(Some(&a), Some(&b)));
        assert!(!deps_equal(None, Some(&b)));
        assert!(!deps_equal(Some(&a[..1]), Some(&[PropValue::Int(2)][..])));
    }

    #[test]
    fn test_mount_then_update_keeps_state_slot() {
        let runtime = Runtime::new();
        let providers = ProviderStack::default();
        let fiber = fiber_id();
        let exp = crate::expiration::SYNC;

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, None, None);
        let (n, set) = cx.use_state(|| 1);
        assert_eq!(n, 1);
        let hooks: Rc<[Hook]> = Rc::from(cx.hooks);

        set.set(5);
        assert!(runtime.has_pending_updates());

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, Some(hooks), None);
        let (n, _) = cx.use_state(|| 1);
        assert_eq!(n, 5);
        assert!(cx.did_receive_update);
        assert!(cx.error.is_none());
    }

    #[test]
    fn test_kind_mismatch_is_detected() {
        let runtime = Runtime::new();
        let providers = ProviderStack::default();
        let fiber = fiber_id();
        let exp = crate::expiration::SYNC;

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, None, None);
        cx.use_state(|| 0);
        let hooks: Rc<[Hook]> = Rc::from(cx.hooks);

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, Some(hooks), None);
        cx.use_ref(|| 0);
        assert!(matches!(cx.error, Some(Invariant::HookKindMismatch { index: 0, .. })));
    }

    #[test]
    fn test_eager_state_bails_on_equal_value() {
        let runtime = Runtime::new();
        let providers = ProviderStack::default();
        let fiber = fiber_id();
        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, crate::expiration::SYNC, None, None);
        let (_, set) = cx.use_state(|| 3);
        set.set(3);
        let inbox = runtime.take_inbox();
        let Some(ScheduledUpdate::Hook { eager, seq, .. }) = inbox.front() else {
            panic!("expected a hook update");
        };
        assert!(eager.compute_eager(*seq));
    }

    #[test]
    fn test_effect_skipped_when_deps_unchanged() {
        let runtime = Runtime::new();
        let providers = ProviderStack::default();
        let fiber = fiber_id();
        let exp = crate::expiration::SYNC;

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, None, None);
        cx.use_effect(Some(vec![PropValue::Int(1)]), || Ok(None));
        assert!(cx.fiber_effect.contains(EffectTag::PASSIVE));
        let hooks: Rc<[Hook]> = Rc::from(cx.hooks);

        let mut cx = HookCx::new(fiber, Mode::empty(), &runtime, &providers, exp, Some(hooks), None);
        cx.use_effect(Some(vec![PropValue::Int(1)]), || Ok(None));
        assert!(cx.fiber_effect.is_empty());
        assert!(cx.effects[0].tag.is_empty());
    }
}
