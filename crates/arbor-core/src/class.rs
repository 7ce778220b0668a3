//! Class components: stateful instances with lifecycle methods.
//!
//! A [`Component`] is instantiated once per mounted position and shared by
//! both fibers of that position. Its state lives in the fiber's update queue
//! and is mirrored onto the instance before every lifecycle call, so
//! `ClassCx::state` always shows what the reconciler is working with.
//!
//! ```rust
//! use arbor_core::class::{ClassCx, Component, Updater};
//! use arbor_core::element::{host, Props};
//! use arbor_core::error::RenderResult;
//!
//! struct Clicker {
//!     updater: Updater<i64>,
//! }
//!
//! impl Component for Clicker {
//!     type State = i64;
//!
//!     fn create(_props: &Props, updater: Updater<i64>) -> Self {
//!         Clicker { updater }
//!     }
//!
//!     fn initial_state(&self, _props: &Props) -> i64 {
//!         0
//!     }
//!
//!     fn render(&mut self, cx: &ClassCx<'_, i64>) -> RenderResult {
//!         Ok(host("button").child(cx.state().to_string()).into())
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::LegacyContext;
use crate::element::{ContextKey, ElementBuilder, ElementType, PropValue, Props};
use crate::error::{RenderResult, RenderSignal, UserError};
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::fiber::{EffectTag, FiberId, FiberProps, MemoizedState, Mode, StateNode};
use crate::host_config::HostConfig;
use crate::reconciler::Reconciler;
use crate::scheduler::{Runtime, ScheduledUpdate};
use crate::update_queue::{
    Payload, Update, UpdateCallback, UpdateKind, process_update_queue,
};

/// Type-erased component state.
pub type StateRef = Rc<dyn Any>;

/// What a class sees while rendering or running a lifecycle.
pub struct ClassCx<'a, S> {
    props: &'a Props,
    state: &'a S,
    context: &'a LegacyContext,
    consumed: Option<&'a Rc<dyn Any>>,
}

impl<S> ClassCx<'_, S> {
    pub fn props(&self) -> &Props {
        self.props
    }

    pub fn state(&self) -> &S {
        self.state
    }

    /// The legacy context, masked to `context_types`.
    pub fn context(&self) -> &LegacyContext {
        self.context
    }

    /// The value of the context named by `context_type`.
    pub fn consumed<T: 'static>(&self) -> Option<&T> {
        self.consumed.and_then(|v| v.downcast_ref::<T>())
    }
}

pub trait Component: Sized + 'static {
    type State: Clone + 'static;

    /// Whether `derived_state_from_error` recovers from descendant errors.
    const DERIVES_STATE_FROM_ERROR: bool = false;
    /// Whether `did_catch` should be called for descendant errors.
    const HAS_DID_CATCH: bool = false;
    /// Whether `snapshot_before_update` should run before mutations.
    const HAS_SNAPSHOT: bool = false;

    fn create(props: &Props, updater: Updater<Self::State>) -> Self;

    fn initial_state(&self, props: &Props) -> Self::State;

    /// Legacy context keys this class reads.
    fn context_types() -> &'static [&'static str] {
        &[]
    }

    /// Legacy context keys this class provides through `child_context`.
    fn child_context_types() -> &'static [&'static str] {
        &[]
    }

    /// A single provider context to consume instead of legacy context.
    fn context_type() -> Option<ContextKey> {
        None
    }

    fn derived_state_from_props(_props: &Props, _state: &Self::State) -> Option<Self::State> {
        None
    }

    fn derived_state_from_error(_error: &UserError, state: &Self::State) -> Self::State {
        state.clone()
    }

    fn child_context(&self, _cx: &ClassCx<'_, Self::State>) -> Vec<(Rc<str>, PropValue)> {
        Vec::new()
    }

    fn should_update(
        &mut self,
        _cx: &ClassCx<'_, Self::State>,
        _next_props: &Props,
        _next_state: &Self::State,
    ) -> bool {
        true
    }

    fn render(&mut self, cx: &ClassCx<'_, Self::State>) -> RenderResult;

    fn did_mount(&mut self, _cx: &ClassCx<'_, Self::State>) -> Result<(), UserError> {
        Ok(())
    }

    fn snapshot_before_update(
        &mut self,
        _cx: &ClassCx<'_, Self::State>,
        _prev_props: &Props,
        _prev_state: &Self::State,
    ) -> Result<Option<Rc<dyn Any>>, UserError> {
        Ok(None)
    }

    fn did_update(
        &mut self,
        _cx: &ClassCx<'_, Self::State>,
        _prev_props: &Props,
        _prev_state: &Self::State,
        _snapshot: Option<Rc<dyn Any>>,
    ) -> Result<(), UserError> {
        Ok(())
    }

    fn will_unmount(&mut self, _cx: &ClassCx<'_, Self::State>) -> Result<(), UserError> {
        Ok(())
    }

    fn did_catch(&mut self, _cx: &ClassCx<'_, Self::State>, _error: &UserError) -> Result<(), UserError> {
        Ok(())
    }
}

/// Where a mounted instance lives, for updaters and handles.
#[derive(Default)]
pub(crate) struct InstanceLink {
    pub(crate) fiber: Cell<Option<FiberId>>,
    pub(crate) mode: Cell<Mode>,
}

/// Schedules state changes on a class instance from anywhere.
pub struct Updater<S> {
    link: Rc<InstanceLink>,
    runtime: Weak<Runtime>,
    _state: PhantomData<fn(S) -> S>,
}

impl<S> Clone for Updater<S> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            runtime: self.runtime.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: Clone + 'static> Updater<S> {
    pub fn set_state(&self, f: impl Fn(&S, &Props) -> S + 'static) {
        self.enqueue(UpdateKind::Update(typed_payload(f)), None);
    }

    /// Like `set_state`, with `callback` run once the update commits.
    pub fn set_state_then(
        &self,
        f: impl Fn(&S, &Props) -> S + 'static,
        callback: impl FnOnce() -> Result<(), UserError> + 'static,
    ) {
        self.enqueue(
            UpdateKind::Update(typed_payload(f)),
            Some(UpdateCallback::Fn(RefCell::new(Some(Box::new(callback))))),
        );
    }

    pub fn replace_state(&self, state: S) {
        self.enqueue(UpdateKind::Replace(Rc::new(state)), None);
    }

    pub fn force_update(&self) {
        self.enqueue(UpdateKind::Force, None);
    }

    fn enqueue(&self, kind: UpdateKind, callback: Option<UpdateCallback>) {
        let Some(runtime) = self.runtime.upgrade() else {
            log::warn!("state update on a class whose reconciler is gone");
            return;
        };
        let Some(fiber) = self.link.fiber.get() else {
            log::warn!("state update on a class that is not mounted");
            return;
        };
        let expiration_time = runtime.compute_expiration_for_fiber(self.link.mode.get());
        let update = Update {
            expiration_time,
            kind,
            callback,
        };
        runtime.enqueue(ScheduledUpdate::Class {
            fiber,
            update: Rc::new(update),
        });
    }
}

fn typed_payload<S: Clone + 'static>(f: impl Fn(&S, &Props) -> S + 'static) -> Payload {
    Rc::new(move |prev: &dyn Any, props: &Props| {
        prev.downcast_ref::<S>().map(|s| Rc::new(f(s, props)) as StateRef)
    })
}

/// Borrowed view of instance fields handed to the erased component.
pub(crate) struct ClassView<'a> {
    pub(crate) props: &'a Props,
    pub(crate) state: &'a StateRef,
    pub(crate) context: &'a LegacyContext,
    pub(crate) consumed: Option<&'a Rc<dyn Any>>,
}

pub(crate) trait AnyComponent {
    fn render(&mut self, view: ClassView<'_>) -> RenderResult;
    fn should_update(&mut self, view: ClassView<'_>, next_props: &Props, next_state: &StateRef) -> bool;
    fn child_context(&self, view: ClassView<'_>) -> Vec<(Rc<str>, PropValue)>;
    fn did_mount(&mut self, view: ClassView<'_>) -> Result<(), UserError>;
    fn snapshot_before_update(
        &mut self,
        view: ClassView<'_>,
        prev_props: &Props,
        prev_state: &StateRef,
    ) -> Result<Option<Rc<dyn Any>>, UserError>;
    fn did_update(
        &mut self,
        view: ClassView<'_>,
        prev_props: &Props,
        prev_state: &StateRef,
        snapshot: Option<Rc<dyn Any>>,
    ) -> Result<(), UserError>;
    fn will_unmount(&mut self, view: ClassView<'_>) -> Result<(), UserError>;
    fn did_catch(&mut self, view: ClassView<'_>, error: &UserError) -> Result<(), UserError>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Erased<C>(C);

fn state_mismatch() -> UserError {
    UserError::new("class state has an unexpected type")
}

macro_rules! with_cx {
    ($view:expr, |$cx:ident| $body:expr, $fallback:expr) => {{
        let view = $view;
        match view.state.downcast_ref::<C::State>() {
            Some(state) => {
                let $cx = ClassCx {
                    props: view.props,
                    state,
                    context: view.context,
                    consumed: view.consumed,
                };
                $body
            }
            None => $fallback,
        }
    }};
}

impl<C: Component> AnyComponent for Erased<C> {
    fn render(&mut self, view: ClassView<'_>) -> RenderResult {
        with_cx!(view, |cx| self.0.render(&cx), Err(RenderSignal::Failed(state_mismatch())))
    }

    fn should_update(&mut self, view: ClassView<'_>, next_props: &Props, next_state: &StateRef) -> bool {
        let Some(next_state) = next_state.downcast_ref::<C::State>() else {
            return true;
        };
        with_cx!(view, |cx| self.0.should_update(&cx, next_props, next_state), true)
    }

    fn child_context(&self, view: ClassView<'_>) -> Vec<(Rc<str>, PropValue)> {
        with_cx!(view, |cx| self.0.child_context(&cx), Vec::new())
    }

    fn did_mount(&mut self, view: ClassView<'_>) -> Result<(), UserError> {
        with_cx!(view, |cx| self.0.did_mount(&cx), Err(state_mismatch()))
    }

    fn snapshot_before_update(
        &mut self,
        view: ClassView<'_>,
        prev_props: &Props,
        prev_state: &StateRef,
    ) -> Result<Option<Rc<dyn Any>>, UserError> {
        let prev_state = prev_state.downcast_ref::<C::State>().ok_or_else(state_mismatch)?;
        with_cx!(
            view,
            |cx| self.0.snapshot_before_update(&cx, prev_props, prev_state),
            Err(state_mismatch())
        )
    }

    fn did_update(
        &mut self,
        view: ClassView<'_>,
        prev_props: &Props,
        prev_state: &StateRef,
        snapshot: Option<Rc<dyn Any>>,
    ) -> Result<(), UserError> {
        let prev_state = prev_state.downcast_ref::<C::State>().ok_or_else(state_mismatch)?;
        with_cx!(
            view,
            |cx| self.0.did_update(&cx, prev_props, prev_state, snapshot),
            Err(state_mismatch())
        )
    }

    fn will_unmount(&mut self, view: ClassView<'_>) -> Result<(), UserError> {
        with_cx!(view, |cx| self.0.will_unmount(&cx), Err(state_mismatch()))
    }

    fn did_catch(&mut self, view: ClassView<'_>, error: &UserError) -> Result<(), UserError> {
        with_cx!(view, |cx| self.0.did_catch(&cx, error), Err(state_mismatch()))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.0
    }
}

/// Static, per-type half of a class.
pub(crate) trait ClassFactory {
    fn class_type_id(&self) -> TypeId;
    fn name(&self) -> &'static str;
    fn construct(
        &self,
        props: &Props,
        link: Rc<InstanceLink>,
        runtime: Weak<Runtime>,
    ) -> (Box<dyn AnyComponent>, StateRef);
    fn derived_state_from_props(&self, props: &Props, state: &StateRef) -> Option<StateRef>;
    fn error_payload(&self, error: &UserError) -> Option<Payload>;
    fn derives_state_from_error(&self) -> bool;
    fn has_did_catch(&self) -> bool;
    fn has_snapshot(&self) -> bool;
    fn context_types(&self) -> &'static [&'static str];
    fn child_context_types(&self) -> &'static [&'static str];
    fn context_type(&self) -> Option<ContextKey>;
}

struct ClassOf<C>(PhantomData<fn() -> C>);

impl<C: Component> ClassFactory for ClassOf<C> {
    fn class_type_id(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn name(&self) -> &'static str {
        let full = std::any::type_name::<C>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn construct(
        &self,
        props: &Props,
        link: Rc<InstanceLink>,
        runtime: Weak<Runtime>,
    ) -> (Box<dyn AnyComponent>, StateRef) {
        let updater = Updater {
            link,
            runtime,
            _state: PhantomData,
        };
        let component = C::create(props, updater);
        let state = component.initial_state(props);
        (Box::new(Erased(component)), Rc::new(state))
    }

    fn derived_state_from_props(&self, props: &Props, state: &StateRef) -> Option<StateRef> {
        let state = state.downcast_ref::<C::State>()?;
        C::derived_state_from_props(props, state).map(|s| Rc::new(s) as StateRef)
    }

    fn error_payload(&self, error: &UserError) -> Option<Payload> {
        if !C::DERIVES_STATE_FROM_ERROR {
            return None;
        }
        let error = error.clone();
        Some(Rc::new(move |prev: &dyn Any, _: &Props| {
            prev.downcast_ref::<C::State>()
                .map(|s| Rc::new(C::derived_state_from_error(&error, s)) as StateRef)
        }))
    }

    fn derives_state_from_error(&self) -> bool {
        C::DERIVES_STATE_FROM_ERROR
    }

    fn has_did_catch(&self) -> bool {
        C::HAS_DID_CATCH
    }

    fn has_snapshot(&self) -> bool {
        C::HAS_SNAPSHOT
    }

    fn context_types(&self) -> &'static [&'static str] {
        C::context_types()
    }

    fn child_context_types(&self) -> &'static [&'static str] {
        C::child_context_types()
    }

    fn context_type(&self) -> Option<ContextKey> {
        C::context_type()
    }
}

/// Identity of a class component type.
#[derive(Clone)]
pub struct ClassType(Rc<dyn ClassFactory>);

impl ClassType {
    pub fn of<C: Component>() -> Self {
        ClassType(Rc::new(ClassOf::<C>(PhantomData)))
    }

    pub fn same(&self, other: &ClassType) -> bool {
        self.0.class_type_id() == other.0.class_type_id()
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub(crate) fn is_context_provider(&self) -> bool {
        !self.0.child_context_types().is_empty()
    }

    pub(crate) fn factory(&self) -> &dyn ClassFactory {
        &*self.0
    }
}

pub fn class_component<C: Component>() -> ElementBuilder {
    ElementBuilder::new(ElementType::Class(ClassType::of::<C>()))
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ClassCell {
    component: RefCell<Box<dyn AnyComponent>>,
    pub(crate) ty: ClassType,
    pub(crate) props: RefCell<Props>,
    pub(crate) state: RefCell<StateRef>,
    pub(crate) context: RefCell<LegacyContext>,
    pub(crate) consumed: RefCell<Option<Rc<dyn Any>>>,
    pub(crate) link: Rc<InstanceLink>,
    /// Last (unmasked, masked) legacy context pair.
    pub(crate) masked_cache: RefCell<Option<(LegacyContext, LegacyContext)>>,
    pub(crate) merged_child_context: RefCell<Option<LegacyContext>>,
    pub(crate) snapshot: RefCell<Option<Rc<dyn Any>>>,
    pub(crate) id: u64,
}

#[derive(Clone)]
pub struct ClassInstance(pub(crate) Rc<ClassCell>);

impl ClassInstance {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle(self.0.clone())
    }

    fn view<R>(&self, f: impl FnOnce(ClassView<'_>) -> R) -> R {
        let props = self.0.props.borrow();
        let state = self.0.state.borrow();
        let context = self.0.context.borrow();
        let consumed = self.0.consumed.borrow();
        f(ClassView {
            props: &props,
            state: &state,
            context: &context,
            consumed: consumed.as_ref(),
        })
    }

    fn component(&self) -> Result<std::cell::RefMut<'_, Box<dyn AnyComponent>>, UserError> {
        self.0
            .component
            .try_borrow_mut()
            .map_err(|_| UserError::new("class instance re-entered while busy"))
    }

    pub(crate) fn render(&self) -> RenderResult {
        let mut c = self.component().map_err(RenderSignal::Failed)?;
        self.view(|v| c.render(v))
    }

    pub(crate) fn should_update(&self, next_props: &Props, next_state: &StateRef) -> bool {
        match self.component() {
            Ok(mut c) => self.view(|v| c.should_update(v, next_props, next_state)),
            Err(_) => true,
        }
    }

    /// Merges this provider's child context over `parent`. Keys not declared
    /// in `child_context_types` are dropped.
    pub(crate) fn child_context(&self, parent: &LegacyContext) -> LegacyContext {
        let declared = self.0.ty.factory().child_context_types();
        let own = match self.0.component.try_borrow() {
            Ok(c) => self.view(|v| c.child_context(v)),
            Err(_) => Vec::new(),
        };
        let mut out: BTreeMap<Rc<str>, PropValue> = parent
            .entries()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in own {
            if declared.contains(&&*key) {
                out.insert(key, value);
            } else {
                log::error!(
                    "{}.child_context(): key \"{key}\" is not declared in child_context_types",
                    self.0.ty.name()
                );
            }
        }
        LegacyContext::new(out)
    }

    pub(crate) fn did_mount(&self) -> Result<(), UserError> {
        let mut c = self.component()?;
        self.view(|v| c.did_mount(v))
    }

    pub(crate) fn snapshot_before_update(&self, prev_props: &Props, prev_state: &StateRef) -> Result<(), UserError> {
        let mut c = self.component()?;
        let snapshot = self.view(|v| c.snapshot_before_update(v, prev_props, prev_state))?;
        *self.0.snapshot.borrow_mut() = snapshot;
        Ok(())
    }

    pub(crate) fn did_update(&self, prev_props: &Props, prev_state: &StateRef) -> Result<(), UserError> {
        let snapshot = self.0.snapshot.borrow_mut().take();
        let mut c = self.component()?;
        self.view(|v| c.did_update(v, prev_props, prev_state, snapshot))
    }

    pub(crate) fn will_unmount(&self) -> Result<(), UserError> {
        let mut c = self.component()?;
        self.view(|v| c.will_unmount(v))
    }

    pub(crate) fn did_catch(&self, error: &UserError) -> Result<(), UserError> {
        let mut c = self.component()?;
        self.view(|v| c.did_catch(v, error))
    }
}

/// A class instance as handed to refs and `find_host_instance`.
#[derive(Clone)]
pub struct InstanceHandle(Rc<ClassCell>);

impl InstanceHandle {
    pub fn name(&self) -> &'static str {
        self.0.ty.name()
    }

    /// Runs `f` on the concrete component. `None` if the type differs or the
    /// instance is busy (e.g. currently rendering).
    pub fn with<C: Component, R>(&self, f: impl FnOnce(&mut C) -> R) -> Option<R> {
        let mut c = self.0.component.try_borrow_mut().ok()?;
        c.as_any_mut().downcast_mut::<C>().map(f)
    }

    pub fn state<S: Clone + 'static>(&self) -> Option<S> {
        self.0.state.try_borrow().ok()?.downcast_ref::<S>().cloned()
    }

    pub(crate) fn fiber(&self) -> Option<FiberId> {
        self.0.link.fiber.get()
    }

    pub fn ptr_eq(&self, other: &InstanceHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<H: HostConfig> Reconciler<H> {
    fn class_context(&mut self, wip: FiberId, ty: &ClassType, instance: Option<&ClassInstance>) -> (LegacyContext, Option<Rc<dyn Any>>) {
        if let Some(key) = ty.factory().context_type() {
            let value = self.read_context_for_fiber(wip, &key);
            return (self.legacy.empty(), Some(value));
        }
        let unmasked = self.legacy.unmasked(ty.is_context_provider(), true);
        let masked = self.legacy.masked(ty.factory().context_types(), instance, &unmasked);
        (masked, None)
    }

    pub(crate) fn construct_class_instance(&mut self, wip: FiberId, ty: &ClassType, props: &Props) -> ClassInstance {
        let (context, consumed) = self.class_context(wip, ty, None);
        let link = Rc::new(InstanceLink::default());
        link.fiber.set(Some(wip));
        link.mode.set(self.fibers[wip].mode);
        let (component, state) = ty
            .factory()
            .construct(props, link.clone(), Rc::downgrade(&self.runtime));
        let instance = ClassInstance(Rc::new(ClassCell {
            component: RefCell::new(component),
            ty: ty.clone(),
            props: RefCell::new(props.clone()),
            state: RefCell::new(state.clone()),
            context: RefCell::new(context.clone()),
            consumed: RefCell::new(consumed),
            link,
            masked_cache: RefCell::new(None),
            merged_child_context: RefCell::new(None),
            snapshot: RefCell::new(None),
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
        }));
        if !ty.factory().context_types().is_empty() {
            let unmasked = self.legacy.unmasked(ty.is_context_provider(), true);
            *instance.0.masked_cache.borrow_mut() = Some((unmasked, context));
        }
        let fiber = &mut self.fibers[wip];
        fiber.memoized_state = MemoizedState::State(state);
        fiber.state_node = StateNode::Class(instance.clone());
        instance
    }

    fn apply_derived_state_from_props(&mut self, wip: FiberId, ty: &ClassType, props: &Props) {
        let Some(prev) = self.fibers[wip].memoized_state.state().cloned() else {
            return;
        };
        if let Some(next) = ty.factory().derived_state_from_props(props, &prev) {
            let fiber = &mut self.fibers[wip];
            fiber.memoized_state = MemoizedState::State(next.clone());
            if fiber.expiration_time == NO_WORK
                && let crate::fiber::FiberQueue::State(q) = &mut fiber.update_queue
            {
                q.base_state = next;
            }
        }
    }

    fn memoized_class_state(&self, wip: FiberId) -> StateRef {
        self.fibers[wip]
            .memoized_state
            .state()
            .cloned()
            .unwrap_or_else(|| Rc::new(()) as StateRef)
    }

    pub(crate) fn mount_class_instance(
        &mut self,
        wip: FiberId,
        ty: &ClassType,
        props: &Props,
        render_expiration_time: ExpirationTime,
    ) {
        let Some(instance) = self.fibers[wip].class_instance().cloned() else {
            return;
        };
        let (context, consumed) = self.class_context(wip, ty, Some(&instance));
        *instance.0.props.borrow_mut() = props.clone();
        *instance.0.context.borrow_mut() = context;
        *instance.0.consumed.borrow_mut() = consumed;

        process_update_queue(&mut self.fibers, wip, props, render_expiration_time);
        self.apply_derived_state_from_props(wip, ty, props);
        *instance.0.state.borrow_mut() = self.memoized_class_state(wip);
        self.fibers[wip].effect_tag |= EffectTag::UPDATE;
    }

    /// A class whose first mount was interrupted: the instance exists but
    /// there is no current fiber.
    pub(crate) fn resume_mount_class_instance(
        &mut self,
        wip: FiberId,
        ty: &ClassType,
        new_props: &Props,
        render_expiration_time: ExpirationTime,
    ) -> bool {
        let Some(instance) = self.fibers[wip].class_instance().cloned() else {
            return true;
        };
        let old_props = self.fibers[wip].memoized_props.props().cloned().unwrap_or_default();
        let (next_context, consumed) = self.class_context(wip, ty, Some(&instance));

        let old_state = self.memoized_class_state(wip);
        let force = process_update_queue(&mut self.fibers, wip, new_props, render_expiration_time);
        let mut new_state = self.memoized_class_state(wip);

        if old_props.ptr_eq(new_props)
            && Rc::ptr_eq(&old_state, &new_state)
            && !self.legacy.has_changed()
            && !force
        {
            self.fibers[wip].effect_tag |= EffectTag::UPDATE;
            return false;
        }

        self.apply_derived_state_from_props(wip, ty, new_props);
        new_state = self.memoized_class_state(wip);

        *instance.0.props.borrow_mut() = old_props;
        *instance.0.state.borrow_mut() = old_state;
        let should_update = force || instance.should_update(new_props, &new_state);
        self.fibers[wip].effect_tag |= EffectTag::UPDATE;
        if !should_update {
            let fiber = &mut self.fibers[wip];
            fiber.memoized_props = FiberProps::Props(new_props.clone());
            fiber.memoized_state = MemoizedState::State(new_state.clone());
        }
        *instance.0.props.borrow_mut() = new_props.clone();
        *instance.0.state.borrow_mut() = new_state;
        *instance.0.context.borrow_mut() = next_context;
        *instance.0.consumed.borrow_mut() = consumed;
        should_update
    }

    pub(crate) fn update_class_instance(
        &mut self,
        current: FiberId,
        wip: FiberId,
        ty: &ClassType,
        new_props: &Props,
        render_expiration_time: ExpirationTime,
    ) -> bool {
        let Some(instance) = self.fibers[wip].class_instance().cloned() else {
            return true;
        };
        let old_props = self.fibers[wip].memoized_props.props().cloned().unwrap_or_default();
        let (next_context, consumed) = self.class_context(wip, ty, Some(&instance));

        let old_state = self.memoized_class_state(wip);
        let force = process_update_queue(&mut self.fibers, wip, new_props, render_expiration_time);
        let mut new_state = self.memoized_class_state(wip);

        let current_props_changed = !self.fibers[current]
            .memoized_props
            .props()
            .is_some_and(|p| p.ptr_eq(&old_props));
        let current_state_changed = !self.fibers[current]
            .memoized_state
            .state()
            .is_some_and(|s| Rc::ptr_eq(s, &old_state));
        let commit_flags = if current_props_changed || current_state_changed {
            let mut tag = EffectTag::UPDATE;
            if ty.factory().has_snapshot() {
                tag |= EffectTag::SNAPSHOT;
            }
            tag
        } else {
            EffectTag::empty()
        };

        if old_props.ptr_eq(new_props)
            && Rc::ptr_eq(&old_state, &new_state)
            && !self.legacy.has_changed()
            && !force
        {
            self.fibers[wip].effect_tag |= commit_flags;
            return false;
        }

        self.apply_derived_state_from_props(wip, ty, new_props);
        new_state = self.memoized_class_state(wip);

        let should_update = force || instance.should_update(new_props, &new_state);
        if should_update {
            let mut tag = EffectTag::UPDATE;
            if ty.factory().has_snapshot() {
                tag |= EffectTag::SNAPSHOT;
            }
            self.fibers[wip].effect_tag |= tag;
        } else {
            let fiber = &mut self.fibers[wip];
            fiber.effect_tag |= commit_flags;
            fiber.memoized_props = FiberProps::Props(new_props.clone());
            fiber.memoized_state = MemoizedState::State(new_state.clone());
        }
        *instance.0.props.borrow_mut() = new_props.clone();
        *instance.0.state.borrow_mut() = new_state;
        *instance.0.context.borrow_mut() = next_context;
        *instance.0.consumed.borrow_mut() = consumed;
        should_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;

    struct Counter;

    impl Component for Counter {
        type State = i64;

        fn create(_props: &Props, _updater: Updater<i64>) -> Self {
            Counter
        }

        fn initial_state(&self, props: &Props) -> i64 {
            props.int("start").unwrap_or(0)
        }

        fn render(&mut self, cx: &ClassCx<'_, i64>) -> RenderResult {
            Ok(host("span").child(cx.state().to_string()).into())
        }
    }

    struct Other;

    impl Component for Other {
        type State = ();

        fn create(_props: &Props, _updater: Updater<()>) -> Self {
            Other
        }

        fn initial_state(&self, _props: &Props) {}

        fn render(&mut self, _cx: &ClassCx<'_, ()>) -> RenderResult {
            Ok(Default::default())
        }
    }

    #[test]
    fn test_class_identity_is_by_type() {
        assert!(ClassType::of::<Counter>().same(&ClassType::of::<Counter>()));
        assert!(!ClassType::of::<Counter>().same(&ClassType::of::<Other>()));
        assert_eq!(ClassType::of::<Counter>().name(), "Counter");
    }

    #[test]
    fn test_construct_uses_initial_state() {
        let props = host("x").attr("start", 5).build().props;
        let (_, state) = ClassType::of::<Counter>().factory().construct(
            &props,
            Rc::new(InstanceLink::default()),
            Weak::new(),
        );
        assert_eq!(state.downcast_ref::<i64>(), Some(&5));
    }

    #[test]
    fn test_error_payload_only_for_deriving_boundaries() {
        assert!(ClassType::of::<Counter>()
            .factory()
            .error_payload(&UserError::new("x"))
            .is_none());
    }
}
