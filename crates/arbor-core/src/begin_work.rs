//! Begin-work: renders one fiber and returns the child to work on next.
//!
//! A fiber whose props, context and pending work are all unchanged bails out
//! here, reusing its committed children. Everything else is dispatched on the
//! fiber's kind, which pushes whatever context its subtree reads and
//! reconciles the new children against the current ones.

use std::any::Any;
use std::rc::Rc;

use crate::child_fiber::{ChildReconciler, clone_child_fibers};
use crate::class::ClassType;
use crate::context::{has_pending_context_work, propagate_context_change};
use crate::element::{
    ConsumerRender, ContextKey, Element, ElementType, FALLBACK_PROP, FunctionComponent, MemoDef, Node,
    PropValue, Props, RENDER_PROP, Ref, VALUE_PROP,
};
use crate::error::{Invariant, RenderResult, RenderSignal, UserError};
use crate::expiration::{ExpirationTime, NEVER, NO_WORK};
use crate::fiber::{
    ContextDependencies, EffectTag, FiberId, FiberKind, FiberProps, MemoizedState, Mode, StateNode,
};
use crate::host_config::HostConfig;
use crate::reconciler::Reconciler;
use crate::suspense::{LazyComponent, SuspenseState};
use crate::update_queue::{RootState, process_update_queue};

fn root_element(state: &MemoizedState) -> Node {
    state
        .state()
        .and_then(|s| s.downcast_ref::<RootState>())
        .map(|s| s.element.clone())
        .unwrap_or_default()
}

fn provided_value(props: Option<&Props>, key: &ContextKey) -> Rc<dyn Any> {
    match props.and_then(|p| p.get(VALUE_PROP)) {
        Some(PropValue::Any(value)) => value.clone(),
        _ => key.default.clone(),
    }
}

fn fallback_of(props: &Props) -> Node {
    match props.get(FALLBACK_PROP) {
        Some(PropValue::Node(n)) => n.clone(),
        _ => Node::Empty,
    }
}

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let update_expiration_time = self.fibers[wip].expiration_time;

        match current {
            Some(c) => {
                let props_changed = !self.fibers[c]
                    .memoized_props
                    .same(&self.fibers[wip].pending_props);
                if props_changed || self.legacy.has_changed() {
                    self.did_receive_update = true;
                } else {
                    self.did_receive_update = false;
                    if update_expiration_time < render_expiration_time {
                        return self.bailout_with_context(c, wip, render_expiration_time);
                    }
                }
            }
            None => self.did_receive_update = false,
        }

        self.fibers[wip].expiration_time = NO_WORK;
        let kind = self.fibers[wip].kind.clone();
        log::trace!("begin {}", self.fibers[wip].display_name());
        match kind {
            FiberKind::FunctionComponent(fc) => {
                let props = self.pending_props(wip);
                self.update_function_component(current, wip, &fc, &props, render_expiration_time)
            }
            FiberKind::ClassComponent(ty) => {
                self.update_class_component(current, wip, &ty, render_expiration_time)
            }
            FiberKind::IncompleteClassComponent(ty) => {
                self.mount_incomplete_class_component(current, wip, &ty, render_expiration_time)
            }
            FiberKind::LazyComponent(lazy) => self.mount_lazy_component(
                current,
                wip,
                &lazy,
                update_expiration_time,
                render_expiration_time,
            ),
            FiberKind::HostRoot => self.update_host_root(current, wip, render_expiration_time),
            FiberKind::HostComponent(ty) => {
                self.update_host_component(current, wip, &ty, render_expiration_time)
            }
            FiberKind::HostText => {
                if current.is_none() {
                    self.try_to_claim_next_hydratable_instance(wip);
                }
                Ok(None)
            }
            FiberKind::SuspenseComponent => {
                self.update_suspense_component(current, wip, render_expiration_time)
            }
            FiberKind::DehydratedSuspenseComponent => {
                self.update_dehydrated_suspense_component(current, wip, render_expiration_time)
            }
            FiberKind::HostPortal => self.update_portal_component(current, wip, render_expiration_time),
            FiberKind::ContextProvider(key) => {
                self.update_context_provider(current, wip, &key, render_expiration_time)
            }
            FiberKind::ContextConsumer(key) => {
                self.update_context_consumer(current, wip, &key, render_expiration_time)
            }
            FiberKind::Fragment | FiberKind::Mode => {
                self.update_plain_children(current, wip, render_expiration_time)
            }
            FiberKind::Profiler => {
                if self.fibers[wip].mode.contains(Mode::PROFILE) {
                    self.fibers[wip].effect_tag |= EffectTag::UPDATE;
                }
                self.update_plain_children(current, wip, render_expiration_time)
            }
            FiberKind::MemoComponent(def) => self.update_memo_component(
                current,
                wip,
                &def,
                update_expiration_time,
                render_expiration_time,
            ),
            FiberKind::SimpleMemoComponent(fc) => self.update_simple_memo_component(
                current,
                wip,
                &fc,
                update_expiration_time,
                render_expiration_time,
            ),
        }
    }

    fn pending_props(&self, wip: FiberId) -> Props {
        self.fibers[wip].pending_props.props().cloned().unwrap_or_default()
    }

    /// Pushes the context a skipped fiber would have pushed, then bails out.
    fn bailout_with_context(
        &mut self,
        current: FiberId,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let kind = self.fibers[wip].kind.clone();
        match kind {
            FiberKind::HostRoot => {
                self.push_host_root_context(wip)?;
                self.reset_hydration_state();
            }
            FiberKind::HostComponent(ty) => self.host_cx.push_context(&self.host, wip, &ty)?,
            FiberKind::ClassComponent(ty) if ty.is_context_provider() => {
                let instance = self.fibers[wip].class_instance().cloned();
                self.legacy.push_provider(wip, instance.as_ref());
            }
            FiberKind::HostPortal => self.push_portal_container(wip)?,
            FiberKind::ContextProvider(key) => {
                let value = provided_value(self.fibers[wip].memoized_props.props(), &key);
                self.providers.push(wip, &key, value);
            }
            FiberKind::Profiler => {
                if self.fibers[wip].mode.contains(Mode::PROFILE) {
                    self.fibers[wip].effect_tag |= EffectTag::UPDATE;
                }
            }
            FiberKind::SuspenseComponent => {
                if matches!(self.fibers[wip].memoized_state, MemoizedState::Suspense(_)) {
                    // the primary children are parked under the first fragment
                    let primary_work = self.fibers[wip]
                        .child
                        .map_or(NO_WORK, |c| self.fibers[c].child_expiration_time);
                    if primary_work != NO_WORK && primary_work >= render_expiration_time {
                        return self.update_suspense_component(Some(current), wip, render_expiration_time);
                    }
                    let child = self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time)?;
                    return Ok(child.and_then(|c| self.fibers[c].sibling));
                }
            }
            FiberKind::DehydratedSuspenseComponent => {
                // it would suspend again; anything that changed has work scheduled on it
                self.fibers[wip].effect_tag |= EffectTag::DID_CAPTURE;
            }
            _ => {}
        }
        self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time)
    }

    /// Reuses the committed children, or skips the whole subtree when none of
    /// it has work at this priority.
    pub(crate) fn bailout_on_already_finished_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        if let Some(c) = current {
            self.fibers[wip].dependencies = self.fibers[c].dependencies.clone();
        }
        self.profiler.stop();
        if self.fibers[wip].child_expiration_time < render_expiration_time {
            return Ok(None);
        }
        clone_child_fibers(&mut self.fibers, current, wip)?;
        Ok(self.fibers[wip].child)
    }

    pub(crate) fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &Node,
        render_expiration_time: ExpirationTime,
    ) -> Result<(), Invariant> {
        let current_first = current.and_then(|c| self.fibers[c].child);
        let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, current.is_some())
            .reconcile(current_first, children)?;
        self.fibers[wip].child = child;
        Ok(())
    }

    /// Deletes every current child and mounts `children` from scratch, so no
    /// state survives an error boundary's recovery render.
    fn force_unmount_current_and_reconcile(
        &mut self,
        current: FiberId,
        wip: FiberId,
        children: &Node,
        render_expiration_time: ExpirationTime,
    ) -> Result<(), Invariant> {
        let current_first = self.fibers[current].child;
        ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, true)
            .reconcile(current_first, &Node::Empty)?;
        let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, true)
            .reconcile(None, children)?;
        self.fibers[wip].child = child;
        Ok(())
    }

    fn mark_ref(&mut self, current: Option<FiberId>, wip: FiberId) {
        let changed = match current {
            None => self.fibers[wip].ref_.is_some(),
            Some(c) => !Ref::same(self.fibers[c].ref_.as_ref(), self.fibers[wip].ref_.as_ref()),
        };
        if changed {
            self.fibers[wip].effect_tag |= EffectTag::REF;
        }
    }

    /// Drops the dependencies of the last render, noting whether any of them
    /// changed.
    fn prepare_to_read_context(&mut self, wip: FiberId, render_expiration_time: ExpirationTime) {
        if has_pending_context_work(&self.fibers, wip, render_expiration_time) {
            self.did_receive_update = true;
        }
        self.fibers[wip].dependencies = None;
    }

    /// Reads the innermost provided value of `key` and records the read on
    /// `wip`.
    pub(crate) fn read_context_for_fiber(&mut self, wip: FiberId, key: &ContextKey) -> Rc<dyn Any> {
        let deps = self.fibers[wip]
            .dependencies
            .get_or_insert_with(ContextDependencies::default);
        if !deps.contexts.contains(&key.id) {
            deps.contexts.push(key.id);
        }
        self.providers.read(key)
    }

    /// Detaches a fiber that committed without finishing its mount, so it is
    /// mounted again as a fresh insertion.
    fn detach_incomplete(&mut self, current: Option<FiberId>, wip: FiberId) {
        if let Some(c) = current {
            self.fibers[c].alternate = None;
            let f = &mut self.fibers[wip];
            f.alternate = None;
            f.effect_tag |= EffectTag::PLACEMENT;
        }
    }

    // -- function components --

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &FunctionComponent,
        props: &Props,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.prepare_to_read_context(wip, render_expiration_time);
        let children = self.render_with_hooks(current, wip, component, props, render_expiration_time)?;
        if let Some(c) = current
            && !self.did_receive_update
        {
            self.bailout_hooks(c, wip, render_expiration_time);
            return self.bailout_on_already_finished_work(current, wip, render_expiration_time);
        }
        self.fibers[wip].effect_tag |= EffectTag::PERFORMED_WORK;
        self.reconcile_children(current, wip, &children, render_expiration_time)?;
        Ok(self.fibers[wip].child)
    }

    fn update_memo_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        def: &Rc<MemoDef>,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let props = self.pending_props(wip);
        let ref_ = self.fibers[wip].ref_.clone();

        let Some(current) = current else {
            if let ElementType::Function(fc) = &def.inner
                && def.compare.is_none()
            {
                self.fibers[wip].kind = FiberKind::SimpleMemoComponent(fc.clone());
                return self.update_simple_memo_component(
                    None,
                    wip,
                    fc,
                    update_expiration_time,
                    render_expiration_time,
                );
            }
            let element = Element {
                ty: def.inner.clone(),
                key: None,
                ref_: ref_.clone(),
                props,
            };
            let mode = self.fibers[wip].mode;
            let child = self
                .fibers
                .create_from_element(&element, mode, render_expiration_time);
            self.fibers[child].ref_ = ref_;
            self.fibers[child].parent = Some(wip);
            self.fibers[wip].child = Some(child);
            return Ok(Some(child));
        };

        let current_child = self.fibers[current]
            .child
            .ok_or(Invariant::Missing("the inner fiber of a memo component"))?;
        if update_expiration_time < render_expiration_time {
            let prev = self.fibers[current_child]
                .memoized_props
                .props()
                .cloned()
                .unwrap_or_default();
            let unchanged = match &def.compare {
                Some(compare) => compare(&prev, &props),
                None => prev.shallow_eq(&props),
            };
            if unchanged && Ref::same(self.fibers[current].ref_.as_ref(), ref_.as_ref()) {
                return self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time);
            }
        }
        self.fibers[wip].effect_tag |= EffectTag::PERFORMED_WORK;
        let child = self
            .fibers
            .create_work_in_progress(current_child, FiberProps::Props(props));
        let c = &mut self.fibers[child];
        c.ref_ = ref_;
        c.parent = Some(wip);
        self.fibers[wip].child = Some(child);
        Ok(Some(child))
    }

    fn update_simple_memo_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &FunctionComponent,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let props = self.pending_props(wip);
        if let Some(c) = current {
            let unchanged = self.fibers[c]
                .memoized_props
                .props()
                .is_some_and(|prev| prev.shallow_eq(&props));
            if unchanged && Ref::same(self.fibers[c].ref_.as_ref(), self.fibers[wip].ref_.as_ref()) {
                self.did_receive_update = false;
                if update_expiration_time < render_expiration_time {
                    return self.bailout_on_already_finished_work(current, wip, render_expiration_time);
                }
            }
        }
        self.update_function_component(current, wip, component, &props, render_expiration_time)
    }

    fn mount_lazy_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lazy: &LazyComponent,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.detach_incomplete(current, wip);
        let resolved = lazy.read()?;
        match resolved {
            ElementType::Function(fc) => {
                self.fibers[wip].kind = FiberKind::FunctionComponent(fc.clone());
                let props = self.pending_props(wip);
                self.update_function_component(None, wip, &fc, &props, render_expiration_time)
            }
            ElementType::Class(ty) => {
                self.fibers[wip].kind = FiberKind::ClassComponent(ty.clone());
                self.update_class_component(None, wip, &ty, render_expiration_time)
            }
            ElementType::Memo(def) => {
                self.fibers[wip].kind = FiberKind::MemoComponent(def.clone());
                self.update_memo_component(None, wip, &def, update_expiration_time, render_expiration_time)
            }
            other => Err(RenderSignal::Failed(UserError::new(format!(
                "element type is invalid: a lazy component resolved to {}, expected a function, class or memo component",
                other.name()
            )))),
        }
    }

    // -- class components --

    fn update_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &ClassType,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let props = self.pending_props(wip);
        let has_context = ty.is_context_provider();
        if has_context {
            let instance = self.fibers[wip].class_instance().cloned();
            self.legacy.push_provider(wip, instance.as_ref());
        }
        self.prepare_to_read_context(wip, render_expiration_time);

        let mut current = current;
        let should_update = if self.fibers[wip].class_instance().is_none() {
            // a class that suspended during a legacy mount committed without
            // an instance
            self.detach_incomplete(current, wip);
            current = None;
            self.construct_class_instance(wip, ty, &props);
            self.mount_class_instance(wip, ty, &props, render_expiration_time);
            true
        } else {
            match current {
                None => self.resume_mount_class_instance(wip, ty, &props, render_expiration_time),
                Some(c) => self.update_class_instance(c, wip, ty, &props, render_expiration_time),
            }
        };
        self.finish_class_component(current, wip, ty, should_update, has_context, render_expiration_time)
    }

    fn mount_incomplete_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &ClassType,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.detach_incomplete(current, wip);
        self.fibers[wip].kind = FiberKind::ClassComponent(ty.clone());
        let has_context = ty.is_context_provider();
        if has_context {
            self.legacy.push_provider(wip, None);
        }
        self.prepare_to_read_context(wip, render_expiration_time);
        let props = self.pending_props(wip);
        self.construct_class_instance(wip, ty, &props);
        self.mount_class_instance(wip, ty, &props, render_expiration_time);
        self.finish_class_component(None, wip, ty, true, has_context, render_expiration_time)
    }

    fn finish_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &ClassType,
        should_update: bool,
        has_context: bool,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.mark_ref(current, wip);
        let did_capture = self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE);
        let instance = self.fibers[wip].class_instance().cloned();

        if !should_update && !did_capture {
            if has_context && let Some(instance) = &instance {
                self.legacy.invalidate_provider(wip, instance, false);
            }
            return self.bailout_on_already_finished_work(current, wip, render_expiration_time);
        }

        let instance = instance.ok_or(Invariant::Missing("a class instance"))?;
        let children = if did_capture && !ty.factory().derives_state_from_error() {
            // render nothing; did_catch schedules the recovery render
            self.profiler.stop();
            Node::Empty
        } else {
            instance.render()?
        };

        self.fibers[wip].effect_tag |= EffectTag::PERFORMED_WORK;
        match current {
            Some(c) if did_capture => {
                self.force_unmount_current_and_reconcile(c, wip, &children, render_expiration_time)?
            }
            _ => self.reconcile_children(current, wip, &children, render_expiration_time)?,
        }
        let state = instance.0.state.borrow().clone();
        self.fibers[wip].memoized_state = MemoizedState::State(state);
        if has_context {
            self.legacy.invalidate_provider(wip, &instance, true);
        }
        Ok(self.fibers[wip].child)
    }

    // -- host fibers --

    fn push_host_root_context(&mut self, wip: FiberId) -> Result<(), Invariant> {
        let StateNode::Root(root) = self.fibers[wip].state_node else {
            return Err(Invariant::Missing("a root on the host root fiber"));
        };
        let r = self.roots.get(root).ok_or(Invariant::Missing("a live root"))?;
        let (context, did_change) = match (&r.pending_context, &r.context) {
            (Some(pending), context) => (
                pending.clone(),
                !context.as_ref().is_some_and(|c| c.ptr_eq(pending)),
            ),
            (None, Some(context)) => (context.clone(), false),
            (None, None) => (self.legacy.empty(), false),
        };
        let container = r.container.clone();
        self.legacy.push_top_level(wip, context, did_change);
        self.host_cx.push_container(&self.host, wip, container);
        Ok(())
    }

    fn push_portal_container(&mut self, wip: FiberId) -> Result<(), Invariant> {
        let StateNode::Portal(portal) = &self.fibers[wip].state_node else {
            return Err(Invariant::Missing("a portal container"));
        };
        let container = portal.container.clone();
        self.host_cx.push_container(&self.host, wip, container);
        Ok(())
    }

    fn update_host_root(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.push_host_root_context(wip)?;
        let current = current.ok_or(Invariant::Missing("a committed host root"))?;
        let prev_element = root_element(&self.fibers[wip].memoized_state);
        process_update_queue(&mut self.fibers, wip, &Props::default(), render_expiration_time);
        let next_element = root_element(&self.fibers[wip].memoized_state);
        if prev_element.same(&next_element) {
            self.reset_hydration_state();
            return self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time);
        }

        let hydrate = match self.fibers[wip].state_node {
            StateNode::Root(root) => self.roots.get(root).is_some_and(|r| r.hydrate),
            _ => false,
        };
        if self.fibers[current].child.is_none() && hydrate && self.enter_hydration_state(wip) {
            // the existing nodes are already in the container; nothing to place
            let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, false)
                .reconcile(None, &next_element)?;
            self.fibers[wip].child = child;
        } else {
            self.reconcile_children(Some(current), wip, &next_element, render_expiration_time)?;
            self.reset_hydration_state();
        }
        Ok(self.fibers[wip].child)
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        ty: &Rc<str>,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.host_cx.push_context(&self.host, wip, ty)?;
        if current.is_none() {
            self.try_to_claim_next_hydratable_instance(wip);
        }
        let props = self.pending_props(wip);
        let mut children = props.children().clone();
        if self.host.should_set_text_content(ty, &props) {
            // the host renders this text itself
            children = Node::Empty;
        } else if let Some(prev) = current.and_then(|c| self.fibers[c].memoized_props.props().cloned())
            && self.host.should_set_text_content(ty, &prev)
        {
            self.fibers[wip].effect_tag |= EffectTag::CONTENT_RESET;
        }
        self.mark_ref(current, wip);

        if render_expiration_time != NEVER
            && self.fibers[wip].mode.contains(Mode::CONCURRENT)
            && self.host.should_deprioritize_subtree(ty, &props)
        {
            let f = &mut self.fibers[wip];
            f.expiration_time = NEVER;
            f.child_expiration_time = NEVER;
            return Ok(None);
        }

        self.reconcile_children(current, wip, &children, render_expiration_time)?;
        Ok(self.fibers[wip].child)
    }

    fn update_portal_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        self.push_portal_container(wip)?;
        let children = self.fibers[wip].pending_props.children();
        if current.is_none() {
            // the portal itself is never placed, so its children are
            let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, true)
                .reconcile(None, &children)?;
            self.fibers[wip].child = child;
        } else {
            self.reconcile_children(current, wip, &children, render_expiration_time)?;
        }
        Ok(self.fibers[wip].child)
    }

    // -- context --

    fn update_context_provider(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        key: &ContextKey,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let props = self.pending_props(wip);
        let value = provided_value(Some(&props), key);
        let old_props = current.and_then(|_| self.fibers[wip].memoized_props.props().cloned());
        self.providers.push(wip, key, value.clone());

        if let Some(old_props) = old_props {
            let old_value = provided_value(Some(&old_props), key);
            if (key.eq)(old_value.as_ref(), value.as_ref()) {
                if old_props.children().same(props.children()) && !self.legacy.has_changed() {
                    return self.bailout_on_already_finished_work(current, wip, render_expiration_time);
                }
            } else {
                log::trace!("context {:?} changed; scheduling its readers", key.id);
                propagate_context_change(&mut self.fibers, wip, key.id, render_expiration_time);
            }
        }
        self.reconcile_children(current, wip, props.children(), render_expiration_time)?;
        Ok(self.fibers[wip].child)
    }

    fn update_context_consumer(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        key: &ContextKey,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let props = self.pending_props(wip);
        let render = props
            .any::<ConsumerRender>(RENDER_PROP)
            .ok_or_else(|| UserError::new("a context consumer expects a render function as its child"))?;
        self.prepare_to_read_context(wip, render_expiration_time);
        let value = self.read_context_for_fiber(wip, key);
        let children = (render.0)(value.as_ref());
        self.fibers[wip].effect_tag |= EffectTag::PERFORMED_WORK;
        self.reconcile_children(current, wip, &children, render_expiration_time)?;
        Ok(self.fibers[wip].child)
    }

    /// Fragments, modes and profilers: the children are the whole story.
    fn update_plain_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let children = self.fibers[wip].pending_props.children();
        self.reconcile_children(current, wip, &children, render_expiration_time)?;
        Ok(self.fibers[wip].child)
    }

    // -- suspense --

    /// The fragment the primary children were rendered into during this
    /// render, in legacy mode, before something suspended.
    fn progressed_primary_child(&self, wip: FiberId) -> Option<FiberId> {
        let f = &self.fibers[wip];
        if matches!(f.memoized_state, MemoizedState::Suspense(_)) {
            f.child.and_then(|c| self.fibers[c].child)
        } else {
            f.child
        }
    }

    pub(crate) fn update_suspense_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let mode = self.fibers[wip].mode;
        let legacy = !mode.contains(Mode::CONCURRENT);
        let props = self.pending_props(wip);

        let (next_state, timed_out) = if self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE) {
            let timed_out_at = match self.fibers[wip].memoized_state {
                MemoizedState::Suspense(s) => s.timed_out_at,
                _ => NO_WORK,
            };
            self.fibers[wip].effect_tag.remove(EffectTag::DID_CAPTURE);
            (MemoizedState::Suspense(SuspenseState { timed_out_at }), true)
        } else {
            (MemoizedState::None, false)
        };

        let (child, next) = match current {
            None => {
                if props.get(FALLBACK_PROP).is_some() {
                    self.try_to_claim_next_hydratable_instance(wip);
                    if matches!(self.fibers[wip].kind, FiberKind::DehydratedSuspenseComponent) {
                        return self.update_dehydrated_suspense_component(None, wip, render_expiration_time);
                    }
                }
                if timed_out {
                    let primary = self.fibers.create_fragment(Node::Empty, mode, NO_WORK, None);
                    if legacy {
                        self.fibers[primary].child = self.progressed_primary_child(wip);
                    }
                    let fallback = self
                        .fibers
                        .create_fragment(fallback_of(&props), mode, render_expiration_time, None);
                    self.link_suspense_fragments(wip, primary, fallback);
                    (Some(primary), Some(fallback))
                } else {
                    let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, false)
                        .reconcile(None, props.children())?;
                    (child, child)
                }
            }
            Some(current) => {
                let prev_timed_out = matches!(self.fibers[current].memoized_state, MemoizedState::Suspense(_));
                let pair = if prev_timed_out {
                    let current_primary = self.fibers[current]
                        .child
                        .ok_or(Invariant::Missing("the primary fragment of a timed-out boundary"))?;
                    let current_fallback = self.fibers[current_primary]
                        .sibling
                        .ok_or(Invariant::Missing("the fallback fragment of a timed-out boundary"))?;
                    if timed_out {
                        let primary_props = self.fibers[current_primary].pending_props.clone();
                        let progressed = legacy.then(|| self.progressed_primary_child(wip));
                        let primary = self.fibers.create_work_in_progress(current_primary, primary_props);
                        if let Some(progressed) = progressed
                            && progressed != self.fibers[current_primary].child
                        {
                            self.fibers[primary].child = progressed;
                        }
                        let fallback = self.fibers.create_work_in_progress(
                            current_fallback,
                            FiberProps::Children(fallback_of(&props)),
                        );
                        self.link_suspense_fragments(wip, primary, fallback);
                        (Some(primary), Some(fallback))
                    } else {
                        // back to the primary children; the fallback is deleted on complete
                        let current_first = self.fibers[current_primary].child;
                        let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, true)
                            .reconcile(current_first, props.children())?;
                        (child, child)
                    }
                } else if timed_out {
                    let primary = self.fibers.create_fragment(Node::Empty, mode, NO_WORK, None);
                    self.fibers[primary].child = if legacy {
                        self.progressed_primary_child(wip)
                    } else {
                        self.fibers[current].child
                    };
                    let fallback = self
                        .fibers
                        .create_fragment(fallback_of(&props), mode, render_expiration_time, None);
                    self.fibers[fallback].effect_tag |= EffectTag::PLACEMENT;
                    self.link_suspense_fragments(wip, primary, fallback);
                    (Some(primary), Some(fallback))
                } else {
                    let current_first = self.fibers[current].child;
                    let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, true)
                        .reconcile(current_first, props.children())?;
                    (child, child)
                };
                self.fibers[wip].state_node = self.fibers[current].state_node.clone();
                pair
            }
        };

        let f = &mut self.fibers[wip];
        f.memoized_state = next_state;
        f.child = child;
        Ok(next)
    }

    fn link_suspense_fragments(&mut self, wip: FiberId, primary: FiberId, fallback: FiberId) {
        let p = &mut self.fibers[primary];
        p.sibling = Some(fallback);
        p.parent = Some(wip);
        // the hidden primary children are not worked on while timed out
        p.child_expiration_time = NO_WORK;
        let f = &mut self.fibers[fallback];
        f.sibling = None;
        f.parent = Some(wip);
    }

    fn update_dehydrated_suspense_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> RenderResult<Option<FiberId>> {
        let Some(current) = current else {
            // first pass: leave the server content alone and hydrate it later
            self.fibers[wip].expiration_time = NEVER;
            return Ok(None);
        };

        let context_changed = self.fibers[current].child_expiration_time >= render_expiration_time;
        let still_streaming = match &self.fibers[current].state_node {
            StateNode::Dehydrated(marker) => self.host.is_suspense_instance_pending(marker),
            _ => false,
        };
        if self.did_receive_update || context_changed || still_streaming {
            log::debug!("dehydrated boundary can't be hydrated; rendering it on the client");
            let parent = self.fibers[wip]
                .parent
                .ok_or(Invariant::Missing("a parent for a dehydrated boundary"))?;
            self.fibers[current].alternate = None;
            self.fibers[wip].alternate = None;
            match self.fibers[parent].last_effect {
                Some(last) => self.fibers[last].next_effect = Some(current),
                None => self.fibers[parent].first_effect = Some(current),
            }
            self.fibers[parent].last_effect = Some(current);
            let c = &mut self.fibers[current];
            c.next_effect = None;
            c.effect_tag = EffectTag::DELETION;

            let f = &mut self.fibers[wip];
            f.kind = FiberKind::SuspenseComponent;
            f.state_node = StateNode::None;
            f.memoized_state = MemoizedState::None;
            f.child = None;
            f.effect_tag |= EffectTag::PLACEMENT;
            return self.update_suspense_component(None, wip, render_expiration_time);
        }

        if !self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE) {
            self.reenter_hydration_state_from_dehydrated(wip);
            let children = self.fibers[wip].pending_props.children();
            let child = ChildReconciler::new(&mut self.fibers, wip, render_expiration_time, false)
                .reconcile(None, &children)?;
            self.fibers[wip].child = child;
            Ok(child)
        } else {
            // something suspended; keep the server content in place
            self.fibers[wip].child = None;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::element::{Context, ElementBuilder, host, memo};
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    fn legacy_root() -> (Reconciler<MemoryHost>, crate::fiber::RootId, crate::testing::NodeId) {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        (r, root, container)
    }

    #[test]
    fn test_unchanged_props_skip_render() {
        let renders = Rc::new(Cell::new(0));
        let seen = renders.clone();
        let leaf = FunctionComponent::new("Leaf", move |_, props| {
            seen.set(seen.get() + 1);
            Ok(Node::from(props.str("label").unwrap_or("").to_string()))
        });
        let item = memo(ElementType::Function(leaf), None);
        let (mut r, root, container) = legacy_root();

        let tree = |title: &str| -> Node {
            host("div")
                .child(host("h1").child(title.to_string()))
                .child(ElementBuilder::new(item.clone()).attr("label", "same"))
                .into()
        };
        r.render(root, tree("a")).unwrap();
        r.render(root, tree("b")).unwrap();
        assert_eq!(renders.get(), 1);
        assert_eq!(r.host().render(container), "<div><h1>b</h1>same</div>");
    }

    #[test]
    fn test_provider_change_reaches_consumers_below_memo() {
        let theme = Context::new(String::from("light"));
        let consumer_theme = theme.clone();
        let leaf = FunctionComponent::new("Leaf", move |_, _| {
            Ok(consumer_theme.consumer(|t: &String| Node::from(t.clone())).into())
        });
        let blocker = memo(ElementType::Function(leaf), Some(Rc::new(|_: &Props, _: &Props| true)));
        let (mut r, root, container) = legacy_root();

        let tree = |value: &str| -> Node {
            theme
                .provider(value.to_string(), ElementBuilder::new(blocker.clone()))
                .into()
        };
        r.render(root, tree("light")).unwrap();
        assert_eq!(r.host().render(container), "light");
        r.render(root, tree("dark")).unwrap();
        assert_eq!(r.host().render(container), "dark");
    }

    #[test]
    fn test_lazy_resolves_to_its_component() {
        let lazy = LazyComponent::new();
        let app = FunctionComponent::new("Inner", |_, _| Ok(Node::from("loaded")));
        lazy.resolve(ElementType::Function(app));
        let (mut r, root, container) = legacy_root();
        r.render(root, ElementBuilder::new(ElementType::Lazy(lazy))).unwrap();
        assert_eq!(r.host().render(container), "loaded");
        let child = r.fibers()[r.root_current(root).unwrap()].child().unwrap();
        assert_eq!(r.fibers()[child].kind().tag_name(), "FunctionComponent");
    }

    #[test]
    fn test_lazy_resolving_to_host_is_an_error() {
        let lazy = LazyComponent::new();
        lazy.resolve(ElementType::Host("div".into()));
        let (mut r, root, _) = legacy_root();
        let err = r.render(root, ElementBuilder::new(ElementType::Lazy(lazy))).unwrap_err();
        assert!(err.to_string().contains("element type is invalid"));
    }

    #[test]
    fn test_text_content_hosts_skip_text_children() {
        let mut r = Reconciler::new(MemoryHost::new().with_text_content_types(["textarea"]));
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, host("textarea").child("hello")).unwrap();
        let host_fiber = r.fibers()[r.root_current(root).unwrap()].child().unwrap();
        assert!(r.fibers()[host_fiber].child().is_none());
    }
}
