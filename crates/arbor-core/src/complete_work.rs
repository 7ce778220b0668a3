//! Complete-work: runs once a fiber's children are all done.
//!
//! Host fibers get their instances created, diffed or adopted from hydration
//! here. Contexts pushed in begin-work are popped, and the fiber's effects
//! are appended to its parent's effect list. A fiber flagged `INCOMPLETE`
//! unwinds instead, and the nearest boundary that captured is rendered again.

use crate::element::Props;
use crate::error::Invariant;
use crate::expiration::{ExpirationTime, NEVER, NO_WORK};
use crate::fiber::{EffectTag, FiberId, FiberKind, FiberQueue, MemoizedState, Mode, StateNode};
use crate::host_config::{HostConfig, HostNode};
use crate::profiler::accumulate_child_durations;
use crate::reconciler::Reconciler;

impl<H: HostConfig> Reconciler<H> {
    /// Completes `wip` and walks up until a sibling with work remains.
    /// Returns the next fiber to begin, or `None` once the root is done.
    pub(crate) fn complete_unit_of_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, Invariant> {
        let render_expiration_time = self.work.next_render_expiration_time;
        let mut wip = wip;
        loop {
            let current = self.fibers[wip].alternate;
            let return_fiber = self.fibers[wip].parent;
            let sibling = self.fibers[wip].sibling;
            let profiling = self.fibers[wip].mode.contains(Mode::PROFILE);

            if !self.fibers[wip].effect_tag.contains(EffectTag::INCOMPLETE) {
                if profiling {
                    let now = self.host.now();
                    self.profiler.start(&mut self.fibers, wip, now);
                }
                let next = self.complete_work(current, wip, render_expiration_time)?;
                if profiling {
                    let now = self.host.now();
                    self.profiler.stop_and_record(&mut self.fibers, wip, now, false);
                }
                self.reset_child_expiration_time(wip, render_expiration_time);
                if next.is_some() {
                    return Ok(next);
                }

                if let Some(parent) = return_fiber
                    && !self.fibers[parent].effect_tag.contains(EffectTag::INCOMPLETE)
                {
                    self.append_effects_to_parent(wip, parent);
                }
            } else {
                if profiling {
                    let now = self.host.now();
                    self.profiler.stop_and_record(&mut self.fibers, wip, now, false);
                    let mut actual = self.fibers[wip].actual_duration;
                    let mut child = self.fibers[wip].child;
                    while let Some(c) = child {
                        actual += self.fibers[c].actual_duration;
                        child = self.fibers[c].sibling;
                    }
                    self.fibers[wip].actual_duration = actual;
                }
                if let Some(next) = self.unwind_work(wip)? {
                    // the capturing boundary renders again; only host effects survive
                    self.fibers[next].effect_tag &= EffectTag::HOST_EFFECT_MASK;
                    return Ok(Some(next));
                }
                if let Some(parent) = return_fiber {
                    let p = &mut self.fibers[parent];
                    p.first_effect = None;
                    p.last_effect = None;
                    p.effect_tag |= EffectTag::INCOMPLETE;
                }
            }

            if sibling.is_some() {
                return Ok(sibling);
            }
            match return_fiber {
                Some(parent) => wip = parent,
                None => return Ok(None),
            }
        }
    }

    fn append_effects_to_parent(&mut self, wip: FiberId, parent: FiberId) {
        let (first, last) = (self.fibers[wip].first_effect, self.fibers[wip].last_effect);
        if self.fibers[parent].first_effect.is_none() {
            self.fibers[parent].first_effect = first;
        }
        if let Some(last) = last {
            if let Some(parent_last) = self.fibers[parent].last_effect {
                self.fibers[parent_last].next_effect = first;
            }
            self.fibers[parent].last_effect = Some(last);
        }

        // children's effects go first, so a parent commits after its subtree
        if self.fibers[wip].effect_tag.has_side_effects() {
            match self.fibers[parent].last_effect {
                Some(parent_last) => self.fibers[parent_last].next_effect = Some(wip),
                None => self.fibers[parent].first_effect = Some(wip),
            }
            self.fibers[parent].last_effect = Some(wip);
        }
    }

    /// Bubbles the highest pending priority of the children up to `wip`.
    fn reset_child_expiration_time(&mut self, wip: FiberId, render_expiration_time: ExpirationTime) {
        if render_expiration_time != NEVER && self.fibers[wip].child_expiration_time == NEVER {
            // hidden subtree; its work stays deferred
            return;
        }
        let mut new_child_expiration = NO_WORK;
        let mut child = self.fibers[wip].child;
        while let Some(c) = child {
            let f = &self.fibers[c];
            new_child_expiration = new_child_expiration
                .max(f.expiration_time)
                .max(f.child_expiration_time);
            child = f.sibling;
        }
        if self.fibers[wip].mode.contains(Mode::PROFILE) {
            accumulate_child_durations(&mut self.fibers, wip);
        }
        self.fibers[wip].child_expiration_time = new_child_expiration;
    }

    fn complete_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Invariant> {
        let kind = self.fibers[wip].kind.clone();
        match kind {
            FiberKind::FunctionComponent(_)
            | FiberKind::SimpleMemoComponent(_)
            | FiberKind::MemoComponent(_)
            | FiberKind::LazyComponent(_)
            | FiberKind::Fragment
            | FiberKind::Mode
            | FiberKind::Profiler
            | FiberKind::ContextConsumer(_) => {}
            FiberKind::ClassComponent(ty) | FiberKind::IncompleteClassComponent(ty) => {
                if ty.is_context_provider() {
                    self.legacy.pop(wip);
                }
            }
            FiberKind::HostRoot => {
                self.host_cx.pop_container(wip);
                self.legacy.pop(wip);
                if let StateNode::Root(root) = self.fibers[wip].state_node
                    && let Some(r) = self.roots.get_mut(root)
                    && let Some(pending) = r.pending_context.take()
                {
                    r.context = Some(pending);
                }
                if current.is_none_or(|c| self.fibers[c].child.is_none()) {
                    // hydrated or not, the root itself is never inserted
                    self.pop_hydration_state(wip);
                    self.fibers[wip].effect_tag.remove(EffectTag::PLACEMENT);
                }
                self.update_host_container(wip)?;
            }
            FiberKind::HostComponent(ty) => self.complete_host_component(current, wip, &ty)?,
            FiberKind::HostText => self.complete_host_text(current, wip)?,
            FiberKind::SuspenseComponent => {
                if self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE) {
                    // something suspended; render again showing the fallback
                    self.fibers[wip].expiration_time = render_expiration_time;
                    return Ok(Some(wip));
                }
                let next_did_timeout = matches!(self.fibers[wip].memoized_state, MemoizedState::Suspense(_));
                let prev_did_timeout =
                    current.is_some_and(|c| matches!(self.fibers[c].memoized_state, MemoizedState::Suspense(_)));
                if let Some(c) = current
                    && !next_did_timeout
                    && prev_did_timeout
                {
                    self.delete_current_fallback(c, wip);
                }
                // toggles visibility and attaches retry listeners at commit
                if next_did_timeout || prev_did_timeout {
                    self.fibers[wip].effect_tag |= EffectTag::UPDATE;
                }
            }
            FiberKind::DehydratedSuspenseComponent => {
                if current.is_none() {
                    if !self.pop_hydration_state(wip) {
                        return Err(Invariant::Other(
                            "a dehydrated suspense component was completed without a hydrated node",
                        ));
                    }
                    self.skip_past_dehydrated_suspense_instance(wip)?;
                } else if !self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE) {
                    // fully hydrated; from now on this is a plain boundary
                    log::trace!("dehydrated boundary hydrated");
                    if let Some(c) = current {
                        self.fibers[c].alternate = None;
                    }
                    let f = &mut self.fibers[wip];
                    f.alternate = None;
                    f.kind = FiberKind::SuspenseComponent;
                    f.memoized_state = MemoizedState::None;
                    f.state_node = StateNode::None;
                    self.reset_hydration_state();
                }
            }
            FiberKind::HostPortal => {
                self.host_cx.pop_container(wip);
                self.update_host_container(wip)?;
            }
            FiberKind::ContextProvider(_) => self.providers.pop(wip),
        }
        Ok(None)
    }

    /// Leaving a timed-out state: the fallback fragment goes away first,
    /// ahead of everything else in the boundary's effect list.
    fn delete_current_fallback(&mut self, current: FiberId, wip: FiberId) {
        let Some(fallback) = self.fibers[current].child.and_then(|c| self.fibers[c].sibling) else {
            return;
        };
        let first = self.fibers[wip].first_effect;
        self.fibers[fallback].next_effect = first;
        self.fibers[fallback].effect_tag = EffectTag::DELETION;
        let f = &mut self.fibers[wip];
        f.first_effect = Some(fallback);
        if first.is_none() {
            f.last_effect = Some(fallback);
        }
    }

    fn complete_host_component(&mut self, current: Option<FiberId>, wip: FiberId, ty: &str) -> Result<(), Invariant> {
        self.host_cx.pop_context(wip);
        let root_container = self.host_cx.root_container()?;
        let props = self.fibers[wip]
            .pending_props
            .props()
            .cloned()
            .ok_or(Invariant::Missing("props on a host component"))?;

        if let Some(c) = current
            && matches!(self.fibers[wip].state_node, StateNode::Instance(_))
        {
            self.complete_host_update(c, wip, ty, &props, &root_container)?;
            if !crate::element::Ref::same(self.fibers[c].ref_.as_ref(), self.fibers[wip].ref_.as_ref()) {
                self.fibers[wip].effect_tag |= EffectTag::REF;
            }
            return Ok(());
        }

        let host_context = self.host_cx.host_context()?;
        if self.pop_hydration_state(wip) {
            if self.prepare_to_hydrate_host_instance(wip, &root_container, &host_context)? {
                self.fibers[wip].effect_tag |= EffectTag::UPDATE;
            }
        } else {
            let instance = self
                .host
                .create_instance(ty, &props, &root_container, &host_context);
            for child in self.collect_host_children(self.fibers[wip].child, false, false) {
                self.host.append_initial_child(&instance, &child);
            }
            if self
                .host
                .finalize_initial_children(&instance, ty, &props, &root_container, &host_context)
            {
                self.fibers[wip].effect_tag |= EffectTag::UPDATE;
            }
            self.fibers[wip].state_node = StateNode::Instance(instance);
        }
        if self.fibers[wip].ref_.is_some() {
            self.fibers[wip].effect_tag |= EffectTag::REF;
        }
        Ok(())
    }

    fn complete_host_update(
        &mut self,
        current: FiberId,
        wip: FiberId,
        ty: &str,
        new_props: &Props,
        root_container: &H::Container,
    ) -> Result<(), Invariant> {
        let old_props = self.fibers[current].memoized_props.props().cloned().unwrap_or_default();
        let StateNode::Instance(current_instance) = self.fibers[current].state_node.clone() else {
            return Err(Invariant::Missing("a host instance on a mounted host component"));
        };

        if H::SUPPORTS_MUTATION {
            if old_props.ptr_eq(new_props) {
                return Ok(());
            }
            let host_context = self.host_cx.host_context()?;
            let payload =
                self.host
                    .prepare_update(&current_instance, ty, &old_props, new_props, root_container, &host_context);
            if let Some(payload) = payload {
                let f = &mut self.fibers[wip];
                f.update_queue = FiberQueue::Host(payload);
                f.effect_tag |= EffectTag::UPDATE;
            }
            return Ok(());
        }

        if !H::SUPPORTS_PERSISTENCE {
            return Ok(());
        }
        let children_unchanged = self.fibers[wip].first_effect.is_none();
        if children_unchanged && old_props.ptr_eq(new_props) {
            self.fibers[wip].state_node = StateNode::Instance(current_instance);
            return Ok(());
        }
        let host_context = self.host_cx.host_context()?;
        let payload = if old_props.ptr_eq(new_props) {
            None
        } else {
            self.host
                .prepare_update(&current_instance, ty, &old_props, new_props, root_container, &host_context)
        };
        if children_unchanged && payload.is_none() {
            self.fibers[wip].state_node = StateNode::Instance(current_instance);
            return Ok(());
        }
        let instance = self.host.clone_instance(
            &current_instance,
            payload.as_ref(),
            ty,
            &old_props,
            new_props,
            children_unchanged,
        );
        if self
            .host
            .finalize_initial_children(&instance, ty, new_props, root_container, &host_context)
        {
            self.fibers[wip].effect_tag |= EffectTag::UPDATE;
        }
        if children_unchanged {
            self.fibers[wip].effect_tag |= EffectTag::UPDATE;
        } else {
            for child in self.collect_host_children(self.fibers[wip].child, false, false) {
                self.host.append_initial_child(&instance, &child);
            }
        }
        self.fibers[wip].state_node = StateNode::Instance(instance);
        Ok(())
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<(), Invariant> {
        let new_text = self.fibers[wip].pending_props.text().to_string();
        if let Some(c) = current
            && matches!(self.fibers[wip].state_node, StateNode::Text(_))
        {
            let old_text = self.fibers[c].memoized_props.text().to_string();
            if old_text != new_text {
                if H::SUPPORTS_PERSISTENCE && !H::SUPPORTS_MUTATION {
                    let root_container = self.host_cx.root_container()?;
                    let host_context = self.host_cx.host_context()?;
                    let text = self
                        .host
                        .create_text_instance(&new_text, &root_container, &host_context);
                    self.fibers[wip].state_node = StateNode::Text(text);
                }
                self.fibers[wip].effect_tag |= EffectTag::UPDATE;
            }
            return Ok(());
        }

        let root_container = self.host_cx.root_container()?;
        let host_context = self.host_cx.host_context()?;
        if self.pop_hydration_state(wip) {
            if self.prepare_to_hydrate_host_text_instance(wip)? {
                self.fibers[wip].effect_tag |= EffectTag::UPDATE;
            }
        } else {
            let text = self
                .host
                .create_text_instance(&new_text, &root_container, &host_context);
            self.fibers[wip].state_node = StateNode::Text(text);
        }
        Ok(())
    }

    /// The top-level host nodes below `first` and its siblings, not
    /// descending into host nodes or portals. In persistent mode a subtree
    /// whose suspense visibility flipped is cloned hidden or unhidden.
    fn collect_host_children(
        &mut self,
        first: Option<FiberId>,
        needs_visibility_toggle: bool,
        is_hidden: bool,
    ) -> Vec<HostNode<H>> {
        let mut out = Vec::new();
        self.collect_host_children_into(first, needs_visibility_toggle, is_hidden, &mut out);
        out
    }

    fn collect_host_children_into(
        &mut self,
        first: Option<FiberId>,
        needs_visibility_toggle: bool,
        is_hidden: bool,
        out: &mut Vec<HostNode<H>>,
    ) {
        let toggle = H::SUPPORTS_PERSISTENCE && needs_visibility_toggle;
        let mut node = first;
        while let Some(id) = node {
            let f = &self.fibers[id];
            let sibling = f.sibling;
            match (&f.kind, &f.state_node) {
                (FiberKind::HostComponent(ty), StateNode::Instance(instance)) => {
                    let mut instance = instance.clone();
                    if toggle {
                        let (ty, props) = (ty.clone(), f.memoized_props.props().cloned().unwrap_or_default());
                        instance = if is_hidden {
                            self.host.clone_hidden_instance(&instance, &ty, &props)
                        } else {
                            self.host.clone_unhidden_instance(&instance, &ty, &props)
                        };
                    }
                    out.push(HostNode::Instance(instance));
                }
                (FiberKind::HostText, StateNode::Text(text)) => {
                    let mut text = text.clone();
                    if toggle {
                        let content = f.memoized_props.text().to_string();
                        text = if is_hidden {
                            self.host.clone_hidden_text_instance(&text, &content)
                        } else {
                            self.host.clone_unhidden_text_instance(&text, &content)
                        };
                    }
                    out.push(HostNode::Text(text));
                }
                // portal children live in another container
                (FiberKind::HostPortal, _) => {}
                (FiberKind::SuspenseComponent, _) if H::SUPPORTS_PERSISTENCE && self.visibility_flipped(id) => {
                    let new_hidden = matches!(f.memoized_state, MemoizedState::Suspense(_));
                    if new_hidden {
                        let primary = f.child;
                        let primary_children = primary.and_then(|p| self.fibers[p].child);
                        let fallback = primary.and_then(|p| self.fibers[p].sibling);
                        self.collect_host_children_into(primary_children, true, true, out);
                        self.collect_host_children_into(fallback, false, false, out);
                    } else {
                        let child = f.child;
                        self.collect_host_children_into(child, true, false, out);
                    }
                }
                _ => {
                    let child = f.child;
                    self.collect_host_children_into(child, needs_visibility_toggle, is_hidden, out);
                }
            }
            node = sibling;
        }
    }

    fn visibility_flipped(&self, boundary: FiberId) -> bool {
        let f = &self.fibers[boundary];
        let Some(current) = f.alternate.and_then(|a| self.fibers.get(a)) else {
            return false;
        };
        matches!(f.memoized_state, MemoizedState::Suspense(_))
            != matches!(current.memoized_state, MemoizedState::Suspense(_))
    }

    /// Persistent mode: builds the child set a root or portal swaps in at
    /// commit.
    fn update_host_container(&mut self, wip: FiberId) -> Result<(), Invariant> {
        if !H::SUPPORTS_PERSISTENCE || self.fibers[wip].first_effect.is_none() {
            return Ok(());
        }
        let container = match &self.fibers[wip].state_node {
            StateNode::Root(root) => self
                .roots
                .get(*root)
                .map(|r| r.container.clone())
                .ok_or(Invariant::Missing("a live root"))?,
            StateNode::Portal(portal) => portal.container.clone(),
            _ => return Err(Invariant::Missing("a host container")),
        };
        let mut set = self.host.create_container_child_set(&container);
        for child in self.collect_host_children(self.fibers[wip].child, false, false) {
            self.host.append_child_to_container_child_set(&mut set, &child);
        }
        self.host.finalize_container_children(&container, &set);
        match &self.fibers[wip].state_node {
            StateNode::Root(root) => {
                if let Some(r) = self.roots.get_mut(*root) {
                    r.pending_children = Some(set);
                }
            }
            StateNode::Portal(portal) => *portal.pending_children.borrow_mut() = Some(set),
            _ => {}
        }
        self.fibers[wip].effect_tag |= EffectTag::UPDATE;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Node, host};
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    #[test]
    fn test_mount_builds_instances_bottom_up() {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, host("ul").child(host("li").child("a")).child(host("li").child("b")))
            .unwrap();
        let ops = r.host_mut().take_ops();
        let first_append = ops.iter().position(|o| o.starts_with("append")).unwrap();
        let last_create = ops.iter().rposition(|o| o.starts_with("create")).unwrap();
        assert!(last_create < first_append);
        assert_eq!(r.host().render(container), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_unchanged_props_produce_no_update() {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        let tree: Node = host("div").attr("id", "x").into();
        r.render(root, tree.clone()).unwrap();
        r.host_mut().take_ops();
        r.render(root, host("div").attr("id", "x")).unwrap();
        assert!(r.host().ops().iter().all(|o| !o.starts_with("update")));
        r.render(root, host("div").attr("id", "y")).unwrap();
        assert_eq!(r.host().ops().iter().filter(|o| o.starts_with("update")).count(), 1);
    }

    #[test]
    fn test_child_expiration_bubbles_from_children() {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, host("div").child(host("span"))).unwrap();
        let current = r.root_current(root).unwrap();
        assert_eq!(r.fibers()[current].child_expiration_time(), NO_WORK);
    }
}
