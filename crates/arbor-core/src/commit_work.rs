//! The commit passes applied to each fiber on the effect list.
//!
//! Before mutation, snapshots are taken. The mutation pass inserts, updates
//! and removes host nodes; deletions also unmount the whole removed subtree.
//! The layout pass runs lifecycles, layout effects and update callbacks, and
//! attaches refs. Passive effects run later through their own host callback.

use crate::current_fiber::log_captured_error;
use crate::element::{ID_PROP, ON_RENDER_PROP};
use crate::error::{Invariant, ReconcilerError, UserError};
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::fiber::{EffectTag, FiberId, FiberKind, FiberQueue, MemoizedState, StateNode};
use crate::hooks::HookEffectTag;
use crate::host_config::{HostConfig, HostNode};
use crate::profiler::{ProfilerPhase, ProfilerReport};
use crate::reconciler::Reconciler;
use crate::suspense::SuspenseState;
use crate::update_queue::{Update, UpdateCallback};
use crate::work_loop::CommitError;

/// Where host children of a fiber get inserted.
enum HostParent<H: HostConfig> {
    Instance(H::Instance),
    Container(H::Container),
}

impl<H: HostConfig> Reconciler<H> {
    // -- before mutation --

    pub(crate) fn commit_before_mutation_lifecycles(&mut self, finished: FiberId) -> Result<(), CommitError> {
        let kind = self.fibers[finished].kind.clone();
        match kind {
            FiberKind::FunctionComponent(_) | FiberKind::SimpleMemoComponent(_) => {
                self.commit_hook_effect_list(finished, HookEffectTag::UNMOUNT_SNAPSHOT, HookEffectTag::empty())?;
            }
            FiberKind::ClassComponent(_) => {
                let Some(current) = self.fibers[finished].alternate else {
                    return Ok(());
                };
                let instance = self.refresh_class_instance(finished)?;
                let prev_props = self.fibers[current].memoized_props.props().cloned().unwrap_or_default();
                let prev_state = self.fibers[current]
                    .memoized_state
                    .state()
                    .cloned()
                    .ok_or(Invariant::Missing("class state on a mounted class"))?;
                instance.snapshot_before_update(&prev_props, &prev_state)?;
            }
            FiberKind::HostRoot
            | FiberKind::HostComponent(_)
            | FiberKind::HostText
            | FiberKind::HostPortal
            | FiberKind::IncompleteClassComponent(_) => {}
            other => return Err(Invariant::UnexpectedEffect(other.tag_name()).into()),
        }
        Ok(())
    }

    /// Brings the instance in line with the committed fiber. A bailed-out
    /// render may leave it holding props or state from an abandoned pass.
    fn refresh_class_instance(&self, finished: FiberId) -> Result<crate::class::ClassInstance, Invariant> {
        let f = &self.fibers[finished];
        let instance = f.class_instance().cloned().ok_or(Invariant::Missing("a class instance"))?;
        if let Some(props) = f.memoized_props.props() {
            *instance.0.props.borrow_mut() = props.clone();
        }
        if let Some(state) = f.memoized_state.state() {
            *instance.0.state.borrow_mut() = state.clone();
        }
        Ok(instance)
    }

    // -- mutation --

    pub(crate) fn commit_mutation_effect(&mut self, effect: FiberId) -> Result<(), CommitError> {
        let tag = self.fibers[effect].effect_tag;
        if tag.contains(EffectTag::CONTENT_RESET)
            && H::SUPPORTS_MUTATION
            && let StateNode::Instance(instance) = &self.fibers[effect].state_node
        {
            let instance = instance.clone();
            self.host.reset_text_content(&instance);
        }
        if tag.contains(EffectTag::REF)
            && let Some(current) = self.fibers[effect].alternate
        {
            self.commit_detach_ref(current)?;
        }

        let primary = tag & (EffectTag::PLACEMENT | EffectTag::UPDATE | EffectTag::DELETION);
        if primary == EffectTag::PLACEMENT {
            self.commit_placement(effect)?;
            self.fibers[effect].effect_tag.remove(EffectTag::PLACEMENT);
        } else if primary == EffectTag::PLACEMENT_AND_UPDATE {
            self.commit_placement(effect)?;
            self.fibers[effect].effect_tag.remove(EffectTag::PLACEMENT);
            let current = self.fibers[effect].alternate;
            self.commit_work(current, effect)?;
        } else if primary == EffectTag::UPDATE {
            let current = self.fibers[effect].alternate;
            self.commit_work(current, effect)?;
        } else if primary == EffectTag::DELETION {
            self.commit_deletion(effect)?;
        }
        Ok(())
    }

    fn host_parent_fiber(&self, fiber: FiberId) -> Result<FiberId, Invariant> {
        let mut parent = self.fibers[fiber].parent;
        while let Some(p) = parent {
            if self.fibers[p].kind.is_host_parent() {
                return Ok(p);
            }
            parent = self.fibers[p].parent;
        }
        Err(Invariant::MissingHostParent)
    }

    fn host_parent_of(&self, parent_fiber: FiberId) -> Result<HostParent<H>, Invariant> {
        match &self.fibers[parent_fiber].state_node {
            StateNode::Instance(i) => Ok(HostParent::Instance(i.clone())),
            StateNode::Root(root) => self
                .roots
                .get(*root)
                .map(|r| HostParent::Container(r.container.clone()))
                .ok_or(Invariant::Missing("a live root")),
            StateNode::Portal(portal) => Ok(HostParent::Container(portal.container.clone())),
            _ => Err(Invariant::Other("invalid host parent fiber")),
        }
    }

    /// The first committed host node after `fiber` in document order within
    /// the same host parent, to insert before.
    fn host_sibling(&mut self, fiber: FiberId) -> Option<HostNode<H>> {
        let mut node = fiber;
        'siblings: loop {
            while self.fibers[node].sibling.is_none() {
                match self.fibers[node].parent {
                    Some(p) if !self.fibers[p].kind.is_host_parent() => node = p,
                    _ => return None,
                }
            }
            let sibling = self.fibers[node].sibling?;
            self.fibers[sibling].parent = self.fibers[node].parent;
            node = sibling;
            while !matches!(self.fibers[node].kind, FiberKind::HostComponent(_) | FiberKind::HostText) {
                let f = &self.fibers[node];
                // an inserted node is no stable anchor; neither are its children
                if f.effect_tag.contains(EffectTag::PLACEMENT) {
                    continue 'siblings;
                }
                match f.child {
                    Some(child) if !matches!(f.kind, FiberKind::HostPortal | FiberKind::DehydratedSuspenseComponent) => {
                        self.fibers[child].parent = Some(node);
                        node = child;
                    }
                    _ => continue 'siblings,
                }
            }
            if !self.fibers[node].effect_tag.contains(EffectTag::PLACEMENT) {
                return self.fibers[node].host_node();
            }
        }
    }

    fn commit_placement(&mut self, finished: FiberId) -> Result<(), Invariant> {
        if !H::SUPPORTS_MUTATION {
            return Ok(());
        }
        let parent_fiber = self.host_parent_fiber(finished)?;
        let parent = self.host_parent_of(parent_fiber)?;
        if self.fibers[parent_fiber].effect_tag.contains(EffectTag::CONTENT_RESET) {
            if let HostParent::Instance(instance) = &parent {
                self.host.reset_text_content(instance);
            }
            self.fibers[parent_fiber].effect_tag.remove(EffectTag::CONTENT_RESET);
        }
        let before = self.host_sibling(finished);

        let mut node = finished;
        loop {
            let f = &self.fibers[node];
            let is_host = matches!(f.kind, FiberKind::HostComponent(_) | FiberKind::HostText);
            let is_portal = matches!(f.kind, FiberKind::HostPortal);
            let first_child = f.child;
            if is_host {
                if let Some(child) = f.host_node() {
                    match (&parent, &before) {
                        (HostParent::Instance(p), Some(b)) => self.host.insert_before(p, &child, b),
                        (HostParent::Instance(p), None) => self.host.append_child(p, &child),
                        (HostParent::Container(c), Some(b)) => self.host.insert_in_container_before(c, &child, b),
                        (HostParent::Container(c), None) => self.host.append_child_to_container(c, &child),
                    }
                }
            } else if !is_portal && let Some(child) = first_child {
                // a portal's children go into its own container
                self.fibers[child].parent = Some(node);
                node = child;
                continue;
            }
            if node == finished {
                return Ok(());
            }
            while self.fibers[node].sibling.is_none() {
                match self.fibers[node].parent {
                    Some(p) if p != finished => node = p,
                    _ => return Ok(()),
                }
            }
            let Some(sibling) = self.fibers[node].sibling else {
                return Ok(());
            };
            self.fibers[sibling].parent = self.fibers[node].parent;
            node = sibling;
        }
    }

    fn commit_work(&mut self, current: Option<FiberId>, finished: FiberId) -> Result<(), CommitError> {
        let kind = self.fibers[finished].kind.clone();
        if !H::SUPPORTS_MUTATION {
            match kind {
                FiberKind::FunctionComponent(_) | FiberKind::SimpleMemoComponent(_) => {
                    self.commit_hook_effect_list(
                        finished,
                        HookEffectTag::UNMOUNT_MUTATION,
                        HookEffectTag::MOUNT_MUTATION,
                    )?;
                }
                FiberKind::Profiler => {}
                FiberKind::SuspenseComponent => self.commit_suspense_component(finished),
                _ => self.commit_container(finished),
            }
            return Ok(());
        }

        match kind {
            FiberKind::FunctionComponent(_) | FiberKind::SimpleMemoComponent(_) => {
                self.commit_hook_effect_list(finished, HookEffectTag::UNMOUNT_MUTATION, HookEffectTag::MOUNT_MUTATION)?;
            }
            FiberKind::ClassComponent(_)
            | FiberKind::HostRoot
            | FiberKind::Profiler
            | FiberKind::IncompleteClassComponent(_) => {}
            FiberKind::HostComponent(ty) => {
                let f = &mut self.fibers[finished];
                let StateNode::Instance(instance) = f.state_node.clone() else {
                    return Ok(());
                };
                let payload = std::mem::replace(&mut f.update_queue, FiberQueue::None);
                let new_props = f.memoized_props.props().cloned().unwrap_or_default();
                let old_props = current
                    .and_then(|c| self.fibers[c].memoized_props.props().cloned())
                    .unwrap_or_else(|| new_props.clone());
                if let FiberQueue::Host(payload) = payload {
                    self.host
                        .commit_update(&instance, &payload, &ty, &old_props, &new_props);
                }
            }
            FiberKind::HostText => {
                let f = &self.fibers[finished];
                let StateNode::Text(text) = f.state_node.clone() else {
                    return Err(Invariant::Missing("a text instance on a host text fiber").into());
                };
                let new_text = f.memoized_props.text().to_string();
                let old_text = current
                    .map(|c| self.fibers[c].memoized_props.text().to_string())
                    .unwrap_or_else(|| new_text.clone());
                self.host.commit_text_update(&text, &old_text, &new_text);
            }
            FiberKind::SuspenseComponent => self.commit_suspense_component(finished),
            other => return Err(Invariant::UnexpectedEffect(other.tag_name()).into()),
        }
        Ok(())
    }

    /// Persistent mode: swaps the prepared child set into a root or portal
    /// container.
    fn commit_container(&mut self, finished: FiberId) {
        match &self.fibers[finished].state_node {
            StateNode::Root(root) => {
                if let Some(r) = self.roots.get_mut(*root)
                    && let Some(set) = r.pending_children.take()
                {
                    let container = r.container.clone();
                    self.host.replace_container_children(&container, set);
                }
            }
            StateNode::Portal(portal) => {
                let set = portal.pending_children.borrow_mut().take();
                if let Some(set) = set {
                    let container = portal.container.clone();
                    self.host.replace_container_children(&container, set);
                }
            }
            _ => {}
        }
    }

    fn commit_suspense_component(&mut self, finished: FiberId) {
        let suspense = match &self.fibers[finished].memoized_state {
            MemoizedState::Suspense(state) => Some(*state),
            _ => None,
        };
        let (timed_out, primary_parent) = match suspense {
            Some(state) => {
                if state.timed_out_at == NO_WORK {
                    let now = self.request_current_time();
                    self.fibers[finished].memoized_state = MemoizedState::Suspense(SuspenseState { timed_out_at: now });
                }
                (true, self.fibers[finished].child)
            }
            None => (false, Some(finished)),
        };
        if H::SUPPORTS_MUTATION
            && let Some(parent) = primary_parent
        {
            self.hide_or_unhide_all_children(parent, timed_out);
        }

        let waits = match std::mem::replace(&mut self.fibers[finished].update_queue, FiberQueue::None) {
            FiberQueue::Wait(waits) => waits,
            other => {
                self.fibers[finished].update_queue = other;
                return;
            }
        };
        let cache = match &self.fibers[finished].state_node {
            StateNode::RetryCache(cache) => cache.clone(),
            _ => {
                let cache = std::rc::Rc::new(std::cell::RefCell::new(std::collections::HashSet::new()));
                self.fibers[finished].state_node = StateNode::RetryCache(cache.clone());
                cache
            }
        };
        for wait in &waits {
            self.attach_retry_listener(finished, &cache, wait);
        }
    }

    fn hide_or_unhide_all_children(&mut self, top: FiberId, is_hidden: bool) {
        let mut node = top;
        loop {
            let f = &self.fibers[node];
            // a nested boundary that timed out keeps its primary children
            // hidden, only the fallback follows
            let timed_out_fallback = match (&f.kind, &f.memoized_state) {
                (FiberKind::SuspenseComponent, MemoizedState::Suspense(_)) => {
                    f.child.and_then(|c| self.fibers[c].sibling)
                }
                _ => None,
            };
            if node != top
                && let Some(fallback) = timed_out_fallback
            {
                self.fibers[fallback].parent = Some(node);
                node = fallback;
                continue;
            }
            let f = &self.fibers[node];
            match (&f.kind, &f.state_node) {
                (FiberKind::HostComponent(_), StateNode::Instance(instance)) => {
                    let instance = instance.clone();
                    if is_hidden {
                        self.host.hide_instance(&instance);
                    } else {
                        let props = f.memoized_props.props().cloned().unwrap_or_default();
                        self.host.unhide_instance(&instance, &props);
                    }
                }
                (FiberKind::HostText, StateNode::Text(text)) => {
                    let text = text.clone();
                    if is_hidden {
                        self.host.hide_text_instance(&text);
                    } else {
                        let content = f.memoized_props.text().to_string();
                        self.host.unhide_text_instance(&text, &content);
                    }
                }
                _ => {
                    if let Some(child) = f.child {
                        self.fibers[child].parent = Some(node);
                        node = child;
                        continue;
                    }
                }
            }
            if node == top {
                return;
            }
            while self.fibers[node].sibling.is_none() {
                match self.fibers[node].parent {
                    Some(p) if p != top => node = p,
                    _ => return,
                }
            }
            let Some(sibling) = self.fibers[node].sibling else {
                return;
            };
            self.fibers[sibling].parent = self.fibers[node].parent;
            node = sibling;
        }
    }

    // -- deletion --

    fn commit_deletion(&mut self, current: FiberId) -> Result<(), CommitError> {
        if H::SUPPORTS_MUTATION {
            self.unmount_host_components(current)?;
        } else {
            self.commit_nested_unmounts(current)?;
        }
        if let Some(alt) = self.fibers[current].alternate
            && let Some(f) = self.fibers.get_mut(alt)
        {
            f.parent = None;
        }
        self.fibers[current].parent = None;
        self.work.deleted.push(current);
        Ok(())
    }

    /// Removes the top-level host nodes of a deleted subtree from their
    /// parent, unmounting everything along the way.
    fn unmount_host_components(&mut self, current: FiberId) -> Result<(), CommitError> {
        let mut node = current;
        let mut parent: Option<HostParent<H>> = None;
        loop {
            if parent.is_none() {
                let parent_fiber = self.host_parent_fiber(node)?;
                parent = Some(self.host_parent_of(parent_fiber)?);
            }
            let Some(host_parent) = &parent else {
                return Err(Invariant::MissingHostParent.into());
            };

            let kind = self.fibers[node].kind.clone();
            match kind {
                FiberKind::HostComponent(_) | FiberKind::HostText => {
                    self.commit_nested_unmounts(node)?;
                    if let Some(child) = self.fibers[node].host_node() {
                        match host_parent {
                            HostParent::Instance(p) => self.host.remove_child(p, &child),
                            HostParent::Container(c) => self.host.remove_child_from_container(c, &child),
                        }
                    }
                }
                FiberKind::DehydratedSuspenseComponent => {
                    if let StateNode::Dehydrated(marker) = &self.fibers[node].state_node {
                        let marker = marker.clone();
                        match host_parent {
                            HostParent::Instance(p) => self.host.clear_suspense_boundary(p, &marker),
                            HostParent::Container(c) => self.host.clear_suspense_boundary_from_container(c, &marker),
                        }
                    }
                }
                FiberKind::HostPortal => {
                    if let Some(child) = self.fibers[node].child {
                        if let StateNode::Portal(portal) = &self.fibers[node].state_node {
                            parent = Some(HostParent::Container(portal.container.clone()));
                        }
                        self.fibers[child].parent = Some(node);
                        node = child;
                        continue;
                    }
                }
                _ => {
                    self.commit_unmount(node)?;
                    if let Some(child) = self.fibers[node].child {
                        self.fibers[child].parent = Some(node);
                        node = child;
                        continue;
                    }
                }
            }
            if node == current {
                return Ok(());
            }
            while self.fibers[node].sibling.is_none() {
                match self.fibers[node].parent {
                    Some(p) if p != current => {
                        node = p;
                        if matches!(self.fibers[node].kind, FiberKind::HostPortal) {
                            // back out of the portal; find the outer parent again
                            parent = None;
                        }
                    }
                    _ => return Ok(()),
                }
            }
            let Some(sibling) = self.fibers[node].sibling else {
                return Ok(());
            };
            self.fibers[sibling].parent = self.fibers[node].parent;
            node = sibling;
        }
    }

    /// Runs unmount work for every fiber under `root`. Host nodes are not
    /// removed; their top-level ancestor's removal takes them along.
    fn commit_nested_unmounts(&mut self, root: FiberId) -> Result<(), CommitError> {
        let mut node = root;
        loop {
            self.commit_unmount(node)?;
            let f = &self.fibers[node];
            if let Some(child) = f.child
                && (!H::SUPPORTS_MUTATION || !matches!(f.kind, FiberKind::HostPortal))
            {
                self.fibers[child].parent = Some(node);
                node = child;
                continue;
            }
            if node == root {
                return Ok(());
            }
            while self.fibers[node].sibling.is_none() {
                match self.fibers[node].parent {
                    Some(p) if p != root => node = p,
                    _ => return Ok(()),
                }
            }
            let Some(sibling) = self.fibers[node].sibling else {
                return Ok(());
            };
            self.fibers[sibling].parent = self.fibers[node].parent;
            node = sibling;
        }
    }

    fn commit_unmount(&mut self, fiber: FiberId) -> Result<(), CommitError> {
        let kind = self.fibers[fiber].kind.clone();
        match kind {
            FiberKind::FunctionComponent(_) | FiberKind::SimpleMemoComponent(_) => {
                if let FiberQueue::Effects(effects) = &self.fibers[fiber].update_queue {
                    let effects = effects.clone();
                    for effect in effects.iter() {
                        let result = effect.unmount();
                        self.safely(fiber, result)?;
                    }
                }
            }
            FiberKind::ClassComponent(_) => {
                self.safely_detach_ref(fiber)?;
                if let Some(instance) = self.fibers[fiber].class_instance().cloned() {
                    let result = instance.will_unmount();
                    self.safely(fiber, result)?;
                }
            }
            FiberKind::HostComponent(_) => self.safely_detach_ref(fiber)?,
            FiberKind::HostPortal => {
                if H::SUPPORTS_MUTATION {
                    self.unmount_host_components(fiber)?;
                } else if let StateNode::Portal(portal) = &self.fibers[fiber].state_node {
                    let container = portal.container.clone();
                    let empty = self.host.create_container_child_set(&container);
                    self.host.replace_container_children(&container, empty);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Routes an error from unmount code to the nearest boundary so the rest
    /// of the deletion still runs.
    fn safely(&mut self, fiber: FiberId, result: Result<(), UserError>) -> Result<(), CommitError> {
        let Err(error) = result else {
            return Ok(());
        };
        self.capture_commit_phase_error(fiber, error).map_err(|e| match e {
            ReconcilerError::Invariant(inv) => CommitError::Invariant(inv),
            ReconcilerError::Uncaught(error) => CommitError::User(error),
            ReconcilerError::UnknownRoot => CommitError::Invariant(Invariant::Missing("a live root")),
        })
    }

    fn safely_detach_ref(&mut self, fiber: FiberId) -> Result<(), CommitError> {
        let Some(r) = self.fibers[fiber].ref_.clone() else {
            return Ok(());
        };
        let result = r.set(None);
        self.safely(fiber, result)
    }

    fn commit_detach_ref(&mut self, current: FiberId) -> Result<(), CommitError> {
        if let Some(r) = &self.fibers[current].ref_ {
            r.set(None)?;
        }
        Ok(())
    }

    pub(crate) fn commit_attach_ref(&mut self, finished: FiberId) -> Result<(), CommitError> {
        let Some(r) = self.fibers[finished].ref_.clone() else {
            return Ok(());
        };
        let target = self.public_instance_of(finished);
        r.set(target)?;
        Ok(())
    }

    // -- layout --

    pub(crate) fn commit_lifecycles(
        &mut self,
        current: Option<FiberId>,
        finished: FiberId,
        _committed_expiration_time: ExpirationTime,
    ) -> Result<(), CommitError> {
        let kind = self.fibers[finished].kind.clone();
        match kind {
            FiberKind::FunctionComponent(_) | FiberKind::SimpleMemoComponent(_) => {
                self.commit_hook_effect_list(finished, HookEffectTag::UNMOUNT_LAYOUT, HookEffectTag::MOUNT_LAYOUT)?;
            }
            FiberKind::ClassComponent(_) => {
                if self.fibers[finished].effect_tag.contains(EffectTag::UPDATE) {
                    let instance = self.refresh_class_instance(finished)?;
                    match current {
                        None => instance.did_mount()?,
                        Some(c) => {
                            let prev_props = self.fibers[c].memoized_props.props().cloned().unwrap_or_default();
                            let prev_state = self.fibers[c]
                                .memoized_state
                                .state()
                                .cloned()
                                .ok_or(Invariant::Missing("class state on a mounted class"))?;
                            instance.did_update(&prev_props, &prev_state)?;
                        }
                    }
                }
                self.commit_update_callbacks(finished)?;
            }
            FiberKind::HostRoot => self.commit_update_callbacks(finished)?,
            FiberKind::HostComponent(ty) => {
                let f = &self.fibers[finished];
                if current.is_none()
                    && f.effect_tag.contains(EffectTag::UPDATE)
                    && let StateNode::Instance(instance) = &f.state_node
                {
                    let instance = instance.clone();
                    let props = f.memoized_props.props().cloned().unwrap_or_default();
                    self.host.commit_mount(&instance, &ty, &props);
                }
            }
            FiberKind::Profiler => self.report_profiler_render(current, finished),
            FiberKind::HostText
            | FiberKind::HostPortal
            | FiberKind::SuspenseComponent
            | FiberKind::IncompleteClassComponent(_) => {}
            other => return Err(Invariant::UnexpectedEffect(other.tag_name()).into()),
        }
        Ok(())
    }

    fn commit_update_callbacks(&mut self, finished: FiberId) -> Result<(), CommitError> {
        let callbacks = match &mut self.fibers[finished].update_queue {
            FiberQueue::State(queue) => queue.take_commit_callbacks(),
            _ => return Ok(()),
        };
        for update in callbacks {
            self.run_update_callback(finished, &update)?;
        }
        Ok(())
    }

    fn run_update_callback(&mut self, fiber: FiberId, update: &Update) -> Result<(), CommitError> {
        match &update.callback {
            None => {}
            Some(UpdateCallback::Fn(cell)) => {
                let callback = cell.borrow_mut().take();
                if let Some(callback) = callback {
                    callback()?;
                }
            }
            Some(UpdateCallback::DidCatch(error)) => {
                let instance = self.fibers[fiber]
                    .class_instance()
                    .cloned()
                    .ok_or(Invariant::Missing("an error boundary instance"))?;
                let ty = instance.0.ty.clone();
                if !ty.factory().derives_state_from_error() {
                    // it only has did_catch; a second error must go further up
                    self.failed_boundaries.insert(instance.id());
                }
                log_captured_error(Some(ty.name()), error);
                if ty.factory().has_did_catch() {
                    instance.did_catch(error)?;
                }
            }
            Some(UpdateCallback::Uncaught(error)) => {
                log_captured_error(None, error);
                self.on_uncaught_error(error.clone());
            }
        }
        Ok(())
    }

    fn report_profiler_render(&mut self, current: Option<FiberId>, finished: FiberId) {
        let f = &self.fibers[finished];
        let Some(props) = f.memoized_props.props() else {
            return;
        };
        let Some(on_render) = props.any::<std::rc::Rc<dyn Fn(&ProfilerReport)>>(ON_RENDER_PROP) else {
            return;
        };
        let report = ProfilerReport {
            id: props.str(ID_PROP).unwrap_or_default().to_string(),
            phase: if current.is_none() {
                ProfilerPhase::Mount
            } else {
                ProfilerPhase::Update
            },
            actual_duration: f.actual_duration,
            base_duration: f.tree_base_duration,
            start_time: f.actual_start_time,
            commit_time: self.profiler.commit_time(),
        };
        log::trace!("profiler {} {:?}", report.id, report.phase);
        (on_render)(&report);
    }

    // -- hook effects --

    fn commit_hook_effect_list(
        &mut self,
        fiber: FiberId,
        unmount: HookEffectTag,
        mount: HookEffectTag,
    ) -> Result<(), UserError> {
        let FiberQueue::Effects(effects) = &self.fibers[fiber].update_queue else {
            return Ok(());
        };
        let effects = effects.clone();
        for effect in effects.iter() {
            if effect.tag.intersects(unmount) {
                effect.unmount()?;
            }
            if effect.tag.intersects(mount) {
                effect.mount()?;
            }
        }
        Ok(())
    }

    /// Passive cleanups of the last commit run before any new passive
    /// effect of this fiber.
    pub(crate) fn commit_passive_hook_effects(&mut self, fiber: FiberId) -> Result<(), UserError> {
        self.commit_hook_effect_list(fiber, HookEffectTag::UNMOUNT_PASSIVE, HookEffectTag::empty())?;
        self.commit_hook_effect_list(fiber, HookEffectTag::empty(), HookEffectTag::MOUNT_PASSIVE)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::element::{FunctionComponent, Node, RefObject, component, host};
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    fn legacy_root() -> (Reconciler<MemoryHost>, crate::fiber::RootId, crate::testing::NodeId) {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        (r, root, container)
    }

    fn list(keys: &[&str]) -> Node {
        host("ul")
            .children(keys.iter().map(|k| host("li").key(*k).child(*k).into()))
            .into()
    }

    #[test]
    fn test_moving_last_to_front_appends_the_rest() {
        let (mut r, root, container) = legacy_root();
        r.render(root, list(&["a", "b", "c"])).unwrap();
        r.host_mut().take_ops();
        // `c` keeps its slot; `a` and `b` fall behind it and move to the end
        r.render(root, list(&["c", "a", "b"])).unwrap();
        assert_eq!(r.host().render(container), "<ul><li>c</li><li>a</li><li>b</li></ul>");
        insta::assert_snapshot!(r.host_mut().take_ops().join("\n"), @r"
        prepare_for_commit
        append #2 to #7
        append #4 to #7
        reset_after_commit
        ");
    }

    #[test]
    fn test_keyed_move_inserts_before_next_sibling() {
        let (mut r, root, container) = legacy_root();
        r.render(root, list(&["a", "b", "c"])).unwrap();
        r.host_mut().take_ops();
        r.render(root, list(&["b", "a", "c"])).unwrap();
        assert_eq!(r.host().render(container), "<ul><li>b</li><li>a</li><li>c</li></ul>");
        insta::assert_snapshot!(r.host_mut().take_ops().join("\n"), @r"
        prepare_for_commit
        insert #2 before #6 in #7
        reset_after_commit
        ");
    }

    #[test]
    fn test_refs_attach_and_detach() {
        let (mut r, root, _) = legacy_root();
        let node_ref = RefObject::new();
        r.render(root, host("div").ref_(node_ref.clone())).unwrap();
        assert!(node_ref.current().and_then(|t| t.host::<crate::testing::NodeId>()).is_some());
        r.render(root, Node::Empty).unwrap();
        assert!(node_ref.current().is_none());
    }

    #[test]
    fn test_deleted_subtree_runs_cleanups() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let child = FunctionComponent::new("Child", move |cx, _| {
            let l = l.clone();
            cx.use_layout_effect(Some(vec![]), move || {
                l.borrow_mut().push("mount");
                let l = l.clone();
                crate::hooks::on_unmount(move || l.borrow_mut().push("cleanup"))
            });
            Ok(Node::from("child"))
        });
        let (mut r, root, container) = legacy_root();
        r.render(root, host("div").child(component(&child))).unwrap();
        r.render(root, host("div")).unwrap();
        assert_eq!(*log.borrow(), vec!["mount", "cleanup"]);
        assert_eq!(r.host().render(container), "<div></div>");
    }
}
