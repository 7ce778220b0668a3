//! Adopting host nodes that already exist, e.g. server-rendered markup.
//!
//! While a fresh subtree mounts, each host fiber first tries to claim the next
//! existing node instead of creating one. A mismatch stops hydration for that
//! subtree (it gets inserted normally) and existing nodes nothing claimed are
//! deleted once their parent completes.

use crate::error::Invariant;
use crate::fiber::{EffectTag, FiberId, FiberKind, StateNode};
use crate::host_config::{HostConfig, Hydratable};
use crate::reconciler::Reconciler;

pub(crate) struct HydrationState<H: HostConfig> {
    parent: Option<FiberId>,
    next: Option<Hydratable<H>>,
    is_hydrating: bool,
}

impl<H: HostConfig> Default for HydrationState<H> {
    fn default() -> Self {
        Self {
            parent: None,
            next: None,
            is_hydrating: false,
        }
    }
}

fn hydratable_of<H: HostConfig>(node: &StateNode<H>) -> Option<Hydratable<H>> {
    match node {
        StateNode::Instance(i) => Some(Hydratable::Instance(i.clone())),
        StateNode::Text(t) => Some(Hydratable::Text(t.clone())),
        StateNode::Dehydrated(s) => Some(Hydratable::Suspense(s.clone())),
        _ => None,
    }
}

impl<H: HostConfig> Reconciler<H> {
    /// Starts hydrating a root's container.
    pub(crate) fn enter_hydration_state(&mut self, root_fiber: FiberId) -> bool {
        if !H::SUPPORTS_HYDRATION {
            return false;
        }
        let StateNode::Root(root) = self.fibers[root_fiber].state_node else {
            return false;
        };
        let Some(r) = self.roots.get(root) else {
            return false;
        };
        self.hydration.next = self.host.first_hydratable_child_of_container(&r.container);
        self.hydration.parent = Some(root_fiber);
        self.hydration.is_hydrating = true;
        true
    }

    /// Starts hydrating the content of a dehydrated suspense boundary.
    pub(crate) fn reenter_hydration_state_from_dehydrated(&mut self, fiber: FiberId) -> bool {
        if !H::SUPPORTS_HYDRATION {
            return false;
        }
        let StateNode::Dehydrated(marker) = &self.fibers[fiber].state_node else {
            return false;
        };
        self.hydration.next = self.host.first_hydratable_child(&Hydratable::Suspense(marker.clone()));
        self.hydration.parent = Some(fiber);
        self.hydration.is_hydrating = true;
        true
    }

    pub(crate) fn reset_hydration_state(&mut self) {
        self.hydration.parent = None;
        self.hydration.next = None;
        self.hydration.is_hydrating = false;
    }

    fn delete_hydratable_instance(&mut self, return_fiber: FiberId, node: Hydratable<H>) {
        let (state_node, kind) = match node {
            Hydratable::Instance(i) => (StateNode::Instance(i), FiberKind::HostComponent("#unclaimed".into())),
            Hydratable::Text(t) => (StateNode::Text(t), FiberKind::HostText),
            Hydratable::Suspense(s) => (StateNode::Dehydrated(s), FiberKind::DehydratedSuspenseComponent),
        };
        let deleted = self.fibers.create_for_deletion(state_node, kind);
        self.fibers[deleted].parent = Some(return_fiber);
        match self.fibers[return_fiber].last_effect {
            Some(last) => self.fibers[last].next_effect = Some(deleted),
            None => self.fibers[return_fiber].first_effect = Some(deleted),
        }
        self.fibers[return_fiber].last_effect = Some(deleted);
    }

    fn insert_non_hydrated_instance(&mut self, fiber: FiberId) {
        self.fibers[fiber].effect_tag |= EffectTag::PLACEMENT;
        log::warn!(
            "hydration mismatch: expected existing host content to match <{}>",
            self.fibers[fiber].display_name()
        );
    }

    fn try_hydrate(&mut self, fiber: FiberId, node: &Hydratable<H>) -> bool {
        let f = &self.fibers[fiber];
        match &f.kind {
            FiberKind::HostComponent(ty) => {
                let Some(props) = f.pending_props.props() else {
                    return false;
                };
                match self.host.can_hydrate_instance(node, ty, props) {
                    Some(instance) => {
                        self.fibers[fiber].state_node = StateNode::Instance(instance);
                        true
                    }
                    None => false,
                }
            }
            FiberKind::HostText => match self.host.can_hydrate_text_instance(node, f.pending_props.text()) {
                Some(text) => {
                    self.fibers[fiber].state_node = StateNode::Text(text);
                    true
                }
                None => false,
            },
            FiberKind::SuspenseComponent => match self.host.can_hydrate_suspense_instance(node) {
                Some(marker) => {
                    // stays dehydrated until its content is hydrated
                    let f = &mut self.fibers[fiber];
                    f.kind = FiberKind::DehydratedSuspenseComponent;
                    f.state_node = StateNode::Dehydrated(marker);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Tries to adopt the next existing node for a mounting host fiber.
    pub(crate) fn try_to_claim_next_hydratable_instance(&mut self, fiber: FiberId) {
        if !self.hydration.is_hydrating {
            return;
        }
        let Some(first) = self.hydration.next.clone() else {
            self.insert_non_hydrated_instance(fiber);
            self.hydration.is_hydrating = false;
            self.hydration.parent = Some(fiber);
            return;
        };
        if !self.try_hydrate(fiber, &first) {
            // one node of slack: the next sibling may match instead
            let second = self.host.next_hydratable_sibling(&first);
            let matched = match &second {
                Some(second) => self.try_hydrate(fiber, second),
                None => false,
            };
            if !matched {
                self.insert_non_hydrated_instance(fiber);
                self.hydration.is_hydrating = false;
                self.hydration.parent = Some(fiber);
                return;
            }
            if let Some(parent) = self.hydration.parent {
                self.delete_hydratable_instance(parent, first);
            }
        }
        self.hydration.parent = Some(fiber);
        self.hydration.next = hydratable_of(&self.fibers[fiber].state_node)
            .and_then(|node| self.host.first_hydratable_child(&node));
    }

    /// Attaches props to an adopted instance. Returns whether the fiber needs
    /// an update at commit.
    pub(crate) fn prepare_to_hydrate_host_instance(
        &mut self,
        fiber: FiberId,
        root_container: &H::Container,
        host_context: &H::HostContext,
    ) -> Result<bool, Invariant> {
        let f = &self.fibers[fiber];
        let (StateNode::Instance(instance), FiberKind::HostComponent(ty)) = (&f.state_node, &f.kind) else {
            return Err(Invariant::Missing("a hydrated host instance"));
        };
        let props = f.memoized_props.props().cloned().unwrap_or_default();
        let (instance, ty) = (instance.clone(), ty.clone());
        let payload = self
            .host
            .hydrate_instance(&instance, &ty, &props, root_container, host_context);
        let changed = payload.is_some();
        if let Some(payload) = payload {
            self.fibers[fiber].update_queue = crate::fiber::FiberQueue::Host(payload);
        }
        Ok(changed)
    }

    pub(crate) fn prepare_to_hydrate_host_text_instance(&mut self, fiber: FiberId) -> Result<bool, Invariant> {
        let f = &self.fibers[fiber];
        let StateNode::Text(text) = &f.state_node else {
            return Err(Invariant::Missing("a hydrated text instance"));
        };
        let (text, content) = (text.clone(), f.memoized_props.text().to_string());
        Ok(self.host.hydrate_text_instance(&text, &content))
    }

    fn pop_to_next_host_parent(&mut self, fiber: FiberId) {
        let mut parent = self.fibers[fiber].parent;
        while let Some(p) = parent {
            if matches!(
                self.fibers[p].kind,
                FiberKind::HostComponent(_) | FiberKind::HostRoot | FiberKind::DehydratedSuspenseComponent
            ) {
                break;
            }
            parent = self.fibers[p].parent;
        }
        self.hydration.parent = parent;
    }

    /// Called when a host fiber completes. Returns whether it was hydrated.
    pub(crate) fn pop_hydration_state(&mut self, fiber: FiberId) -> bool {
        if !H::SUPPORTS_HYDRATION || self.hydration.parent != Some(fiber) {
            return false;
        }
        if !self.hydration.is_hydrating {
            // this fiber was inserted; resume hydrating its siblings
            self.pop_to_next_host_parent(fiber);
            self.hydration.is_hydrating = true;
            return false;
        }

        let keeps_leftovers = match &self.fibers[fiber].kind {
            FiberKind::HostComponent(ty) => self
                .fibers[fiber]
                .memoized_props
                .props()
                .is_some_and(|p| self.host.should_set_text_content(ty, p)),
            // the boundary's content is claimed when it hydrates later
            FiberKind::DehydratedSuspenseComponent => true,
            _ => false,
        };
        if !keeps_leftovers {
            let mut next = self.hydration.next.take();
            while let Some(node) = next {
                next = self.host.next_hydratable_sibling(&node);
                self.delete_hydratable_instance(fiber, node);
            }
        }

        self.pop_to_next_host_parent(fiber);
        self.hydration.next = match self.hydration.parent {
            Some(_) => hydratable_of(&self.fibers[fiber].state_node)
                .and_then(|node| self.host.next_hydratable_sibling(&node)),
            None => None,
        };
        true
    }

    pub(crate) fn skip_past_dehydrated_suspense_instance(&mut self, fiber: FiberId) -> Result<(), Invariant> {
        let StateNode::Dehydrated(marker) = &self.fibers[fiber].state_node else {
            return Err(Invariant::Missing("a dehydrated suspense marker"));
        };
        self.hydration.next = self.host.next_hydratable_after_suspense(marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    fn hydrating_root(h: MemoryHost, container: crate::testing::NodeId) -> (Reconciler<MemoryHost>, crate::fiber::RootId) {
        let mut r = Reconciler::new(h);
        let root = r.create_container(
            container,
            RootOptions {
                hydrate: true,
                ..Default::default()
            },
        );
        (r, root)
    }

    #[test]
    fn test_matching_markup_is_adopted() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let div = h.server_element(container, "div", &[("id", "a")]);
        h.server_text(div, "hi");
        let (mut r, root) = hydrating_root(h, container);
        r.host_mut().take_ops();

        r.render(root, host("div").attr("id", "a").child("hi")).unwrap();
        let ops = r.host_mut().take_ops();
        assert!(ops.iter().any(|o| o == &format!("hydrate div {div:?}")));
        assert!(!ops.iter().any(|o| o.starts_with("create")));
        assert_eq!(r.host().render(container), "<div id=\"a\">hi</div>");
    }

    #[test]
    fn test_mismatch_inserts_and_deletes_leftovers() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let stale = h.server_element(container, "span", &[]);
        let (mut r, root) = hydrating_root(h, container);

        r.render(root, host("p").child("x")).unwrap();
        let ops = r.host().ops();
        assert!(ops.iter().any(|o| o.starts_with("create p")));
        assert!(ops.iter().any(|o| o == &format!("remove {stale:?} from {container:?}")));
        assert_eq!(r.host().render(container), "<p>x</p>");
    }

    #[test]
    fn test_changed_attributes_are_patched() {
        let mut h = MemoryHost::new();
        let container = h.create_root();
        let div = h.server_element(container, "div", &[("id", "old")]);
        let (mut r, root) = hydrating_root(h, container);
        r.render(root, host("div").attr("id", "new")).unwrap();
        assert_eq!(r.host().attr(div, "id"), Some("new"));
    }
}
