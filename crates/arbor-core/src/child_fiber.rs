//! Diffing a fiber's current children against a new [`Node`].
//!
//! Single children are matched by key and type. Lists take a fast path
//! while old and new line up slot by slot, then fall back to a key (or index)
//! map for the rest. Fibers that moved left of the last placed index get a
//! placement effect; unmatched old fibers are queued for deletion on the
//! parent's effect list.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::element::{Element, ElementType, Key, Node, Portal};
use crate::error::Invariant;
use crate::expiration::ExpirationTime;
use crate::fiber::{EffectTag, FiberArena, FiberId, FiberKind, FiberProps, StateNode};
use crate::host_config::HostConfig;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum MapKey {
    Key(Key),
    Index(usize),
}

pub(crate) struct ChildReconciler<'a, H: HostConfig> {
    fibers: &'a mut FiberArena<H>,
    parent: FiberId,
    expiration_time: ExpirationTime,
    /// False while mounting: the whole subtree is placed at once.
    track: bool,
}

impl<'a, H: HostConfig> ChildReconciler<'a, H> {
    pub(crate) fn new(
        fibers: &'a mut FiberArena<H>,
        parent: FiberId,
        expiration_time: ExpirationTime,
        track: bool,
    ) -> Self {
        Self {
            fibers,
            parent,
            expiration_time,
            track,
        }
    }

    /// Returns the new first child of the parent.
    pub(crate) fn reconcile(
        &mut self,
        current_first: Option<FiberId>,
        new_child: &Node,
    ) -> Result<Option<FiberId>, Invariant> {
        // an unkeyed top-level fragment is treated as its children
        let new_child = match new_child {
            Node::Element(el) if matches!(el.ty, ElementType::Fragment) && el.key.is_none() => {
                el.props.children()
            }
            other => other,
        };
        match new_child {
            Node::Element(el) => {
                let fiber = self.reconcile_single_element(current_first, el);
                Ok(Some(self.place_single_child(fiber)))
            }
            Node::Portal(p) => {
                let fiber = self.reconcile_single_portal(current_first, p)?;
                Ok(Some(self.place_single_child(fiber)))
            }
            Node::Text(text) => {
                let fiber = self.reconcile_single_text(current_first, text.clone());
                Ok(Some(self.place_single_child(fiber)))
            }
            Node::List(items) => self.reconcile_children_array(current_first, items),
            Node::Empty => {
                self.delete_remaining(current_first);
                Ok(None)
            }
        }
    }

    // -- effects --

    fn delete_child(&mut self, child: FiberId) {
        if !self.track {
            return;
        }
        let parent = self.parent;
        match self.fibers[parent].last_effect {
            Some(last) => self.fibers[last].next_effect = Some(child),
            None => self.fibers[parent].first_effect = Some(child),
        }
        self.fibers[parent].last_effect = Some(child);
        let c = &mut self.fibers[child];
        c.next_effect = None;
        c.effect_tag = EffectTag::DELETION;
    }

    fn delete_remaining(&mut self, mut child: Option<FiberId>) {
        if !self.track {
            return;
        }
        while let Some(c) = child {
            child = self.fibers[c].sibling;
            self.delete_child(c);
        }
    }

    fn place_child(&mut self, fiber: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        self.fibers[fiber].index = new_index;
        if !self.track {
            return last_placed_index;
        }
        let alternate = self.fibers[fiber].alternate;
        let old_index = alternate.and_then(|alt| self.fibers.get(alt)).map(|c| c.index);
        let f = &mut self.fibers[fiber];
        match old_index {
            Some(old) if old < last_placed_index => {
                f.effect_tag |= EffectTag::PLACEMENT;
                last_placed_index
            }
            Some(old) => old,
            None => {
                f.effect_tag |= EffectTag::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if self.track && self.fibers[fiber].alternate.is_none() {
            self.fibers[fiber].effect_tag |= EffectTag::PLACEMENT;
        }
        fiber
    }

    // -- fiber creation and reuse --

    fn adopt(&mut self, fiber: FiberId) -> FiberId {
        self.fibers[fiber].parent = Some(self.parent);
        fiber
    }

    fn use_fiber(&mut self, current: FiberId, props: FiberProps) -> FiberId {
        let wip = self.fibers.create_work_in_progress(current, props);
        let f = &mut self.fibers[wip];
        f.index = 0;
        f.sibling = None;
        self.adopt(wip)
    }

    fn mode(&self) -> crate::fiber::Mode {
        self.fibers[self.parent].mode
    }

    fn element_props(el: &Element) -> FiberProps {
        match el.ty {
            ElementType::Fragment => FiberProps::Children(el.props.children().clone()),
            _ => FiberProps::Props(el.props.clone()),
        }
    }

    fn create_element(&mut self, el: &Element) -> FiberId {
        let (mode, exp) = (self.mode(), self.expiration_time);
        let fiber = match el.ty {
            ElementType::Fragment => {
                self.fibers
                    .create_fragment(el.props.children().clone(), mode, exp, el.key.clone())
            }
            _ => {
                let fiber = self.fibers.create_from_element(el, mode, exp);
                self.fibers[fiber].ref_ = el.ref_.clone();
                fiber
            }
        };
        self.adopt(fiber)
    }

    fn create_text(&mut self, text: Rc<str>) -> FiberId {
        let fiber = self.fibers.create_text(text, self.mode(), self.expiration_time);
        self.adopt(fiber)
    }

    fn create_fragment(&mut self, children: Node, key: Option<Key>) -> FiberId {
        let fiber = self
            .fibers
            .create_fragment(children, self.mode(), self.expiration_time, key);
        self.adopt(fiber)
    }

    fn create_portal(&mut self, portal: &Portal) -> Result<FiberId, Invariant> {
        let fiber = self.fibers.create_portal(portal, self.mode(), self.expiration_time)?;
        Ok(self.adopt(fiber))
    }

    fn create_child(&mut self, node: &Node) -> Result<Option<FiberId>, Invariant> {
        Ok(match node {
            Node::Empty => None,
            Node::Text(t) => Some(self.create_text(t.clone())),
            Node::Element(el) => Some(self.create_element(el)),
            Node::List(_) => Some(self.create_fragment(node.clone(), None)),
            Node::Portal(p) => Some(self.create_portal(p)?),
        })
    }

    fn is_same_element(&self, fiber: FiberId, el: &Element) -> bool {
        let f = &self.fibers[fiber];
        match el.ty {
            ElementType::Fragment => matches!(f.kind, FiberKind::Fragment),
            _ => f.element_type.as_ref().is_some_and(|t| t.same_type(&el.ty)),
        }
    }

    fn is_same_portal(&self, fiber: FiberId, portal: &Portal) -> bool {
        match &self.fibers[fiber].state_node {
            StateNode::Portal(state) => portal
                .container
                .downcast_ref::<H::Container>()
                .is_some_and(|c| *c == state.container),
            _ => false,
        }
    }

    fn reuse_element(&mut self, current: FiberId, el: &Element) -> FiberId {
        let fiber = self.use_fiber(current, Self::element_props(el));
        self.fibers[fiber].ref_ = el.ref_.clone();
        fiber
    }

    // -- single children --

    fn reconcile_single_element(&mut self, current_first: Option<FiberId>, el: &Element) -> FiberId {
        let mut child = current_first;
        while let Some(c) = child {
            if self.fibers[c].key == el.key {
                if self.is_same_element(c, el) {
                    self.delete_remaining(self.fibers[c].sibling);
                    return self.reuse_element(c, el);
                }
                self.delete_remaining(Some(c));
                break;
            }
            self.delete_child(c);
            child = self.fibers[c].sibling;
        }
        self.create_element(el)
    }

    fn reconcile_single_text(&mut self, current_first: Option<FiberId>, text: Rc<str>) -> FiberId {
        if let Some(c) = current_first
            && matches!(self.fibers[c].kind, FiberKind::HostText)
        {
            self.delete_remaining(self.fibers[c].sibling);
            return self.use_fiber(c, FiberProps::Text(text));
        }
        self.delete_remaining(current_first);
        self.create_text(text)
    }

    fn reconcile_single_portal(
        &mut self,
        current_first: Option<FiberId>,
        portal: &Portal,
    ) -> Result<FiberId, Invariant> {
        let mut child = current_first;
        while let Some(c) = child {
            if self.fibers[c].key == portal.key {
                if self.is_same_portal(c, portal) {
                    self.delete_remaining(self.fibers[c].sibling);
                    return Ok(self.use_fiber(c, FiberProps::Children((*portal.children).clone())));
                }
                self.delete_remaining(Some(c));
                break;
            }
            self.delete_child(c);
            child = self.fibers[c].sibling;
        }
        self.create_portal(portal)
    }

    // -- lists --

    fn update_text_node(&mut self, current: Option<FiberId>, text: Rc<str>) -> FiberId {
        match current {
            Some(c) if matches!(self.fibers[c].kind, FiberKind::HostText) => {
                self.use_fiber(c, FiberProps::Text(text))
            }
            _ => self.create_text(text),
        }
    }

    fn update_element(&mut self, current: Option<FiberId>, el: &Element) -> FiberId {
        match current {
            Some(c) if self.is_same_element(c, el) => self.reuse_element(c, el),
            _ => self.create_element(el),
        }
    }

    fn update_fragment(&mut self, current: Option<FiberId>, children: Node, key: Option<Key>) -> FiberId {
        match current {
            Some(c) if matches!(self.fibers[c].kind, FiberKind::Fragment) => {
                self.use_fiber(c, FiberProps::Children(children))
            }
            _ => self.create_fragment(children, key),
        }
    }

    fn update_portal(&mut self, current: Option<FiberId>, portal: &Portal) -> Result<FiberId, Invariant> {
        match current {
            Some(c) if self.is_same_portal(c, portal) => {
                Ok(self.use_fiber(c, FiberProps::Children((*portal.children).clone())))
            }
            _ => self.create_portal(portal),
        }
    }

    /// Reuses `old` for `node` when their keys agree. `None` means the slot
    /// does not match.
    fn update_slot(&mut self, old: Option<FiberId>, node: &Node) -> Result<Option<FiberId>, Invariant> {
        let key = old.and_then(|o| self.fibers[o].key.clone());
        Ok(match node {
            Node::Empty => None,
            Node::Text(t) if key.is_none() => Some(self.update_text_node(old, t.clone())),
            Node::Text(_) => None,
            Node::Element(el) if el.key == key => Some(match el.ty {
                ElementType::Fragment => {
                    self.update_fragment(old, el.props.children().clone(), el.key.clone())
                }
                _ => self.update_element(old, el),
            }),
            Node::Element(_) => None,
            Node::Portal(p) if p.key == key => Some(self.update_portal(old, p)?),
            Node::Portal(_) => None,
            Node::List(_) if key.is_none() => Some(self.update_fragment(old, node.clone(), None)),
            Node::List(_) => None,
        })
    }

    fn node_map_key(node: &Node, index: usize) -> MapKey {
        let key = match node {
            Node::Element(el) => el.key.clone(),
            Node::Portal(p) => p.key.clone(),
            _ => None,
        };
        key.map_or(MapKey::Index(index), MapKey::Key)
    }

    fn fiber_map_key(&self, fiber: FiberId) -> MapKey {
        let f = &self.fibers[fiber];
        f.key.clone().map_or(MapKey::Index(f.index), MapKey::Key)
    }

    fn update_from_map(
        &mut self,
        existing: &HashMap<MapKey, FiberId>,
        index: usize,
        node: &Node,
    ) -> Result<Option<FiberId>, Invariant> {
        let matched = existing.get(&Self::node_map_key(node, index)).copied();
        Ok(match node {
            Node::Empty => None,
            Node::Text(t) => Some(self.update_text_node(matched, t.clone())),
            Node::Element(el) => Some(match el.ty {
                ElementType::Fragment => {
                    self.update_fragment(matched, el.props.children().clone(), el.key.clone())
                }
                _ => self.update_element(matched, el),
            }),
            Node::Portal(p) => Some(self.update_portal(matched, p)?),
            Node::List(_) => Some(self.update_fragment(matched, node.clone(), None)),
        })
    }

    fn warn_on_duplicate_keys(items: &[Node]) {
        let mut seen = HashSet::new();
        for item in items {
            if let Node::Element(Element { key: Some(key), .. }) = item
                && !seen.insert(key)
            {
                log::warn!(
                    "encountered two children with the same key {key:?}; \
                     only the first is kept and the rest may be duplicated or omitted"
                );
            }
        }
    }

    fn reconcile_children_array(
        &mut self,
        current_first: Option<FiberId>,
        items: &[Node],
    ) -> Result<Option<FiberId>, Invariant> {
        Self::warn_on_duplicate_keys(items);

        let mut first: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut link = |fibers: &mut FiberArena<H>, fiber: FiberId| {
            match previous {
                Some(p) => fibers[p].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            previous = Some(fiber);
        };

        let mut old = current_first;
        let mut last_placed = 0;
        let mut index = 0;

        while let Some(o) = old {
            if index >= items.len() {
                break;
            }
            let (slot, next_old) = if self.fibers[o].index > index {
                (None, Some(o))
            } else {
                (Some(o), self.fibers[o].sibling)
            };
            let Some(fiber) = self.update_slot(slot, &items[index])? else {
                break;
            };
            if let Some(s) = slot
                && self.fibers[fiber].alternate.is_none()
            {
                self.delete_child(s);
            }
            last_placed = self.place_child(fiber, last_placed, index);
            link(&mut *self.fibers, fiber);
            old = next_old;
            index += 1;
        }

        if index == items.len() {
            self.delete_remaining(old);
            return Ok(first);
        }

        if old.is_none() {
            for (i, node) in items.iter().enumerate().skip(index) {
                if let Some(fiber) = self.create_child(node)? {
                    last_placed = self.place_child(fiber, last_placed, i);
                    link(&mut *self.fibers, fiber);
                }
            }
            return Ok(first);
        }

        let mut remaining = Vec::new();
        let mut existing = HashMap::new();
        let mut child = old;
        while let Some(c) = child {
            let key = self.fiber_map_key(c);
            existing.insert(key.clone(), c);
            remaining.push((key, c));
            child = self.fibers[c].sibling;
        }

        for (i, node) in items.iter().enumerate().skip(index) {
            let Some(fiber) = self.update_from_map(&existing, i, node)? else {
                continue;
            };
            if self.track && self.fibers[fiber].alternate.is_some() {
                existing.remove(&Self::node_map_key(node, i));
            }
            last_placed = self.place_child(fiber, last_placed, i);
            link(&mut *self.fibers, fiber);
        }

        for (key, fiber) in remaining {
            if existing.get(&key) == Some(&fiber) {
                self.delete_child(fiber);
            }
        }
        Ok(first)
    }
}

/// Starts a work-in-progress child list from the current one, for a parent
/// that bailed out but has pending work below.
pub(crate) fn clone_child_fibers<H: HostConfig>(
    fibers: &mut FiberArena<H>,
    current: Option<FiberId>,
    wip: FiberId,
) -> Result<(), Invariant> {
    if current.is_some_and(|c| fibers[c].child != fibers[wip].child) {
        return Err(Invariant::Other("resuming work is not supported"));
    }
    let Some(first) = fibers[wip].child else {
        return Ok(());
    };
    let props = fibers[first].pending_props.clone();
    let mut new_child = fibers.create_work_in_progress(first, props);
    fibers[wip].child = Some(new_child);
    fibers[new_child].parent = Some(wip);
    let mut current_child = first;
    while let Some(next) = fibers[current_child].sibling {
        current_child = next;
        let props = fibers[next].pending_props.clone();
        let cloned = fibers.create_work_in_progress(next, props);
        fibers[new_child].sibling = Some(cloned);
        fibers[cloned].parent = Some(wip);
        new_child = cloned;
    }
    fibers[new_child].sibling = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;
    use crate::expiration::SYNC;
    use crate::fiber::{Fiber, Mode};
    use crate::testing::MemoryHost;

    fn parent(arena: &mut FiberArena<MemoryHost>) -> FiberId {
        arena.insert(Fiber::new(FiberKind::HostRoot, FiberProps::None, None, Mode::empty()))
    }

    fn keyed(keys: &[&str]) -> Node {
        Node::list(keys.iter().map(|k| host("li").key(*k).child(*k).into()))
    }

    fn children(arena: &FiberArena<MemoryHost>, first: Option<FiberId>) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = first;
        while let Some(f) = next {
            out.push(f);
            next = arena[f].sibling;
        }
        out
    }

    /// Mounts `old`, pretends it committed, and reconciles `new` against it.
    fn diff(old: Node, new: Node) -> (FiberArena<MemoryHost>, FiberId, Vec<FiberId>, Vec<FiberId>) {
        let mut arena = FiberArena::default();
        let current = parent(&mut arena);
        let first = ChildReconciler::new(&mut arena, current, SYNC, false)
            .reconcile(None, &old)
            .unwrap();
        arena[current].child = first;
        let old_children = children(&arena, first);

        let wip = arena.create_work_in_progress(current, FiberProps::None);
        let current_first = arena[current].child;
        let first = ChildReconciler::new(&mut arena, wip, SYNC, true)
            .reconcile(current_first, &new)
            .unwrap();
        let new_children = children(&arena, first);
        (arena, wip, old_children, new_children)
    }

    fn deletions(arena: &FiberArena<MemoryHost>, parent: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = arena[parent].first_effect;
        while let Some(f) = next {
            out.push(f);
            next = arena[f].next_effect;
        }
        out
    }

    #[test]
    fn test_mount_does_not_track_placements() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let p = parent(&mut arena);
        let first = ChildReconciler::new(&mut arena, p, SYNC, false)
            .reconcile(None, &keyed(&["a", "b"]))
            .unwrap();
        let kids = children(&arena, first);
        assert_eq!(kids.len(), 2);
        assert!(kids.iter().all(|k| arena[*k].effect_tag.is_empty()));
        assert!(kids.iter().all(|k| arena[*k].parent == Some(p)));
    }

    #[test]
    fn test_moved_key_is_the_only_placement() {
        let (arena, _, old, new) = diff(keyed(&["a", "b", "c"]), keyed(&["b", "c", "a"]));
        assert_eq!(arena[new[0]].alternate, Some(old[1]));
        assert_eq!(arena[new[1]].alternate, Some(old[2]));
        assert_eq!(arena[new[2]].alternate, Some(old[0]));
        assert!(!arena[new[0]].effect_tag.contains(EffectTag::PLACEMENT));
        assert!(!arena[new[1]].effect_tag.contains(EffectTag::PLACEMENT));
        assert!(arena[new[2]].effect_tag.contains(EffectTag::PLACEMENT));
    }

    #[test]
    fn test_removed_keys_become_deletions() {
        let (arena, wip, old, new) = diff(keyed(&["a", "b", "c"]), keyed(&["c"]));
        assert_eq!(new.len(), 1);
        assert_eq!(deletions(&arena, wip), vec![old[0], old[1]]);
        assert!(arena[old[0]].effect_tag.contains(EffectTag::DELETION));
    }

    #[test]
    fn test_type_change_replaces_fiber() {
        let (arena, wip, old, new) = diff(host("p").into(), host("div").into());
        assert_eq!(new.len(), 1);
        assert!(arena[new[0]].alternate.is_none());
        assert!(arena[new[0]].effect_tag.contains(EffectTag::PLACEMENT));
        assert_eq!(deletions(&arena, wip), old);
    }

    #[test]
    fn test_unkeyed_fragment_is_transparent() {
        let (_, _, old, new) = diff(
            Node::from(crate::element::fragment(vec![Node::from("x"), Node::from("y")])),
            Node::list([Node::from("x"), Node::from("z")]),
        );
        assert_eq!(old.len(), 2);
        assert_eq!(new.len(), 2);
    }

    #[test]
    fn test_appended_items_are_placed() {
        let (arena, wip, _, new) = diff(keyed(&["a"]), keyed(&["a", "b"]));
        assert!(!arena[new[0]].effect_tag.contains(EffectTag::PLACEMENT));
        assert!(arena[new[1]].effect_tag.contains(EffectTag::PLACEMENT));
        assert!(deletions(&arena, wip).is_empty());
    }
}
