//! Fibers: units of work that double as the persistent tree.
//!
//! Fibers live in a generational [`SlotMap`]. Every logical position has up to
//! two fibers, `current` (on screen) and its `alternate` (work in progress),
//! and the two swap roles at commit. Structural links (`parent`, `child`,
//! `sibling`) are ids into the same arena and only ever point within one of
//! the two trees.
//!
//! Orphans are returned to the arena explicitly: deleted subtrees are released
//! right after their commit, anything else that drops out of both trees (an
//! abandoned render, a suspense fragment that was swapped out) is reclaimed by
//! [`FiberArena::sweep`].

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::class::{ClassInstance, ClassType, StateRef};
use crate::element::{
    ContextId, ContextKey, Element, ElementType, FunctionComponent, Key, MemoDef, Node, Portal,
    Props, Ref,
};
use crate::error::Invariant;
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::hooks::{Effect, Hook};
use crate::host_config::HostConfig;
use crate::suspense::{LazyComponent, SuspenseState, WaitHandle, WaitId};
use crate::update_queue::UpdateQueue;

new_key_type! {
    pub struct FiberId;
    pub struct RootId;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EffectTag: u32 {
        const PERFORMED_WORK = 1 << 0;
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const PLACEMENT_AND_UPDATE = Self::PLACEMENT.bits() | Self::UPDATE.bits();
        const DELETION = 1 << 3;
        const CONTENT_RESET = 1 << 4;
        const CALLBACK = 1 << 5;
        const DID_CAPTURE = 1 << 6;
        const REF = 1 << 7;
        const SNAPSHOT = 1 << 8;
        const PASSIVE = 1 << 9;
        const INCOMPLETE = 1 << 10;
        const SHOULD_CAPTURE = 1 << 11;

        const LIFECYCLE_EFFECT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::SNAPSHOT.bits();
        const HOST_EFFECT_MASK = (1 << 10) - 1;
    }
}

impl EffectTag {
    /// True when the fiber needs commit-phase work beyond "was rendered".
    pub fn has_side_effects(self) -> bool {
        !self.difference(EffectTag::PERFORMED_WORK).is_empty()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Mode: u8 {
        const CONCURRENT = 1 << 0;
        const STRICT = 1 << 1;
        const PROFILE = 1 << 2;
    }
}

/// The kind of a fiber together with the data its kind needs.
#[derive(Clone)]
pub enum FiberKind {
    FunctionComponent(FunctionComponent),
    ClassComponent(ClassType),
    /// A class that threw during its first mount and must be mounted again
    /// from scratch.
    IncompleteClassComponent(ClassType),
    HostRoot,
    HostPortal,
    HostComponent(Rc<str>),
    HostText,
    Fragment,
    Mode,
    ContextProvider(ContextKey),
    ContextConsumer(ContextKey),
    Profiler,
    SuspenseComponent,
    MemoComponent(Rc<MemoDef>),
    SimpleMemoComponent(FunctionComponent),
    LazyComponent(LazyComponent),
    /// Server-rendered suspense content that has not been hydrated yet.
    DehydratedSuspenseComponent,
}

impl FiberKind {
    pub fn tag_name(&self) -> &'static str {
        match self {
            FiberKind::FunctionComponent(_) => "FunctionComponent",
            FiberKind::ClassComponent(_) => "ClassComponent",
            FiberKind::IncompleteClassComponent(_) => "IncompleteClassComponent",
            FiberKind::HostRoot => "HostRoot",
            FiberKind::HostPortal => "HostPortal",
            FiberKind::HostComponent(_) => "HostComponent",
            FiberKind::HostText => "HostText",
            FiberKind::Fragment => "Fragment",
            FiberKind::Mode => "Mode",
            FiberKind::ContextProvider(_) => "ContextProvider",
            FiberKind::ContextConsumer(_) => "ContextConsumer",
            FiberKind::Profiler => "Profiler",
            FiberKind::SuspenseComponent => "SuspenseComponent",
            FiberKind::MemoComponent(_) => "MemoComponent",
            FiberKind::SimpleMemoComponent(_) => "SimpleMemoComponent",
            FiberKind::LazyComponent(_) => "LazyComponent",
            FiberKind::DehydratedSuspenseComponent => "DehydratedSuspenseComponent",
        }
    }

    pub fn is_host_parent(&self) -> bool {
        matches!(
            self,
            FiberKind::HostComponent(_) | FiberKind::HostRoot | FiberKind::HostPortal
        )
    }
}

impl fmt::Debug for FiberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberKind::HostComponent(ty) => write!(f, "HostComponent({ty})"),
            FiberKind::FunctionComponent(c) | FiberKind::SimpleMemoComponent(c) => {
                write!(f, "{}({})", self.tag_name(), c.name())
            }
            FiberKind::ClassComponent(c) | FiberKind::IncompleteClassComponent(c) => {
                write!(f, "{}({})", self.tag_name(), c.name())
            }
            _ => f.write_str(self.tag_name()),
        }
    }
}

pub struct PortalState<H: HostConfig> {
    pub(crate) container: H::Container,
    pub(crate) pending_children: RefCell<Option<H::ChildSet>>,
}

/// The object a fiber stands for: a host node, a class instance, a root.
pub enum StateNode<H: HostConfig> {
    None,
    Root(RootId),
    Instance(H::Instance),
    Text(H::TextInstance),
    Portal(Rc<PortalState<H>>),
    Class(ClassInstance),
    RetryCache(Rc<RefCell<HashSet<WaitId>>>),
    Dehydrated(H::SuspenseInstance),
}

impl<H: HostConfig> Clone for StateNode<H> {
    fn clone(&self) -> Self {
        match self {
            StateNode::None => StateNode::None,
            StateNode::Root(r) => StateNode::Root(*r),
            StateNode::Instance(i) => StateNode::Instance(i.clone()),
            StateNode::Text(t) => StateNode::Text(t.clone()),
            StateNode::Portal(p) => StateNode::Portal(p.clone()),
            StateNode::Class(c) => StateNode::Class(c.clone()),
            StateNode::RetryCache(c) => StateNode::RetryCache(c.clone()),
            StateNode::Dehydrated(s) => StateNode::Dehydrated(s.clone()),
        }
    }
}

impl<H: HostConfig> StateNode<H> {
    pub fn is_none(&self) -> bool {
        matches!(self, StateNode::None)
    }
}

/// Props as a fiber sees them. Text fibers carry their string, fragments and
/// portals carry their children directly.
#[derive(Clone, Default)]
pub enum FiberProps {
    #[default]
    None,
    Props(Props),
    Text(Rc<str>),
    Children(Node),
}

impl FiberProps {
    /// The "did props change" test of begin-work: identity, except text which
    /// compares by value.
    pub fn same(&self, other: &FiberProps) -> bool {
        match (self, other) {
            (FiberProps::None, FiberProps::None) => true,
            (FiberProps::Props(a), FiberProps::Props(b)) => a.ptr_eq(b),
            (FiberProps::Text(a), FiberProps::Text(b)) => a == b,
            (FiberProps::Children(a), FiberProps::Children(b)) => a.same(b),
            _ => false,
        }
    }

    pub fn props(&self) -> Option<&Props> {
        match self {
            FiberProps::Props(p) => Some(p),
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            FiberProps::Text(t) => t,
            _ => "",
        }
    }

    pub fn children(&self) -> Node {
        match self {
            FiberProps::Props(p) => p.children().clone(),
            FiberProps::Children(n) => n.clone(),
            FiberProps::Text(_) | FiberProps::None => Node::Empty,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FiberProps::None)
    }
}

#[derive(Clone, Default)]
pub enum MemoizedState {
    #[default]
    None,
    Hooks(Rc<[Hook]>),
    /// Class state, or the root's [`crate::update_queue::RootState`].
    State(StateRef),
    Suspense(SuspenseState),
    /// Wait handles a dehydrated boundary already listens to.
    RetryCache(Rc<RefCell<HashSet<WaitId>>>),
}

impl MemoizedState {
    pub fn hooks(&self) -> Option<&Rc<[Hook]>> {
        match self {
            MemoizedState::Hooks(h) => Some(h),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<&StateRef> {
        match self {
            MemoizedState::State(s) => Some(s),
            _ => None,
        }
    }
}

pub(crate) enum FiberQueue<H: HostConfig> {
    None,
    /// Class and root state updates.
    State(UpdateQueue),
    /// Host component diff computed during complete-work.
    Host(H::UpdatePayload),
    /// Function component effects from the last render, in hook order.
    Effects(Rc<[Rc<Effect>]>),
    /// Wait handles a suspense boundary must register retries for.
    Wait(Vec<WaitHandle>),
}

impl<H: HostConfig> Clone for FiberQueue<H> {
    fn clone(&self) -> Self {
        match self {
            FiberQueue::None => FiberQueue::None,
            FiberQueue::State(q) => FiberQueue::State(q.clone()),
            FiberQueue::Host(p) => FiberQueue::Host(p.clone()),
            FiberQueue::Effects(e) => FiberQueue::Effects(e.clone()),
            FiberQueue::Wait(w) => FiberQueue::Wait(w.clone()),
        }
    }
}

impl<H: HostConfig> FiberQueue<H> {
    pub fn is_none(&self) -> bool {
        matches!(self, FiberQueue::None)
    }
}

/// Contexts a fiber read during its last render.
#[derive(Clone, Debug, Default)]
pub struct ContextDependencies {
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) contexts: SmallVec<[ContextId; 4]>,
}

pub struct Fiber<H: HostConfig> {
    pub(crate) kind: FiberKind,
    pub(crate) element_type: Option<ElementType>,
    pub(crate) key: Option<Key>,
    pub(crate) state_node: StateNode<H>,

    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) ref_: Option<Ref>,

    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: FiberProps,
    pub(crate) update_queue: FiberQueue<H>,
    pub(crate) memoized_state: MemoizedState,
    pub(crate) dependencies: Option<ContextDependencies>,

    pub(crate) mode: Mode,

    pub(crate) effect_tag: EffectTag,
    pub(crate) next_effect: Option<FiberId>,
    pub(crate) first_effect: Option<FiberId>,
    pub(crate) last_effect: Option<FiberId>,

    pub(crate) expiration_time: ExpirationTime,
    pub(crate) child_expiration_time: ExpirationTime,

    pub(crate) alternate: Option<FiberId>,

    pub(crate) actual_duration: f64,
    pub(crate) actual_start_time: f64,
    pub(crate) self_base_duration: f64,
    pub(crate) tree_base_duration: f64,
}

impl<H: HostConfig> Fiber<H> {
    pub fn new(kind: FiberKind, pending_props: FiberProps, key: Option<Key>, mode: Mode) -> Self {
        Self {
            kind,
            element_type: None,
            key,
            state_node: StateNode::None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            ref_: None,
            pending_props,
            memoized_props: FiberProps::None,
            update_queue: FiberQueue::None,
            memoized_state: MemoizedState::None,
            dependencies: None,
            mode,
            effect_tag: EffectTag::empty(),
            next_effect: None,
            first_effect: None,
            last_effect: None,
            expiration_time: NO_WORK,
            child_expiration_time: NO_WORK,
            alternate: None,
            actual_duration: 0.0,
            actual_start_time: -1.0,
            self_base_duration: 0.0,
            tree_base_duration: 0.0,
        }
    }

    pub fn kind(&self) -> &FiberKind {
        &self.kind
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn effect_tag(&self) -> EffectTag {
        self.effect_tag
    }

    pub fn expiration_time(&self) -> ExpirationTime {
        self.expiration_time
    }

    pub fn child_expiration_time(&self) -> ExpirationTime {
        self.child_expiration_time
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The committed text of a text fiber.
    pub fn text(&self) -> Option<&str> {
        match (&self.kind, &self.memoized_props) {
            (FiberKind::HostText, FiberProps::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn actual_duration(&self) -> f64 {
        self.actual_duration
    }

    /// Name used in component stacks.
    pub fn display_name(&self) -> String {
        match &self.kind {
            FiberKind::HostComponent(ty) => ty.to_string(),
            FiberKind::HostText => "#text".into(),
            FiberKind::HostRoot => "#root".into(),
            _ => self
                .element_type
                .as_ref()
                .map(|t| t.name())
                .unwrap_or_else(|| self.kind.tag_name().to_string()),
        }
    }

    pub(crate) fn host_node(&self) -> Option<crate::host_config::HostNode<H>> {
        match &self.state_node {
            StateNode::Instance(i) => Some(crate::host_config::HostNode::Instance(i.clone())),
            StateNode::Text(t) => Some(crate::host_config::HostNode::Text(t.clone())),
            _ => None,
        }
    }

    pub(crate) fn class_instance(&self) -> Option<&ClassInstance> {
        match &self.state_node {
            StateNode::Class(c) => Some(c),
            _ => None,
        }
    }
}

pub struct FiberArena<H: HostConfig> {
    fibers: SlotMap<FiberId, Fiber<H>>,
}

impl<H: HostConfig> Default for FiberArena<H> {
    fn default() -> Self {
        Self {
            fibers: SlotMap::with_key(),
        }
    }
}

impl<H: HostConfig> Index<FiberId> for FiberArena<H> {
    type Output = Fiber<H>;

    fn index(&self, id: FiberId) -> &Fiber<H> {
        &self.fibers[id]
    }
}

impl<H: HostConfig> IndexMut<FiberId> for FiberArena<H> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<H> {
        &mut self.fibers[id]
    }
}

impl<H: HostConfig> FiberArena<H> {
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        self.fibers.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn insert(&mut self, fiber: Fiber<H>) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub(crate) fn create_host_root(&mut self, root: RootId, mode: Mode) -> FiberId {
        let mut fiber = Fiber::new(FiberKind::HostRoot, FiberProps::None, None, mode);
        fiber.state_node = StateNode::Root(root);
        self.insert(fiber)
    }

    /// Returns the work-in-progress twin of `current`, reusing the alternate
    /// when one exists.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let wip = match self.fibers[current].alternate {
            Some(wip) if self.fibers.contains_key(wip) => {
                let f = &mut self.fibers[wip];
                f.pending_props = pending_props;
                f.effect_tag = EffectTag::empty();
                f.next_effect = None;
                f.first_effect = None;
                f.last_effect = None;
                f.actual_duration = 0.0;
                f.actual_start_time = -1.0;
                wip
            }
            _ => {
                let c = &self.fibers[current];
                let mut f = Fiber::new(c.kind.clone(), pending_props, c.key.clone(), c.mode);
                f.element_type = c.element_type.clone();
                f.state_node = c.state_node.clone();
                f.alternate = Some(current);
                let wip = self.fibers.insert(f);
                self.fibers[current].alternate = Some(wip);
                wip
            }
        };

        let c = &self.fibers[current];
        let kind = c.kind.clone();
        let element_type = c.element_type.clone();
        let child_expiration_time = c.child_expiration_time;
        let expiration_time = c.expiration_time;
        let child = c.child;
        let memoized_props = c.memoized_props.clone();
        let memoized_state = c.memoized_state.clone();
        let update_queue = c.update_queue.clone();
        let dependencies = c.dependencies.clone();
        let sibling = c.sibling;
        let index = c.index;
        let ref_ = c.ref_.clone();
        let state_node = c.state_node.clone();
        let self_base_duration = c.self_base_duration;
        let tree_base_duration = c.tree_base_duration;

        let f = &mut self.fibers[wip];
        f.kind = kind;
        f.element_type = element_type;
        f.child_expiration_time = child_expiration_time;
        f.expiration_time = expiration_time;
        f.child = child;
        f.memoized_props = memoized_props;
        f.memoized_state = memoized_state;
        f.update_queue = update_queue;
        f.dependencies = dependencies;
        f.sibling = sibling;
        f.index = index;
        f.ref_ = ref_;
        f.state_node = state_node;
        f.self_base_duration = self_base_duration;
        f.tree_base_duration = tree_base_duration;
        wip
    }

    pub(crate) fn create_from_element(
        &mut self,
        element: &Element,
        mode: Mode,
        expiration_time: ExpirationTime,
    ) -> FiberId {
        let props = FiberProps::Props(element.props.clone());
        let mut mode = mode;
        let (kind, props) = match &element.ty {
            ElementType::Host(ty) => (FiberKind::HostComponent(ty.clone()), props),
            ElementType::Function(f) => (FiberKind::FunctionComponent(f.clone()), props),
            ElementType::Class(c) => (FiberKind::ClassComponent(c.clone()), props),
            ElementType::Fragment => (
                FiberKind::Fragment,
                FiberProps::Children(element.props.children().clone()),
            ),
            ElementType::Mode(m) => {
                mode |= *m;
                if m.contains(Mode::CONCURRENT) {
                    mode |= Mode::STRICT;
                }
                (FiberKind::Mode, props)
            }
            ElementType::Profiler => {
                mode |= Mode::PROFILE;
                (FiberKind::Profiler, props)
            }
            ElementType::Provider(k) => (FiberKind::ContextProvider(k.clone()), props),
            ElementType::Consumer(k) => (FiberKind::ContextConsumer(k.clone()), props),
            ElementType::Suspense => (FiberKind::SuspenseComponent, props),
            ElementType::Memo(m) => (FiberKind::MemoComponent(m.clone()), props),
            ElementType::Lazy(l) => (FiberKind::LazyComponent(l.clone()), props),
        };
        let mut fiber = Fiber::new(kind, props, element.key.clone(), mode);
        fiber.element_type = Some(element.ty.clone());
        fiber.expiration_time = expiration_time;
        self.insert(fiber)
    }

    pub(crate) fn create_fragment(
        &mut self,
        children: Node,
        mode: Mode,
        expiration_time: ExpirationTime,
        key: Option<Key>,
    ) -> FiberId {
        let mut fiber = Fiber::new(FiberKind::Fragment, FiberProps::Children(children), key, mode);
        fiber.element_type = Some(ElementType::Fragment);
        fiber.expiration_time = expiration_time;
        self.insert(fiber)
    }

    pub(crate) fn create_text(
        &mut self,
        text: Rc<str>,
        mode: Mode,
        expiration_time: ExpirationTime,
    ) -> FiberId {
        let mut fiber = Fiber::new(FiberKind::HostText, FiberProps::Text(text), None, mode);
        fiber.expiration_time = expiration_time;
        self.insert(fiber)
    }

    pub(crate) fn create_portal(
        &mut self,
        portal: &Portal,
        mode: Mode,
        expiration_time: ExpirationTime,
    ) -> Result<FiberId, Invariant> {
        let container = portal
            .container
            .downcast_ref::<H::Container>()
            .cloned()
            .ok_or(Invariant::Missing("a portal container of the host's container type"))?;
        let mut fiber = Fiber::new(
            FiberKind::HostPortal,
            FiberProps::Children((*portal.children).clone()),
            portal.key.clone(),
            mode,
        );
        fiber.state_node = StateNode::Portal(Rc::new(PortalState {
            container,
            pending_children: RefCell::new(None),
        }));
        fiber.expiration_time = expiration_time;
        Ok(self.insert(fiber))
    }

    /// A throwaway fiber standing for a host node that hydration decided to
    /// delete.
    pub(crate) fn create_for_deletion(&mut self, state_node: StateNode<H>, kind: FiberKind) -> FiberId {
        let mut fiber = Fiber::new(kind, FiberProps::None, None, Mode::empty());
        fiber.state_node = state_node;
        fiber.effect_tag = EffectTag::DELETION;
        self.insert(fiber)
    }

    /// Returns a deleted subtree (and every alternate hanging off it) to the
    /// arena. `fiber`'s own siblings are left alone.
    pub(crate) fn release_subtree(&mut self, fiber: FiberId) -> usize {
        let mut stack: SmallVec<[FiberId; 16]> = SmallVec::new();
        let mut released = 0;
        if let Some(f) = self.fibers.get(fiber) {
            if let Some(child) = f.child {
                stack.push(child);
            }
        } else {
            return 0;
        }
        let mut doomed = vec![fiber];
        while let Some(id) = stack.pop() {
            let Some(f) = self.fibers.get(id) else {
                continue;
            };
            doomed.push(id);
            if let Some(child) = f.child {
                stack.push(child);
            }
            if let Some(sibling) = f.sibling {
                stack.push(sibling);
            }
        }
        for id in doomed {
            if let Some(f) = self.fibers.remove(id) {
                released += 1;
                if let Some(alt) = f.alternate
                    && self.fibers.remove(alt).is_some()
                {
                    released += 1;
                }
            }
        }
        released
    }

    /// Mark-and-sweep over everything reachable from `roots` (current trees)
    /// plus their alternates. Only valid while no render is in progress.
    pub(crate) fn sweep(&mut self, roots: impl IntoIterator<Item = FiberId>) -> usize {
        let mut live: HashSet<FiberId> = HashSet::with_capacity(self.fibers.len());
        let mut stack: Vec<FiberId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(f) = self.fibers.get(id) else {
                continue;
            };
            if !live.insert(id) {
                continue;
            }
            if let Some(alt) = f.alternate {
                live.insert(alt);
            }
            if let Some(child) = f.child {
                stack.push(child);
            }
            if let Some(sibling) = f.sibling {
                stack.push(sibling);
            }
        }
        let before = self.fibers.len();
        self.fibers.retain(|id, _| live.contains(&id));
        let removed = before - self.fibers.len();
        if removed > 0 {
            log::debug!("fiber sweep reclaimed {removed} orphaned fibers");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;
    use crate::expiration::SYNC;
    use crate::testing::MemoryHost;

    #[test]
    fn test_work_in_progress_pairs_with_current() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let el = host("div").build();
        let current = arena.create_from_element(&el, Mode::empty(), SYNC);
        let wip = arena.create_work_in_progress(current, FiberProps::Props(el.props.clone()));
        assert_eq!(arena[wip].alternate, Some(current));
        assert_eq!(arena[current].alternate, Some(wip));
        let again = arena.create_work_in_progress(current, FiberProps::None);
        assert_eq!(again, wip);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_sweep_drops_unreachable_fibers() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let root = arena.insert(Fiber::new(FiberKind::HostRoot, FiberProps::None, None, Mode::empty()));
        let child = arena.create_text("a".into(), Mode::empty(), SYNC);
        arena[root].child = Some(child);
        arena[child].parent = Some(root);
        let orphan = arena.create_text("b".into(), Mode::empty(), SYNC);
        assert_eq!(arena.sweep([root]), 1);
        assert!(!arena.contains(orphan));
        assert!(arena.contains(child));
    }

    #[test]
    fn test_release_subtree_keeps_siblings() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let a = arena.create_text("a".into(), Mode::empty(), SYNC);
        let b = arena.create_text("b".into(), Mode::empty(), SYNC);
        arena[a].sibling = Some(b);
        assert_eq!(arena.release_subtree(a), 1);
        assert!(arena.contains(b));
    }

    #[test]
    fn test_side_effect_detection_ignores_performed_work() {
        assert!(!EffectTag::PERFORMED_WORK.has_side_effects());
        assert!((EffectTag::PERFORMED_WORK | EffectTag::UPDATE).has_side_effects());
    }
}
