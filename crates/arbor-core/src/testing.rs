//! An in-memory mutation host for tests and demos.
//!
//! [`MemoryHost`] keeps a flat node table, logs every host operation it is
//! asked to perform, and drives time and scheduling by hand: the clock only
//! moves with [`MemoryHost::advance_time`], scheduled callbacks queue up until
//! [`Reconciler::run_scheduled_tasks`] runs them, and `should_yield` can be
//! told to give up after a fixed number of polls.
//!
//! It also supports hydration. Build a "server rendered" tree with
//! [`MemoryHost::server_element`] / [`MemoryHost::server_text`] and mount with
//! `RootOptions { hydrate: true, .. }`.
//!
//! [`PersistentHost`] is the same node table driven the persistent way: nodes
//! are never edited once built, updates clone them, and containers swap in a
//! whole new child list at commit.

use std::any::Any;
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write};

use crate::element::{Node, PropValue, Props};
use crate::error::ReconcilerError;
use crate::host_config::{CallbackHandle, CallbackKind, HostConfig, HostNode, Hydratable};
use crate::reconciler::Reconciler;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
}

#[derive(Clone, Debug, PartialEq)]
enum NodeKind {
    Root,
    Element(String),
    Text(String),
    /// Start of a server-rendered suspense boundary. `pending` content is
    /// still streaming in.
    SuspenseStart { pending: bool },
    SuspenseEnd,
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    hidden: bool,
}

/// One changed attribute: `None` removes it.
pub type AttrChange = (String, Option<String>);

pub struct MemoryHost {
    nodes: Vec<NodeData>,
    ops: Vec<String>,
    clock: f64,
    tasks: Vec<(CallbackHandle, CallbackKind)>,
    next_handle: u64,
    yield_after: Cell<Option<usize>>,
    text_content_types: HashSet<String>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

fn attr_string(value: &PropValue) -> Option<String> {
    match value {
        PropValue::Bool(b) => Some(b.to_string()),
        PropValue::Int(i) => Some(i.to_string()),
        PropValue::Float(f) => Some(f.to_string()),
        PropValue::Str(s) => Some(s.to_string()),
        PropValue::Callback(_) | PropValue::Node(_) | PropValue::Any(_) => None,
    }
}

fn node_id<H: HostConfig<Instance = NodeId, TextInstance = NodeId>>(node: &HostNode<H>) -> NodeId {
    match node {
        HostNode::Instance(id) | HostNode::Text(id) => *id,
    }
}

fn apply_changes(node: &mut NodeData, changes: &[AttrChange]) {
    for (k, v) in changes {
        match (k.as_str(), v) {
            ("#text", v) => node.text = v.clone().unwrap_or_default(),
            (_, Some(v)) => {
                node.attrs.insert(k.clone(), v.clone());
            }
            (_, None) => {
                node.attrs.remove(k);
            }
        }
    }
}

fn host_attrs(props: &Props) -> BTreeMap<String, String> {
    props
        .attrs()
        .filter_map(|(k, v)| attr_string(v).map(|v| (k.to_string(), v)))
        .collect()
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            ops: Vec::new(),
            clock: 0.0,
            tasks: Vec::new(),
            next_handle: 0,
            yield_after: Cell::new(None),
            text_content_types: HashSet::new(),
        }
    }

    /// Element types whose string children become the element's own text
    /// instead of a text child.
    pub fn with_text_content_types<'a>(mut self, types: impl IntoIterator<Item = &'a str>) -> Self {
        self.text_content_types = types.into_iter().map(str::to_string).collect();
        self
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            kind,
            attrs: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent: None,
            hidden: false,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_root(&mut self) -> NodeId {
        self.alloc(NodeKind::Root)
    }

    // -- pre-rendered trees for hydration --

    pub fn server_element(&mut self, parent: NodeId, ty: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.alloc(NodeKind::Element(ty.to_string()));
        self.nodes[id.0].attrs = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.attach(parent, id, None);
        id
    }

    pub fn server_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.alloc(NodeKind::Text(text.to_string()));
        self.nodes[id.0].text = text.to_string();
        self.attach(parent, id, None);
        id
    }

    /// Opens a server-rendered suspense boundary. Its content is whatever is
    /// appended to `parent` until [`MemoryHost::server_suspense_end`].
    pub fn server_suspense_start(&mut self, parent: NodeId, pending: bool) -> NodeId {
        let id = self.alloc(NodeKind::SuspenseStart { pending });
        self.attach(parent, id, None);
        id
    }

    pub fn server_suspense_end(&mut self, parent: NodeId) -> NodeId {
        let id = self.alloc(NodeKind::SuspenseEnd);
        self.attach(parent, id, None);
        id
    }

    // -- inspection --

    pub fn ops(&self) -> &[String] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ops)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.nodes[node.0].hidden
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node.0].attrs.get(name).map(String::as_str)
    }

    /// Serializes the subtree under `node` as markup. Hidden nodes are marked
    /// with a `hidden` attribute.
    pub fn render(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in &self.nodes[node.0].children {
            self.render_into(*child, &mut out);
        }
        out
    }

    fn render_into(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Root => {
                for c in &node.children {
                    self.render_into(*c, out);
                }
            }
            NodeKind::Text(_) => {
                if node.hidden {
                    out.push_str("<!--hidden-->");
                } else {
                    out.push_str(&node.text);
                }
            }
            NodeKind::SuspenseStart { pending } => out.push_str(if *pending { "<!--$?-->" } else { "<!--$-->" }),
            NodeKind::SuspenseEnd => out.push_str("<!--/$-->"),
            NodeKind::Element(ty) => {
                let _ = write!(out, "<{ty}");
                for (k, v) in &node.attrs {
                    let _ = write!(out, " {k}=\"{v}\"");
                }
                if node.hidden {
                    out.push_str(" hidden");
                }
                out.push('>');
                out.push_str(&node.text);
                for c in &node.children {
                    self.render_into(*c, out);
                }
                let _ = write!(out, "</{ty}>");
            }
        }
    }

    // -- clock and scheduling --

    pub fn advance_time(&mut self, ms: f64) {
        self.clock += ms;
    }

    /// Makes `should_yield` return true after `polls` more calls.
    pub fn set_yield_after(&mut self, polls: Option<usize>) {
        self.yield_after.set(polls);
    }

    pub fn pending_tasks(&self) -> Vec<CallbackKind> {
        self.tasks.iter().map(|(_, k)| *k).collect()
    }

    fn take_task(&mut self) -> Option<CallbackKind> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0).1)
        }
    }

    // -- tree surgery --

    fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != child);
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.detach(child);
        let siblings = &mut self.nodes[parent.0].children;
        let at = before
            .and_then(|b| siblings.iter().position(|c| *c == b))
            .unwrap_or(siblings.len());
        siblings.insert(at, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn hydratable(&self, id: NodeId) -> Hydratable<Self> {
        match self.nodes[id.0].kind {
            NodeKind::Text(_) => Hydratable::Text(id),
            NodeKind::SuspenseStart { .. } => Hydratable::Suspense(id),
            _ => Hydratable::Instance(id),
        }
    }

    fn hydratable_id(node: &Hydratable<Self>) -> NodeId {
        match node {
            Hydratable::Instance(id) | Hydratable::Text(id) | Hydratable::Suspense(id) => *id,
        }
    }

    fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id.0].parent?;
        let siblings = &self.nodes[parent.0].children;
        let at = siblings.iter().position(|c| *c == id)?;
        siblings.get(at + 1).copied()
    }

    /// Skips closing markers, which are never hydration candidates.
    fn hydratable_from(&self, mut next: Option<NodeId>) -> Option<Hydratable<Self>> {
        while let Some(id) = next {
            if self.nodes[id.0].kind != NodeKind::SuspenseEnd {
                return Some(self.hydratable(id));
            }
            next = self.next_sibling(id);
        }
        None
    }

    fn matching_end(&self, start: NodeId) -> Option<NodeId> {
        let mut depth = 0;
        let mut next = self.next_sibling(start);
        while let Some(id) = next {
            match self.nodes[id.0].kind {
                NodeKind::SuspenseStart { .. } => depth += 1,
                NodeKind::SuspenseEnd if depth == 0 => return Some(id),
                NodeKind::SuspenseEnd => depth -= 1,
                _ => {}
            }
            next = self.next_sibling(id);
        }
        None
    }

    fn clear_boundary(&mut self, marker: NodeId) {
        let end = self.matching_end(marker);
        let mut next = Some(marker);
        while let Some(id) = next {
            next = self.next_sibling(id);
            self.detach(id);
            if Some(id) == end {
                break;
            }
        }
        self.ops.push(format!("clear suspense {marker:?}"));
    }

    fn apply_text_content(&mut self, id: NodeId, ty: &str, props: &Props) {
        if self.text_content_types.contains(ty)
            && let Node::Text(t) = props.children()
        {
            self.nodes[id.0].text = t.to_string();
        }
    }

    fn diff_attrs(&self, ty: &str, old: &Props, new: &Props) -> Vec<AttrChange> {
        let before = host_attrs(old);
        let after = host_attrs(new);
        let mut changes: Vec<AttrChange> = Vec::new();
        for (k, v) in &after {
            if before.get(k) != Some(v) {
                changes.push((k.clone(), Some(v.clone())));
            }
        }
        for k in before.keys() {
            if !after.contains_key(k) {
                changes.push((k.clone(), None));
            }
        }
        if self.text_content_types.contains(ty) && !old.children().same(new.children()) {
            let text = match new.children() {
                Node::Text(t) => Some(t.to_string()),
                _ => None,
            };
            changes.push(("#text".into(), text));
        }
        changes
    }
}

impl HostConfig for MemoryHost {
    type Container = NodeId;
    type Instance = NodeId;
    type TextInstance = NodeId;
    type SuspenseInstance = NodeId;
    type HostContext = Namespace;
    type UpdatePayload = Vec<AttrChange>;
    type ChildSet = Vec<NodeId>;

    const SUPPORTS_MUTATION: bool = true;
    const SUPPORTS_HYDRATION: bool = true;

    fn now(&self) -> f64 {
        self.clock
    }

    fn schedule_callback(&mut self, kind: CallbackKind, _timeout_ms: Option<f64>) -> CallbackHandle {
        self.next_handle += 1;
        let handle = CallbackHandle(self.next_handle);
        self.tasks.push((handle, kind));
        handle
    }

    fn cancel_callback(&mut self, handle: CallbackHandle) {
        self.tasks.retain(|(h, _)| *h != handle);
    }

    fn should_yield(&self) -> bool {
        match self.yield_after.get() {
            None => false,
            Some(0) => true,
            Some(n) => {
                self.yield_after.set(Some(n - 1));
                false
            }
        }
    }

    fn root_host_context(&self, _root: &NodeId) -> Namespace {
        Namespace::Html
    }

    fn child_host_context(&self, parent: &Namespace, ty: &str, _root: &NodeId) -> Namespace {
        match (parent, ty) {
            (_, "svg") => Namespace::Svg,
            (Namespace::Svg, "foreignObject") => Namespace::Html,
            (ns, _) => *ns,
        }
    }

    fn public_instance(&self, instance: &NodeId) -> Box<dyn Any> {
        Box::new(*instance)
    }

    fn prepare_for_commit(&mut self, _container: &NodeId) {
        self.ops.push("prepare_for_commit".into());
    }

    fn reset_after_commit(&mut self, _container: &NodeId) {
        self.ops.push("reset_after_commit".into());
    }

    fn create_instance(&mut self, ty: &str, props: &Props, _root: &NodeId, ns: &Namespace) -> NodeId {
        let id = self.alloc(NodeKind::Element(ty.to_string()));
        self.nodes[id.0].attrs = host_attrs(props);
        self.apply_text_content(id, ty, props);
        let ns = if *ns == Namespace::Svg { " (svg)" } else { "" };
        self.ops.push(format!("create {ty} {id:?}{ns}"));
        id
    }

    fn create_text_instance(&mut self, text: &str, _root: &NodeId, _ns: &Namespace) -> NodeId {
        let id = self.alloc(NodeKind::Text(text.to_string()));
        self.nodes[id.0].text = text.to_string();
        self.ops.push(format!("create text {id:?} {text:?}"));
        id
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: &HostNode<Self>) {
        self.attach(*parent, node_id(child), None);
    }

    fn finalize_initial_children(&mut self, _instance: &NodeId, _ty: &str, props: &Props, _root: &NodeId, _ns: &Namespace) -> bool {
        props.bool("auto_focus").unwrap_or(false)
    }

    fn prepare_update(
        &mut self,
        _instance: &NodeId,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
        _root: &NodeId,
        _ns: &Namespace,
    ) -> Option<Vec<AttrChange>> {
        let changes = self.diff_attrs(ty, old_props, new_props);
        (!changes.is_empty()).then_some(changes)
    }

    fn should_set_text_content(&self, ty: &str, _props: &Props) -> bool {
        self.text_content_types.contains(ty)
    }

    fn should_deprioritize_subtree(&self, _ty: &str, props: &Props) -> bool {
        props.bool("hidden").unwrap_or(false)
    }

    fn commit_mount(&mut self, instance: &NodeId, ty: &str, _props: &Props) {
        self.ops.push(format!("mount {ty} {instance:?}"));
    }

    fn commit_update(&mut self, instance: &NodeId, payload: &Vec<AttrChange>, _ty: &str, _old: &Props, _new: &Props) {
        apply_changes(&mut self.nodes[instance.0], payload);
        self.ops.push(format!("update {instance:?} {payload:?}"));
    }

    fn commit_text_update(&mut self, text: &NodeId, old_text: &str, new_text: &str) {
        self.nodes[text.0].text = new_text.to_string();
        self.ops.push(format!("text {text:?} {old_text:?} -> {new_text:?}"));
    }

    fn reset_text_content(&mut self, instance: &NodeId) {
        self.nodes[instance.0].text.clear();
        self.ops.push(format!("reset text {instance:?}"));
    }

    fn append_child(&mut self, parent: &NodeId, child: &HostNode<Self>) {
        let c = node_id(child);
        self.attach(*parent, c, None);
        self.ops.push(format!("append {c:?} to {parent:?}"));
    }

    fn append_child_to_container(&mut self, container: &NodeId, child: &HostNode<Self>) {
        self.append_child(container, child);
    }

    fn insert_before(&mut self, parent: &NodeId, child: &HostNode<Self>, before: &HostNode<Self>) {
        let (c, b) = (node_id(child), node_id(before));
        self.attach(*parent, c, Some(b));
        self.ops.push(format!("insert {c:?} before {b:?} in {parent:?}"));
    }

    fn insert_in_container_before(&mut self, container: &NodeId, child: &HostNode<Self>, before: &HostNode<Self>) {
        self.insert_before(container, child, before);
    }

    fn remove_child(&mut self, parent: &NodeId, child: &HostNode<Self>) {
        let c = node_id(child);
        self.detach(c);
        self.ops.push(format!("remove {c:?} from {parent:?}"));
    }

    fn remove_child_from_container(&mut self, container: &NodeId, child: &HostNode<Self>) {
        self.remove_child(container, child);
    }

    fn hide_instance(&mut self, instance: &NodeId) {
        self.nodes[instance.0].hidden = true;
        self.ops.push(format!("hide {instance:?}"));
    }

    fn unhide_instance(&mut self, instance: &NodeId, _props: &Props) {
        self.nodes[instance.0].hidden = false;
        self.ops.push(format!("unhide {instance:?}"));
    }

    fn hide_text_instance(&mut self, text: &NodeId) {
        self.nodes[text.0].hidden = true;
        self.ops.push(format!("hide text {text:?}"));
    }

    fn unhide_text_instance(&mut self, text: &NodeId, content: &str) {
        let node = &mut self.nodes[text.0];
        node.hidden = false;
        node.text = content.to_string();
        self.ops.push(format!("unhide text {text:?}"));
    }

    fn first_hydratable_child_of_container(&self, container: &NodeId) -> Option<Hydratable<Self>> {
        self.hydratable_from(self.nodes[container.0].children.first().copied())
    }

    fn first_hydratable_child(&self, parent: &Hydratable<Self>) -> Option<Hydratable<Self>> {
        match parent {
            // a boundary's content is the run of siblings after its marker
            Hydratable::Suspense(marker) => self.hydratable_from(self.next_sibling(*marker)),
            other => self.hydratable_from(self.nodes[Self::hydratable_id(other).0].children.first().copied()),
        }
    }

    fn next_hydratable_sibling(&self, node: &Hydratable<Self>) -> Option<Hydratable<Self>> {
        self.hydratable_from(self.next_sibling(Self::hydratable_id(node)))
    }

    fn next_hydratable_after_suspense(&self, marker: &NodeId) -> Option<Hydratable<Self>> {
        let end = self.matching_end(*marker)?;
        self.hydratable_from(self.next_sibling(end))
    }

    fn can_hydrate_instance(&self, node: &Hydratable<Self>, ty: &str, _props: &Props) -> Option<NodeId> {
        match node {
            Hydratable::Instance(id) => match &self.nodes[id.0].kind {
                NodeKind::Element(t) if t.eq_ignore_ascii_case(ty) => Some(*id),
                _ => None,
            },
            _ => None,
        }
    }

    fn can_hydrate_text_instance(&self, node: &Hydratable<Self>, text: &str) -> Option<NodeId> {
        match node {
            Hydratable::Text(id) if !text.is_empty() => Some(*id),
            _ => None,
        }
    }

    fn can_hydrate_suspense_instance(&self, node: &Hydratable<Self>) -> Option<NodeId> {
        match node {
            Hydratable::Suspense(id) => Some(*id),
            _ => None,
        }
    }

    fn hydrate_instance(&mut self, instance: &NodeId, ty: &str, props: &Props, _root: &NodeId, _ns: &Namespace) -> Option<Vec<AttrChange>> {
        self.ops.push(format!("hydrate {ty} {instance:?}"));
        let existing = &self.nodes[instance.0].attrs;
        let wanted = host_attrs(props);
        let mut changes: Vec<AttrChange> = wanted
            .iter()
            .filter(|(k, v)| existing.get(*k) != Some(v))
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        changes.extend(
            existing
                .keys()
                .filter(|k| !wanted.contains_key(*k))
                .map(|k| (k.clone(), None)),
        );
        (!changes.is_empty()).then_some(changes)
    }

    fn hydrate_text_instance(&mut self, text: &NodeId, content: &str) -> bool {
        self.ops.push(format!("hydrate text {text:?}"));
        self.nodes[text.0].text != content
    }

    fn is_suspense_instance_pending(&self, marker: &NodeId) -> bool {
        matches!(self.nodes[marker.0].kind, NodeKind::SuspenseStart { pending: true })
    }

    fn clear_suspense_boundary(&mut self, _parent: &NodeId, marker: &NodeId) {
        self.clear_boundary(*marker);
    }

    fn clear_suspense_boundary_from_container(&mut self, _container: &NodeId, marker: &NodeId) {
        self.clear_boundary(*marker);
    }
}

impl Reconciler<MemoryHost> {
    /// Runs queued host callbacks until none are left. Returns how many ran.
    pub fn run_scheduled_tasks(&mut self) -> Result<usize, ReconcilerError> {
        let mut ran = 0;
        while let Some(kind) = self.host_mut().take_task() {
            ran += 1;
            match kind {
                CallbackKind::Work => self.perform_scheduled_work()?,
                CallbackKind::PassiveEffects => self.flush_passive_effects()?,
            }
        }
        Ok(ran)
    }
}

/// An in-memory host in persistent mode, sharing [`MemoryHost`]'s node table
/// and op log. Mutation calls are logged as `unsupported` and do nothing.
pub struct PersistentHost {
    inner: MemoryHost,
}

impl Default for PersistentHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentHost {
    pub fn new() -> Self {
        Self { inner: MemoryHost::new() }
    }

    pub fn create_root(&mut self) -> NodeId {
        self.inner.create_root()
    }

    pub fn ops(&self) -> &[String] {
        self.inner.ops()
    }

    pub fn take_ops(&mut self) -> Vec<String> {
        self.inner.take_ops()
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.inner.children(node)
    }

    pub fn render(&self, node: NodeId) -> String {
        self.inner.render(node)
    }

    fn unsupported(&mut self, call: &str) {
        self.inner.ops.push(format!("unsupported {call}"));
    }

    /// A copy of `source` under a new id. Children are shared, not copied.
    fn copy_node(&mut self, source: NodeId, keep_children: bool) -> NodeId {
        let mut data = self.inner.nodes[source.0].clone();
        if !keep_children {
            data.children.clear();
        }
        data.parent = None;
        self.inner.nodes.push(data);
        NodeId(self.inner.nodes.len() - 1)
    }

    fn copy_with_visibility(&mut self, source: NodeId, hidden: bool) -> NodeId {
        let id = self.copy_node(source, true);
        self.inner.nodes[id.0].hidden = hidden;
        let verb = if hidden { "hide" } else { "unhide" };
        self.inner.ops.push(format!("clone {source:?} -> {id:?} ({verb})"));
        id
    }
}

impl HostConfig for PersistentHost {
    type Container = NodeId;
    type Instance = NodeId;
    type TextInstance = NodeId;
    type SuspenseInstance = NodeId;
    type HostContext = Namespace;
    type UpdatePayload = Vec<AttrChange>;
    type ChildSet = Vec<NodeId>;

    const SUPPORTS_MUTATION: bool = false;
    const SUPPORTS_PERSISTENCE: bool = true;

    fn now(&self) -> f64 {
        self.inner.now()
    }

    fn schedule_callback(&mut self, kind: CallbackKind, timeout_ms: Option<f64>) -> CallbackHandle {
        self.inner.schedule_callback(kind, timeout_ms)
    }

    fn cancel_callback(&mut self, handle: CallbackHandle) {
        self.inner.cancel_callback(handle);
    }

    fn should_yield(&self) -> bool {
        self.inner.should_yield()
    }

    fn root_host_context(&self, root: &NodeId) -> Namespace {
        self.inner.root_host_context(root)
    }

    fn child_host_context(&self, parent: &Namespace, ty: &str, root: &NodeId) -> Namespace {
        self.inner.child_host_context(parent, ty, root)
    }

    fn public_instance(&self, instance: &NodeId) -> Box<dyn Any> {
        Box::new(*instance)
    }

    fn prepare_for_commit(&mut self, container: &NodeId) {
        self.inner.prepare_for_commit(container);
    }

    fn reset_after_commit(&mut self, container: &NodeId) {
        self.inner.reset_after_commit(container);
    }

    fn create_instance(&mut self, ty: &str, props: &Props, root: &NodeId, ns: &Namespace) -> NodeId {
        self.inner.create_instance(ty, props, root, ns)
    }

    fn create_text_instance(&mut self, text: &str, root: &NodeId, ns: &Namespace) -> NodeId {
        self.inner.create_text_instance(text, root, ns)
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: &HostNode<Self>) {
        // a child may already belong to an older version of the parent
        self.inner.nodes[parent.0].children.push(node_id(child));
    }

    fn finalize_initial_children(&mut self, instance: &NodeId, ty: &str, props: &Props, root: &NodeId, ns: &Namespace) -> bool {
        self.inner.finalize_initial_children(instance, ty, props, root, ns)
    }

    fn prepare_update(
        &mut self,
        instance: &NodeId,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
        root: &NodeId,
        ns: &Namespace,
    ) -> Option<Vec<AttrChange>> {
        self.inner.prepare_update(instance, ty, old_props, new_props, root, ns)
    }

    fn should_set_text_content(&self, ty: &str, props: &Props) -> bool {
        self.inner.should_set_text_content(ty, props)
    }

    fn commit_mount(&mut self, instance: &NodeId, ty: &str, props: &Props) {
        self.inner.commit_mount(instance, ty, props);
    }

    fn commit_update(&mut self, _instance: &NodeId, _payload: &Vec<AttrChange>, _ty: &str, _old: &Props, _new: &Props) {
        self.unsupported("commit_update");
    }

    fn commit_text_update(&mut self, _text: &NodeId, _old_text: &str, _new_text: &str) {
        self.unsupported("commit_text_update");
    }

    fn reset_text_content(&mut self, _instance: &NodeId) {
        self.unsupported("reset_text_content");
    }

    fn append_child(&mut self, _parent: &NodeId, _child: &HostNode<Self>) {
        self.unsupported("append_child");
    }

    fn append_child_to_container(&mut self, _container: &NodeId, _child: &HostNode<Self>) {
        self.unsupported("append_child_to_container");
    }

    fn insert_before(&mut self, _parent: &NodeId, _child: &HostNode<Self>, _before: &HostNode<Self>) {
        self.unsupported("insert_before");
    }

    fn insert_in_container_before(&mut self, _container: &NodeId, _child: &HostNode<Self>, _before: &HostNode<Self>) {
        self.unsupported("insert_in_container_before");
    }

    fn remove_child(&mut self, _parent: &NodeId, _child: &HostNode<Self>) {
        self.unsupported("remove_child");
    }

    fn remove_child_from_container(&mut self, _container: &NodeId, _child: &HostNode<Self>) {
        self.unsupported("remove_child_from_container");
    }

    fn hide_instance(&mut self, _instance: &NodeId) {
        self.unsupported("hide_instance");
    }

    fn unhide_instance(&mut self, _instance: &NodeId, _props: &Props) {
        self.unsupported("unhide_instance");
    }

    fn hide_text_instance(&mut self, _text: &NodeId) {
        self.unsupported("hide_text_instance");
    }

    fn unhide_text_instance(&mut self, _text: &NodeId, _content: &str) {
        self.unsupported("unhide_text_instance");
    }

    fn clone_instance(
        &mut self,
        instance: &NodeId,
        payload: Option<&Vec<AttrChange>>,
        _ty: &str,
        _old_props: &Props,
        _new_props: &Props,
        keep_children: bool,
    ) -> NodeId {
        let id = self.copy_node(*instance, keep_children);
        if let Some(changes) = payload {
            apply_changes(&mut self.inner.nodes[id.0], changes);
        }
        self.inner.ops.push(format!("clone {instance:?} -> {id:?}"));
        id
    }

    fn clone_hidden_instance(&mut self, instance: &NodeId, _ty: &str, _props: &Props) -> NodeId {
        self.copy_with_visibility(*instance, true)
    }

    fn clone_unhidden_instance(&mut self, instance: &NodeId, _ty: &str, _props: &Props) -> NodeId {
        self.copy_with_visibility(*instance, false)
    }

    fn clone_hidden_text_instance(&mut self, text: &NodeId, _content: &str) -> NodeId {
        self.copy_with_visibility(*text, true)
    }

    fn clone_unhidden_text_instance(&mut self, text: &NodeId, content: &str) -> NodeId {
        let id = self.copy_with_visibility(*text, false);
        self.inner.nodes[id.0].text = content.to_string();
        id
    }

    fn create_container_child_set(&mut self, _container: &NodeId) -> Vec<NodeId> {
        Vec::new()
    }

    fn append_child_to_container_child_set(&mut self, set: &mut Vec<NodeId>, child: &HostNode<Self>) {
        set.push(node_id(child));
    }

    fn replace_container_children(&mut self, container: &NodeId, set: Vec<NodeId>) {
        self.inner.ops.push(format!("replace children of {container:?} with {set:?}"));
        self.inner.nodes[container.0].children = set;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;

    #[test]
    fn test_insert_before_and_render() {
        let mut h = MemoryHost::new();
        let root = h.create_root();
        let p = h.create_instance("p", &host("p").attr("id", "x").build().props, &root, &Namespace::Html);
        let a = h.create_text_instance("a", &root, &Namespace::Html);
        let b = h.create_text_instance("b", &root, &Namespace::Html);
        h.append_initial_child(&p, &HostNode::Text(b));
        h.insert_before(&p, &HostNode::Text(a), &HostNode::Text(b));
        h.append_child_to_container(&root, &HostNode::Instance(p));
        assert_eq!(h.render(root), "<p id=\"x\">ab</p>");
    }

    #[test]
    fn test_yield_budget_counts_down() {
        let mut h = MemoryHost::new();
        h.set_yield_after(Some(1));
        assert!(!h.should_yield());
        assert!(h.should_yield());
        assert!(h.should_yield());
    }

    #[test]
    fn test_hydratables_skip_end_markers() {
        let mut h = MemoryHost::new();
        let root = h.create_root();
        let start = h.server_suspense_start(root, false);
        let inner = h.server_text(root, "x");
        let end = h.server_suspense_end(root);
        let after = h.server_element(root, "div", &[]);
        let _ = (inner, end);
        assert!(matches!(h.first_hydratable_child_of_container(&root), Some(Hydratable::Suspense(id)) if id == start));
        assert!(matches!(h.next_hydratable_after_suspense(&start), Some(Hydratable::Instance(id)) if id == after));
    }
}
