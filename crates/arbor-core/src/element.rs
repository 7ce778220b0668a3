//! Element descriptions: what application code hands to the reconciler.
//!
//! A [`Node`] is an immutable description of desired UI. It is cheap to clone:
//! props live behind an `Rc`, so cloning an element keeps its identity, and
//! identity is what the reconciler uses to skip unchanged subtrees.
//!
//! ```rust
//! use arbor_core::element::{host, Node};
//!
//! let tree: Node = host("div")
//!     .key("root")
//!     .attr("id", "main")
//!     .child("hello")
//!     .into();
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::class::ClassType;
use crate::error::{RenderResult, UserError};
use crate::fiber::Mode;
use crate::hooks::HookCx;
use crate::profiler::ProfilerReport;
use crate::suspense::LazyComponent;

pub(crate) const VALUE_PROP: &str = "value";
pub(crate) const RENDER_PROP: &str = "render";
pub(crate) const FALLBACK_PROP: &str = "fallback";
pub(crate) const ID_PROP: &str = "id";
pub(crate) const ON_RENDER_PROP: &str = "on_render";

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.into())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into())
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key(v.to_string().into())
    }
}

#[derive(Clone)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Callback(Rc<dyn Fn()>),
    Node(Node),
    Any(Rc<dyn Any>),
}

impl PropValue {
    /// `Object.is`-style equality with +0 == -0, used for dependency arrays.
    pub fn same_value_zero(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Float(a), PropValue::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a == b,
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Callback(a), PropValue::Callback(b)) => Rc::ptr_eq(a, b),
            (PropValue::Node(a), PropValue::Node(b)) => a.same(b),
            (PropValue::Any(a), PropValue::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v:?}"),
            PropValue::Callback(_) => f.write_str("<callback>"),
            PropValue::Node(n) => write!(f, "{n:?}"),
            PropValue::Any(_) => f.write_str("<any>"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(v.into())
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.into())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v.into())
    }
}

impl From<Node> for PropValue {
    fn from(v: Node) -> Self {
        PropValue::Node(v)
    }
}

#[derive(Default)]
struct PropsData {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Node,
}

/// Immutable props bag. Identity (`ptr_eq`) is the fast "nothing changed"
/// signal, `shallow_eq` the one used by memo components.
#[derive(Clone, Default)]
pub struct Props(Rc<PropsData>);

impl Props {
    pub fn new(attrs: BTreeMap<Rc<str>, PropValue>, children: Node) -> Self {
        Props(Rc::new(PropsData { attrs, children }))
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.attrs.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(PropValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(PropValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn any<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        match self.get(name) {
            Some(PropValue::Any(v)) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.attrs.iter().map(|(k, v)| (&**k, v))
    }

    pub fn children(&self) -> &Node {
        &self.0.children
    }

    pub fn ptr_eq(&self, other: &Props) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn shallow_eq(&self, other: &Props) -> bool {
        self.ptr_eq(other)
            || (self.0.attrs == other.0.attrs && self.0.children.same(&other.0.children))
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.attrs.iter()).finish()
    }
}

/// What a ref receives on attach.
#[derive(Clone)]
pub enum RefTarget {
    /// A host instance as returned by `HostConfig::public_instance`.
    Host(Rc<dyn Any>),
    Instance(crate::class::InstanceHandle),
    /// A value exposed with `use_imperative_handle`.
    Handle(Rc<dyn Any>),
}

impl RefTarget {
    pub fn host<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            RefTarget::Host(v) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn instance(&self) -> Option<&crate::class::InstanceHandle> {
        match self {
            RefTarget::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn handle<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            RefTarget::Handle(v) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefTarget::Host(_) => f.write_str("RefTarget::Host"),
            RefTarget::Instance(_) => f.write_str("RefTarget::Instance"),
            RefTarget::Handle(_) => f.write_str("RefTarget::Handle"),
        }
    }
}

pub type RefCallback = dyn Fn(Option<RefTarget>) -> Result<(), UserError>;

#[derive(Clone, Default)]
pub struct RefObject(Rc<RefCell<Option<RefTarget>>>);

impl RefObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<RefTarget> {
        self.0.borrow().clone()
    }

    pub(crate) fn set(&self, target: Option<RefTarget>) {
        *self.0.borrow_mut() = target;
    }
}

#[derive(Clone)]
pub enum Ref {
    Callback(Rc<RefCallback>),
    Object(RefObject),
}

impl Ref {
    pub fn callback(f: impl Fn(Option<RefTarget>) -> Result<(), UserError> + 'static) -> Self {
        Ref::Callback(Rc::new(f))
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        match (self, other) {
            (Ref::Callback(a), Ref::Callback(b)) => Rc::ptr_eq(a, b),
            (Ref::Object(a), Ref::Object(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }

    pub(crate) fn same(a: Option<&Ref>, b: Option<&Ref>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn set(&self, target: Option<RefTarget>) -> Result<(), UserError> {
        match self {
            Ref::Callback(f) => f(target),
            Ref::Object(o) => {
                o.set(target);
                Ok(())
            }
        }
    }
}

impl From<RefObject> for Ref {
    fn from(o: RefObject) -> Self {
        Ref::Object(o)
    }
}

type RenderFn = dyn Fn(&mut HookCx<'_>, &Props) -> RenderResult;

#[derive(Clone)]
pub struct FunctionComponent {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl FunctionComponent {
    pub fn new(
        name: &str,
        render: impl Fn(&mut HookCx<'_>, &Props) -> RenderResult + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ptr_eq(&self, other: &FunctionComponent) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }

    pub(crate) fn call(&self, cx: &mut HookCx<'_>, props: &Props) -> RenderResult {
        (self.render)(cx, props)
    }
}

pub type CompareFn = dyn Fn(&Props, &Props) -> bool;

pub struct MemoDef {
    pub(crate) inner: ElementType,
    pub(crate) compare: Option<Rc<CompareFn>>,
}

/// Wraps a component so it re-renders only when its props change according to
/// `compare` (shallow equality by default).
pub fn memo(inner: ElementType, compare: Option<Rc<CompareFn>>) -> ElementType {
    ElementType::Memo(Rc::new(MemoDef { inner, compare }))
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

type ValueEq = fn(&dyn Any, &dyn Any) -> bool;

/// Untyped identity of a [`Context`], carried by provider and consumer
/// elements.
#[derive(Clone)]
pub struct ContextKey {
    pub(crate) id: ContextId,
    pub(crate) default: Rc<dyn Any>,
    pub(crate) eq: ValueEq,
}

impl ContextKey {
    pub fn id(&self) -> ContextId {
        self.id
    }
}

pub(crate) struct ConsumerRender(pub(crate) Rc<dyn Fn(&dyn Any) -> Node>);

fn typed_eq<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A value propagated to every descendant that reads it, without threading it
/// through props.
pub struct Context<T> {
    key: ContextKey,
    default: Rc<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T: PartialEq + 'static> Context<T> {
    pub fn new(default: T) -> Self {
        let default = Rc::new(default);
        Self {
            key: ContextKey {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                default: default.clone(),
                eq: typed_eq::<T>,
            },
            default,
        }
    }

    pub fn default_value(&self) -> Rc<T> {
        self.default.clone()
    }

    pub fn key(&self) -> &ContextKey {
        &self.key
    }

    pub fn provider(&self, value: T, children: impl Into<Node>) -> ElementBuilder {
        ElementBuilder::new(ElementType::Provider(self.key.clone()))
            .attr(VALUE_PROP, PropValue::Any(Rc::new(value)))
            .child(children)
    }

    pub fn consumer(&self, render: impl Fn(&T) -> Node + 'static) -> ElementBuilder {
        let render = ConsumerRender(Rc::new(move |v: &dyn Any| {
            v.downcast_ref::<T>().map(&render).unwrap_or_default()
        }));
        ElementBuilder::new(ElementType::Consumer(self.key.clone()))
            .attr(RENDER_PROP, PropValue::Any(Rc::new(render)))
    }
}

#[derive(Clone)]
pub enum ElementType {
    Host(Rc<str>),
    Function(FunctionComponent),
    Class(ClassType),
    Fragment,
    Mode(Mode),
    Profiler,
    Provider(ContextKey),
    Consumer(ContextKey),
    Suspense,
    Memo(Rc<MemoDef>),
    Lazy(LazyComponent),
}

impl ElementType {
    /// Whether an existing fiber of type `self` can be reused for `other`.
    pub fn same_type(&self, other: &ElementType) -> bool {
        match (self, other) {
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Function(a), ElementType::Function(b)) => a.ptr_eq(b),
            (ElementType::Class(a), ElementType::Class(b)) => a.same(b),
            (ElementType::Fragment, ElementType::Fragment) => true,
            (ElementType::Mode(a), ElementType::Mode(b)) => a == b,
            (ElementType::Profiler, ElementType::Profiler) => true,
            (ElementType::Provider(a), ElementType::Provider(b)) => a.id == b.id,
            (ElementType::Consumer(a), ElementType::Consumer(b)) => a.id == b.id,
            (ElementType::Suspense, ElementType::Suspense) => true,
            (ElementType::Memo(a), ElementType::Memo(b)) => Rc::ptr_eq(a, b),
            (ElementType::Lazy(a), ElementType::Lazy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Display name for component stacks and logs.
    pub fn name(&self) -> String {
        match self {
            ElementType::Host(t) => t.to_string(),
            ElementType::Function(f) => f.name().to_string(),
            ElementType::Class(c) => c.name().to_string(),
            ElementType::Fragment => "Fragment".into(),
            ElementType::Mode(m) if m.contains(Mode::CONCURRENT) => "ConcurrentMode".into(),
            ElementType::Mode(_) => "StrictMode".into(),
            ElementType::Profiler => "Profiler".into(),
            ElementType::Provider(_) => "Context.Provider".into(),
            ElementType::Consumer(_) => "Context.Consumer".into(),
            ElementType::Suspense => "Suspense".into(),
            ElementType::Memo(m) => format!("Memo({})", m.inner.name()),
            ElementType::Lazy(_) => "Lazy".into(),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Clone)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Key>,
    pub ref_: Option<Ref>,
    pub props: Props,
}

/// Renders `children` into a different host container.
#[derive(Clone)]
pub struct Portal {
    pub key: Option<Key>,
    pub(crate) container: Rc<dyn Any>,
    pub children: Rc<Node>,
}

impl Portal {
    pub fn new<C: 'static>(container: C, children: impl Into<Node>, key: Option<Key>) -> Self {
        Self {
            key,
            container: Rc::new(container),
            children: Rc::new(children.into()),
        }
    }
}

#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Element),
    List(Rc<[Node]>),
    Portal(Portal),
}

impl Node {
    /// Identity comparison: text by value, everything else by allocation.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Text(a), Node::Text(b)) => a == b,
            (Node::Element(a), Node::Element(b)) => {
                a.props.ptr_eq(&b.props)
                    && a.key == b.key
                    && a.ty.same_type(&b.ty)
                    && Ref::same(a.ref_.as_ref(), b.ref_.as_ref())
            }
            (Node::List(a), Node::List(b)) => Rc::ptr_eq(a, b),
            (Node::Portal(a), Node::Portal(b)) => Rc::ptr_eq(&a.children, &b.children),
            _ => false,
        }
    }

    pub fn list(items: impl IntoIterator<Item = Node>) -> Node {
        Node::List(items.into_iter().collect())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => f.write_str("Empty"),
            Node::Text(t) => write!(f, "{t:?}"),
            Node::Element(e) => write!(f, "<{:?}>", e.ty),
            Node::List(items) => f.debug_list().entries(items.iter()).finish(),
            Node::Portal(_) => f.write_str("Portal"),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Text(s.into())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Text(s.into())
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Node::Element(e)
    }
}

impl From<Vec<Node>> for Node {
    fn from(v: Vec<Node>) -> Self {
        Node::List(v.into())
    }
}

impl From<Portal> for Node {
    fn from(p: Portal) -> Self {
        Node::Portal(p)
    }
}

impl From<ElementBuilder> for Node {
    fn from(b: ElementBuilder) -> Self {
        Node::Element(b.build())
    }
}

pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    ref_: Option<Ref>,
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Vec<Node>,
}

impl ElementBuilder {
    pub fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            ref_: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn ref_(mut self, r: impl Into<Ref>) -> Self {
        self.ref_ = Some(r.into());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        match child.into() {
            Node::Empty => {}
            node => self.children.push(node),
        }
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> Element {
        let mut children = self.children;
        let children = match children.len() {
            0 => Node::Empty,
            1 => children.pop().unwrap_or_default(),
            _ => Node::List(children.into()),
        };
        Element {
            ty: self.ty,
            key: self.key,
            ref_: self.ref_,
            props: Props::new(self.attrs, children),
        }
    }
}

pub fn host(ty: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(ty.into()))
}

pub fn component(f: &FunctionComponent) -> ElementBuilder {
    ElementBuilder::new(ElementType::Function(f.clone()))
}

pub fn fragment(children: impl IntoIterator<Item = Node>) -> ElementBuilder {
    ElementBuilder::new(ElementType::Fragment).children(children)
}

pub fn suspense(fallback: impl Into<Node>, children: impl Into<Node>) -> ElementBuilder {
    ElementBuilder::new(ElementType::Suspense)
        .attr(FALLBACK_PROP, PropValue::Node(fallback.into()))
        .child(children)
}

pub fn strict_mode(children: impl Into<Node>) -> ElementBuilder {
    ElementBuilder::new(ElementType::Mode(Mode::STRICT)).child(children)
}

pub fn concurrent_mode(children: impl Into<Node>) -> ElementBuilder {
    ElementBuilder::new(ElementType::Mode(Mode::CONCURRENT)).child(children)
}

pub fn profiler(
    id: &str,
    on_render: impl Fn(&ProfilerReport) + 'static,
    children: impl Into<Node>,
) -> ElementBuilder {
    let cb: Rc<dyn Fn(&ProfilerReport)> = Rc::new(on_render);
    ElementBuilder::new(ElementType::Profiler)
        .attr(ID_PROP, id)
        .attr(ON_RENDER_PROP, PropValue::Any(Rc::new(cb)))
        .child(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloned_element_keeps_identity() {
        let node: Node = host("div").attr("id", "a").child("x").into();
        let again = node.clone();
        assert!(node.same(&again));
        let rebuilt: Node = host("div").attr("id", "a").child("x").into();
        assert!(!node.same(&rebuilt));
    }

    #[test]
    fn test_shallow_eq_compares_attrs() {
        let a = host("div").attr("n", 1).build().props;
        let b = host("div").attr("n", 1).build().props;
        let c = host("div").attr("n", 2).build().props;
        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&c));
    }

    #[test]
    fn test_same_value_zero() {
        assert!(PropValue::Float(f64::NAN).same_value_zero(&PropValue::Float(f64::NAN)));
        assert!(PropValue::Float(0.0).same_value_zero(&PropValue::Float(-0.0)));
        assert!(!PropValue::Int(1).same_value_zero(&PropValue::Float(1.0)));
    }

    #[test]
    fn test_builder_flattens_single_child() {
        let e = host("p").child("only").build();
        assert!(matches!(e.props.children(), Node::Text(t) if &**t == "only"));
        let e = host("p").child("a").child("b").build();
        assert!(matches!(e.props.children(), Node::List(items) if items.len() == 2));
    }
}
