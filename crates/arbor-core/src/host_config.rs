//! The contract between the reconciler and a platform adapter.
//!
//! The core never touches a platform directly. It creates, diffs, inserts and
//! removes host nodes exclusively through this trait. A host picks one of two
//! strategies with the associated consts:
//!
//! - **mutation** (`SUPPORTS_MUTATION`): nodes are edited in place during the
//!   commit's mutation pass (`append_child`, `insert_before`, `commit_update`).
//! - **persistence** (`SUPPORTS_PERSISTENCE`): nodes are immutable; changed
//!   nodes are cloned during complete-work and whole child sets are swapped
//!   into containers at commit.
//!
//! Hydration hooks default to "nothing to hydrate". Persistence hooks default to
//! no-ops and must be overridden by hosts that set `SUPPORTS_PERSISTENCE`.

use std::any::Any;
use std::fmt::Debug;

use crate::element::Props;

/// A node that can sit in a host parent's child list.
pub enum HostNode<H: HostConfig + ?Sized> {
    Instance(H::Instance),
    Text(H::TextInstance),
}

impl<H: HostConfig + ?Sized> Clone for HostNode<H> {
    fn clone(&self) -> Self {
        match self {
            HostNode::Instance(i) => HostNode::Instance(i.clone()),
            HostNode::Text(t) => HostNode::Text(t.clone()),
        }
    }
}

impl<H: HostConfig + ?Sized> Debug for HostNode<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostNode::Instance(i) => write!(f, "Instance({i:?})"),
            HostNode::Text(t) => write!(f, "Text({t:?})"),
        }
    }
}

/// A pre-existing host node offered to the hydration matcher.
pub enum Hydratable<H: HostConfig + ?Sized> {
    Instance(H::Instance),
    Text(H::TextInstance),
    Suspense(H::SuspenseInstance),
}

impl<H: HostConfig + ?Sized> Clone for Hydratable<H> {
    fn clone(&self) -> Self {
        match self {
            Hydratable::Instance(i) => Hydratable::Instance(i.clone()),
            Hydratable::Text(t) => Hydratable::Text(t.clone()),
            Hydratable::Suspense(s) => Hydratable::Suspense(s.clone()),
        }
    }
}

impl<H: HostConfig + ?Sized> Debug for Hydratable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hydratable::Instance(i) => write!(f, "Instance({i:?})"),
            Hydratable::Text(t) => write!(f, "Text({t:?})"),
            Hydratable::Suspense(s) => write!(f, "Suspense({s:?})"),
        }
    }
}

/// What a host callback scheduled through [`HostConfig::schedule_callback`]
/// should do when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Call `Reconciler::perform_scheduled_work`.
    Work,
    /// Call `Reconciler::flush_passive_effects`.
    PassiveEffects,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

pub trait HostConfig: 'static {
    type Container: Clone + Debug + PartialEq + 'static;
    type Instance: Clone + Debug + PartialEq + 'static;
    type TextInstance: Clone + Debug + PartialEq + 'static;
    type SuspenseInstance: Clone + Debug + PartialEq + 'static;
    type HostContext: Clone + Debug + PartialEq + 'static;
    type UpdatePayload: Clone + Debug + 'static;
    type ChildSet: Default + 'static;

    const SUPPORTS_MUTATION: bool;
    const SUPPORTS_PERSISTENCE: bool = false;
    const SUPPORTS_HYDRATION: bool = false;

    // -- clock and scheduler --

    /// Monotonic milliseconds.
    fn now(&self) -> f64;
    /// Asks the embedder to call back into the reconciler, within
    /// `timeout_ms` if given.
    fn schedule_callback(&mut self, kind: CallbackKind, timeout_ms: Option<f64>) -> CallbackHandle;
    fn cancel_callback(&mut self, handle: CallbackHandle);
    /// Polled between units of work during yieldy renders.
    fn should_yield(&self) -> bool;

    // -- contexts --

    fn root_host_context(&self, root: &Self::Container) -> Self::HostContext;
    fn child_host_context(
        &self,
        parent: &Self::HostContext,
        ty: &str,
        root: &Self::Container,
    ) -> Self::HostContext;
    /// The value refs receive for a host instance.
    fn public_instance(&self, instance: &Self::Instance) -> Box<dyn Any> {
        Box::new(instance.clone())
    }
    fn prepare_for_commit(&mut self, _container: &Self::Container) {}
    fn reset_after_commit(&mut self, _container: &Self::Container) {}

    // -- instance creation and diffing --

    fn create_instance(
        &mut self,
        ty: &str,
        props: &Props,
        root: &Self::Container,
        host_context: &Self::HostContext,
    ) -> Self::Instance;
    fn create_text_instance(
        &mut self,
        text: &str,
        root: &Self::Container,
        host_context: &Self::HostContext,
    ) -> Self::TextInstance;
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>);
    /// Returns true when `commit_mount` should run for this instance.
    fn finalize_initial_children(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        props: &Props,
        root: &Self::Container,
        host_context: &Self::HostContext,
    ) -> bool;
    /// A sparse diff of `old_props` against `new_props`, or `None` when
    /// nothing host-visible changed.
    fn prepare_update(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
        root: &Self::Container,
        host_context: &Self::HostContext,
    ) -> Option<Self::UpdatePayload>;
    /// Whether `props` render their text directly instead of through text
    /// children.
    fn should_set_text_content(&self, ty: &str, props: &Props) -> bool;
    /// Offscreen subtrees are rendered at `NEVER` priority.
    fn should_deprioritize_subtree(&self, _ty: &str, _props: &Props) -> bool {
        false
    }

    // -- mutation --

    fn commit_mount(&mut self, _instance: &Self::Instance, _ty: &str, _props: &Props) {}
    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        payload: &Self::UpdatePayload,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    );
    fn commit_text_update(&mut self, text: &Self::TextInstance, old_text: &str, new_text: &str);
    fn reset_text_content(&mut self, instance: &Self::Instance);
    fn append_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>);
    fn append_child_to_container(&mut self, container: &Self::Container, child: &HostNode<Self>);
    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    );
    fn insert_in_container_before(
        &mut self,
        container: &Self::Container,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    );
    fn remove_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>);
    fn remove_child_from_container(&mut self, container: &Self::Container, child: &HostNode<Self>);
    fn hide_instance(&mut self, instance: &Self::Instance);
    fn unhide_instance(&mut self, instance: &Self::Instance, props: &Props);
    fn hide_text_instance(&mut self, text: &Self::TextInstance);
    fn unhide_text_instance(&mut self, text: &Self::TextInstance, content: &str);

    // -- persistence --

    #[allow(clippy::too_many_arguments)]
    fn clone_instance(
        &mut self,
        instance: &Self::Instance,
        _payload: Option<&Self::UpdatePayload>,
        _ty: &str,
        _old_props: &Props,
        _new_props: &Props,
        _keep_children: bool,
    ) -> Self::Instance {
        instance.clone()
    }
    fn clone_hidden_instance(&mut self, instance: &Self::Instance, _ty: &str, _props: &Props) -> Self::Instance {
        instance.clone()
    }
    fn clone_unhidden_instance(&mut self, instance: &Self::Instance, _ty: &str, _props: &Props) -> Self::Instance {
        instance.clone()
    }
    fn clone_hidden_text_instance(&mut self, text: &Self::TextInstance, _content: &str) -> Self::TextInstance {
        text.clone()
    }
    fn clone_unhidden_text_instance(&mut self, text: &Self::TextInstance, _content: &str) -> Self::TextInstance {
        text.clone()
    }
    fn create_container_child_set(&mut self, _container: &Self::Container) -> Self::ChildSet {
        Self::ChildSet::default()
    }
    fn append_child_to_container_child_set(&mut self, _set: &mut Self::ChildSet, _child: &HostNode<Self>) {}
    fn finalize_container_children(&mut self, _container: &Self::Container, _set: &Self::ChildSet) {}
    fn replace_container_children(&mut self, _container: &Self::Container, _set: Self::ChildSet) {}

    // -- hydration --

    fn first_hydratable_child_of_container(&self, _container: &Self::Container) -> Option<Hydratable<Self>> {
        None
    }
    fn first_hydratable_child(&self, _parent: &Hydratable<Self>) -> Option<Hydratable<Self>> {
        None
    }
    fn next_hydratable_sibling(&self, _node: &Hydratable<Self>) -> Option<Hydratable<Self>> {
        None
    }
    fn next_hydratable_after_suspense(&self, _marker: &Self::SuspenseInstance) -> Option<Hydratable<Self>> {
        None
    }
    fn can_hydrate_instance(&self, _node: &Hydratable<Self>, _ty: &str, _props: &Props) -> Option<Self::Instance> {
        None
    }
    fn can_hydrate_text_instance(&self, _node: &Hydratable<Self>, _text: &str) -> Option<Self::TextInstance> {
        None
    }
    fn can_hydrate_suspense_instance(&self, _node: &Hydratable<Self>) -> Option<Self::SuspenseInstance> {
        None
    }
    /// Attaches props to an existing instance and returns the diff still to
    /// be committed.
    fn hydrate_instance(
        &mut self,
        _instance: &Self::Instance,
        _ty: &str,
        _props: &Props,
        _root: &Self::Container,
        _host_context: &Self::HostContext,
    ) -> Option<Self::UpdatePayload> {
        None
    }
    /// Returns true when the existing text differs and must be updated.
    fn hydrate_text_instance(&mut self, _text: &Self::TextInstance, _content: &str) -> bool {
        false
    }
    /// A dehydrated suspense marker whose server content is still streaming.
    fn is_suspense_instance_pending(&self, _marker: &Self::SuspenseInstance) -> bool {
        false
    }
    fn clear_suspense_boundary(&mut self, _parent: &Self::Instance, _marker: &Self::SuspenseInstance) {}
    fn clear_suspense_boundary_from_container(
        &mut self,
        _container: &Self::Container,
        _marker: &Self::SuspenseInstance,
    ) {
    }
}
