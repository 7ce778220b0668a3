//! # Fibers, Priorities, and the Commit
//!
//! Arbor keeps a host tree (anything a [`HostConfig`] can mutate) in step with
//! a declarative description of it. Application code describes the tree as
//! [`Node`]s built from host elements, function components with hooks, class
//! components, context providers, suspense boundaries and portals. The
//! reconciler diffs each new description against the committed one and
//! applies the smallest set of host mutations.
//!
//! ```rust
//! use arbor_core::testing::MemoryHost;
//! use arbor_core::{Reconciler, RootOptions, host};
//!
//! let mut r = Reconciler::new(MemoryHost::new());
//! let container = r.host_mut().create_root();
//! let root = r.create_container(container, RootOptions::default());
//! r.render(root, host("p").child("hello")).unwrap();
//! assert_eq!(r.host().render(container), "<p>hello</p>");
//! ```
//!
//! ## Two trees
//!
//! Every position in the component tree is a fiber living in a generational
//! arena. A committed fiber pairs with a work-in-progress alternate; a render
//! fills in the alternates and a commit swaps the root's pointer so they
//! become current. Fibers no longer reachable from any root are swept.
//!
//! ## Priorities
//!
//! Work is labelled with an [`ExpirationTime`]: bigger is more urgent,
//! [`SYNC`] beats everything and [`NO_WORK`] means idle. Legacy roots render
//! synchronously. Concurrent roots render in slices between host callbacks
//! and yield when [`HostConfig::should_yield`] says so; a more urgent update
//! throws away the partial tree and starts over.
//!
//! ## Render and commit
//!
//! The render phase walks the tree with begin-work and complete-work, and
//! every fiber with side effects ends up on the root's effect list, children
//! before parents. It may be interrupted and restarted. The commit walks the
//! effect list three times:
//!
//! - before mutation: class snapshots;
//! - mutation: placements, updates, deletions, hiding timed-out content;
//! - layout: mount and update lifecycles, layout effects, refs, callbacks.
//!
//! Passive effects (`use_effect`) run after the commit from a separate host
//! callback, or before the next render, whichever comes first.
//!
//! ## Errors and suspension
//!
//! A render step returns [`RenderSignal`] instead of unwinding:
//! `Suspended` shows the nearest suspense fallback until the wait handle
//! settles, `Failed` goes to the nearest error boundary, `Fatal` aborts the
//! render. Errors nothing catches unmount the root and come back from the
//! entry point as [`ReconcilerError::Uncaught`].

pub mod begin_work;
pub mod child_fiber;
pub mod class;
pub mod commit_work;
pub mod complete_work;
pub mod context;
pub mod current_fiber;
pub mod element;
pub mod error;
pub mod expiration;
pub mod fiber;
pub mod hooks;
pub mod host_config;
pub mod host_context;
pub mod hydration;
pub mod profiler;
pub mod reconciler;
pub mod scheduler;
pub mod stack;
pub mod suspense;
pub mod testing;
pub mod unwind;
pub mod update_queue;
pub mod work_loop;

#[cfg(test)]
mod tests;

pub use class::{ClassCx, ClassType, Component, InstanceHandle, StateRef, Updater, class_component};
pub use context::LegacyContext;
pub use element::{
    Context, Element, ElementBuilder, ElementType, FunctionComponent, Key, Node, Portal, PropValue, Props, Ref,
    RefObject, RefTarget, component, concurrent_mode, fragment, host, memo, profiler, strict_mode, suspense,
};
pub use error::{Invariant, ReconcilerError, RenderResult, RenderSignal, UserError};
pub use expiration::{ExpirationTime, NEVER, NO_WORK, SYNC};
pub use fiber::{EffectTag, Fiber, FiberArena, FiberId, FiberKind, Mode, RootId};
pub use hooks::{Dispatch, Dispose, EffectResult, HookCx, SetState, StateAction, on_unmount};
pub use host_config::{CallbackHandle, CallbackKind, HostConfig, HostNode, Hydratable};
pub use profiler::{ProfilerPhase, ProfilerReport};
pub use reconciler::{CommitInfo, FiberRoot, Reconciler, ReconcilerConfig, RootOptions};
pub use scheduler::Runtime;
pub use suspense::{LazyComponent, WaitHandle, WaitId, WaitState};
pub use update_queue::RootState;
