//! What happens when a component fails or suspends.
//!
//! The signal is turned into a capture on the nearest fiber able to handle
//! it: a suspense boundary for a suspension, an error boundary or the root
//! for an error. The work loop then completes the failing fiber as
//! incomplete, unwinding contexts until it reaches the capturing fiber, which
//! renders again.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::class::StateRef;
use crate::current_fiber::CapturedValue;
use crate::element::{Node, Props};
use crate::error::{Invariant, ReconcilerError, RenderSignal, UserError};
use crate::expiration::{ExpirationTime, SYNC};
use crate::fiber::{EffectTag, FiberId, FiberKind, FiberQueue, MemoizedState, Mode};
use crate::host_config::HostConfig;
use crate::reconciler::Reconciler;
use crate::suspense::{WaitHandle, should_capture_suspense};
use crate::update_queue::{
    Payload, RootState, Update, UpdateCallback, UpdateKind, enqueue_captured_update, enqueue_update,
};

const NO_FALLBACK: &str = "a component suspended while rendering, but no fallback UI was specified; \
     add a suspense boundary higher in the tree to provide a loading indicator or placeholder";

impl<H: HostConfig> Reconciler<H> {
    /// Marks `source` incomplete and schedules the capture of `signal` on the
    /// nearest fiber that handles it.
    pub(crate) fn throw_exception(
        &mut self,
        root: crate::fiber::RootId,
        return_fiber: FiberId,
        source: FiberId,
        signal: RenderSignal,
        render_expiration_time: ExpirationTime,
    ) -> Result<(), ReconcilerError> {
        let f = &mut self.fibers[source];
        f.effect_tag |= EffectTag::INCOMPLETE;
        f.first_effect = None;
        f.last_effect = None;

        let error = match signal {
            RenderSignal::Fatal(inv) => return Err(inv.into()),
            RenderSignal::Failed(error) => error,
            RenderSignal::Suspended(wait) => {
                if self.capture_suspension(return_fiber, source, &wait, render_expiration_time) {
                    log::debug!("{root:?} suspended on {:?}", wait.id());
                    return Ok(());
                }
                UserError::new(NO_FALLBACK)
            }
        };

        self.work.next_render_did_error = true;
        let captured = CapturedValue::new(&self.fibers, error, Some(source));
        let mut node = Some(return_fiber);
        while let Some(id) = node {
            let kind = self.fibers[id].kind.clone();
            match &kind {
                FiberKind::HostRoot => {
                    let update = self.create_root_error_update(&captured, render_expiration_time);
                    self.mark_should_capture(id, render_expiration_time);
                    enqueue_captured_update(&mut self.fibers, id, update);
                    return Ok(());
                }
                FiberKind::ClassComponent(ty) => {
                    let f = &self.fibers[id];
                    let can_capture = !f.effect_tag.contains(EffectTag::DID_CAPTURE)
                        && (ty.factory().derives_state_from_error()
                            || (ty.factory().has_did_catch()
                                && f
                                    .class_instance()
                                    .is_some_and(|i| !self.failed_boundaries.contains(&i.id()))));
                    if can_capture {
                        let update = self.create_class_error_update(id, &captured, render_expiration_time);
                        self.mark_should_capture(id, render_expiration_time);
                        enqueue_captured_update(&mut self.fibers, id, update);
                        return Ok(());
                    }
                }
                _ => {}
            }
            node = self.fibers[id].parent;
        }
        Err(ReconcilerError::Uncaught(captured.error))
    }

    fn mark_should_capture(&mut self, fiber: FiberId, render_expiration_time: ExpirationTime) {
        let f = &mut self.fibers[fiber];
        f.effect_tag |= EffectTag::SHOULD_CAPTURE;
        f.expiration_time = render_expiration_time;
    }

    /// Finds the boundary for a suspension. Returns false when there is none.
    fn capture_suspension(
        &mut self,
        return_fiber: FiberId,
        source: FiberId,
        wait: &WaitHandle,
        render_expiration_time: ExpirationTime,
    ) -> bool {
        let mut node = Some(return_fiber);
        while let Some(id) = node {
            match self.fibers[id].kind {
                FiberKind::SuspenseComponent if should_capture_suspense(&self.fibers[id]) => {
                    match &mut self.fibers[id].update_queue {
                        FiberQueue::Wait(waits) => {
                            if !waits.iter().any(|w| w.id() == wait.id()) {
                                waits.push(wait.clone());
                            }
                        }
                        queue => *queue = FiberQueue::Wait(vec![wait.clone()]),
                    }

                    if !self.fibers[id].mode.contains(Mode::CONCURRENT) {
                        self.commit_inconsistent_subtree(id, source);
                        return true;
                    }
                    self.mark_should_capture(id, render_expiration_time);
                    return true;
                }
                FiberKind::DehydratedSuspenseComponent => {
                    // keep the server content and retry hydration once the data is in
                    let cache = match &self.fibers[id].memoized_state {
                        MemoizedState::RetryCache(cache) => cache.clone(),
                        _ => {
                            let cache = Rc::new(RefCell::new(HashSet::new()));
                            self.fibers[id].memoized_state = MemoizedState::RetryCache(cache.clone());
                            cache
                        }
                    };
                    self.attach_retry_listener(id, &cache, wait);
                    self.mark_should_capture(id, render_expiration_time);
                    return true;
                }
                _ => {}
            }
            node = self.fibers[id].parent;
        }
        false
    }

    /// Legacy mode commits the suspended tree as it is, hidden, instead of
    /// throwing away the siblings that already rendered.
    fn commit_inconsistent_subtree(&mut self, boundary: FiberId, source: FiberId) {
        self.fibers[boundary].effect_tag |= EffectTag::DID_CAPTURE;
        let f = &mut self.fibers[source];
        f.effect_tag.remove(EffectTag::LIFECYCLE_EFFECT_MASK | EffectTag::INCOMPLETE);
        if let FiberKind::ClassComponent(ty) = &f.kind {
            if f.alternate.is_none() {
                // never mounted; mount again from scratch next time
                f.kind = FiberKind::IncompleteClassComponent(ty.clone());
            } else {
                let update = Rc::new(Update::new(SYNC, UpdateKind::Force));
                enqueue_update(&mut self.fibers, source, update);
            }
        }
        self.fibers[source].expiration_time = SYNC;
    }

    /// An error that reached the root unmounts everything under it and is
    /// reported as uncaught once committed.
    pub(crate) fn create_root_error_update(&self, captured: &CapturedValue, expiration_time: ExpirationTime) -> Rc<Update> {
        let payload: Payload = Rc::new(|_: &dyn Any, _: &Props| {
            Some(Rc::new(RootState { element: Node::Empty }) as StateRef)
        });
        Rc::new(
            Update::new(expiration_time, UpdateKind::Capture(Some(payload)))
                .with_callback(UpdateCallback::Uncaught(captured.error.clone())),
        )
    }

    pub(crate) fn create_class_error_update(
        &self,
        fiber: FiberId,
        captured: &CapturedValue,
        expiration_time: ExpirationTime,
    ) -> Rc<Update> {
        let payload = match &self.fibers[fiber].kind {
            FiberKind::ClassComponent(ty) => ty.factory().error_payload(&captured.error),
            _ => None,
        };
        Rc::new(
            Update::new(expiration_time, UpdateKind::Capture(payload))
                .with_callback(UpdateCallback::DidCatch(captured.error.clone())),
        )
    }

    /// Pops what `wip` pushed. Returns it again when it captured, so it
    /// renders a second time.
    pub(crate) fn unwind_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, Invariant> {
        self.profiler.stop();
        let kind = self.fibers[wip].kind.clone();
        match kind {
            FiberKind::ClassComponent(ty) => {
                if ty.is_context_provider() {
                    self.legacy.pop(wip);
                }
                Ok(self.flip_capture(wip))
            }
            FiberKind::HostRoot => {
                self.host_cx.pop_container(wip);
                self.legacy.pop(wip);
                if self.fibers[wip].effect_tag.contains(EffectTag::DID_CAPTURE) {
                    return Err(Invariant::RootAlreadyCaptured);
                }
                let f = &mut self.fibers[wip];
                f.effect_tag.remove(EffectTag::SHOULD_CAPTURE);
                f.effect_tag |= EffectTag::DID_CAPTURE;
                Ok(Some(wip))
            }
            FiberKind::HostComponent(_) => {
                self.host_cx.pop_context(wip);
                Ok(None)
            }
            FiberKind::SuspenseComponent | FiberKind::DehydratedSuspenseComponent => Ok(self.flip_capture(wip)),
            FiberKind::HostPortal => {
                self.host_cx.pop_container(wip);
                Ok(None)
            }
            FiberKind::ContextProvider(_) => {
                self.providers.pop(wip);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn flip_capture(&mut self, wip: FiberId) -> Option<FiberId> {
        let f = &mut self.fibers[wip];
        if !f.effect_tag.contains(EffectTag::SHOULD_CAPTURE) {
            return None;
        }
        f.effect_tag.remove(EffectTag::SHOULD_CAPTURE);
        f.effect_tag |= EffectTag::DID_CAPTURE;
        Some(wip)
    }

    /// Pops the contexts of a fiber whose render was abandoned.
    pub(crate) fn unwind_interrupted_work(&mut self, id: FiberId) {
        let kind = self.fibers[id].kind.clone();
        match kind {
            FiberKind::ClassComponent(ty) if ty.is_context_provider() => self.legacy.pop(id),
            FiberKind::HostRoot => {
                self.host_cx.pop_container(id);
                self.legacy.pop(id);
            }
            FiberKind::HostComponent(_) => self.host_cx.pop_context(id),
            FiberKind::HostPortal => self.host_cx.pop_container(id),
            FiberKind::ContextProvider(_) => self.providers.pop(id),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassCx, Component, Updater, class_component};
    use crate::element::{FunctionComponent, component, host};
    use crate::error::RenderResult;
    use crate::reconciler::RootOptions;
    use crate::testing::MemoryHost;

    struct Boundary;

    impl Component for Boundary {
        type State = Option<String>;
        const DERIVES_STATE_FROM_ERROR: bool = true;

        fn create(_props: &Props, _updater: Updater<Self::State>) -> Self {
            Boundary
        }

        fn initial_state(&self, _props: &Props) -> Self::State {
            None
        }

        fn derived_state_from_error(error: &UserError, _state: &Self::State) -> Self::State {
            Some(error.message().to_string())
        }

        fn render(&mut self, cx: &ClassCx<'_, Self::State>) -> RenderResult {
            match cx.state() {
                Some(message) => Ok(host("p").child(format!("caught: {message}")).into()),
                None => Ok(cx.props().children().clone()),
            }
        }
    }

    fn broken() -> FunctionComponent {
        FunctionComponent::new("Broken", |_, _| Err(UserError::new("boom").into()))
    }

    #[test]
    fn test_boundary_renders_recovery_ui() {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, class_component::<Boundary>().child(component(&broken())))
            .unwrap();
        assert_eq!(r.host().render(container), "<p>caught: boom</p>");
    }

    #[test]
    fn test_uncaught_error_unmounts_root() {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        r.render(root, host("div").child("ok")).unwrap();
        let err = r.render(root, host("div").child(component(&broken()))).unwrap_err();
        assert!(matches!(err, ReconcilerError::Uncaught(ref e) if e.message() == "boom"));
        assert_eq!(r.host().render(container), "");
    }

    #[test]
    fn test_suspending_without_boundary_is_an_error() {
        let wait = WaitHandle::new();
        let w = wait.clone();
        let app = FunctionComponent::new("Pending", move |_, _| Err(RenderSignal::Suspended(w.clone())));
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        let err = r.render(root, component(&app)).unwrap_err();
        assert!(err.to_string().contains("no fallback UI was specified"));
    }
}
