//! State updates for class components and roots.
//!
//! Every update carries the expiration time it was scheduled at. Processing a
//! queue at some render priority applies the updates that are urgent enough,
//! in insertion order, and keeps everything from the first skipped update
//! onward, together with the state right before it. That retained tail is
//! replayed on top of that state later, so lower-priority work is never lost
//! and the final state always reflects insertion order.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::class::StateRef;
use crate::element::{Node, Props};
use crate::error::UserError;
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::fiber::{EffectTag, FiberArena, FiberId, FiberQueue, MemoizedState};
use crate::host_config::HostConfig;

/// Computes the next state from the previous one. `None` keeps it.
pub(crate) type Payload = Rc<dyn Fn(&dyn Any, &Props) -> Option<StateRef>>;

pub(crate) enum UpdateKind {
    Update(Payload),
    Replace(StateRef),
    Force,
    /// Error recovery update for a boundary; marks the fiber `DID_CAPTURE`.
    Capture(Option<Payload>),
}

pub(crate) enum UpdateCallback {
    Fn(RefCell<Option<Box<dyn FnOnce() -> Result<(), UserError>>>>),
    /// Calls the boundary's `did_catch` and logs the error.
    DidCatch(UserError),
    /// An error nothing caught; reported to the embedder.
    Uncaught(UserError),
}

pub(crate) struct Update {
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) kind: UpdateKind,
    pub(crate) callback: Option<UpdateCallback>,
}

impl Update {
    pub(crate) fn new(expiration_time: ExpirationTime, kind: UpdateKind) -> Self {
        Self {
            expiration_time,
            kind,
            callback: None,
        }
    }

    pub(crate) fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// State of a host root: the element last rendered into it.
#[derive(Clone, Default)]
pub struct RootState {
    pub(crate) element: Node,
}

impl RootState {
    pub fn element(&self) -> &Node {
        &self.element
    }
}

#[derive(Clone)]
pub(crate) struct UpdateQueue {
    pub(crate) base_state: StateRef,
    pub(crate) updates: Vec<Rc<Update>>,
    pub(crate) captured: Vec<Rc<Update>>,
    /// Processed updates whose callbacks run at commit.
    pub(crate) callbacks: Vec<Rc<Update>>,
    pub(crate) captured_callbacks: Vec<Rc<Update>>,
}

impl UpdateQueue {
    pub(crate) fn new(base_state: StateRef) -> Self {
        Self {
            base_state,
            updates: Vec::new(),
            captured: Vec::new(),
            callbacks: Vec::new(),
            captured_callbacks: Vec::new(),
        }
    }
}

pub(crate) struct Processed {
    pub(crate) state: StateRef,
    pub(crate) remaining: ExpirationTime,
    pub(crate) force_update: bool,
    pub(crate) effect_tag: EffectTag,
}

fn apply(update: &Update, prev: &StateRef, next_props: &Props) -> (StateRef, bool, EffectTag) {
    match &update.kind {
        UpdateKind::Replace(s) => (s.clone(), false, EffectTag::empty()),
        UpdateKind::Force => (prev.clone(), true, EffectTag::empty()),
        UpdateKind::Update(payload) => (
            payload(prev.as_ref(), next_props).unwrap_or_else(|| prev.clone()),
            false,
            EffectTag::empty(),
        ),
        UpdateKind::Capture(payload) => {
            let next = payload
                .as_ref()
                .and_then(|p| p(prev.as_ref(), next_props))
                .unwrap_or_else(|| prev.clone());
            (next, false, EffectTag::DID_CAPTURE)
        }
    }
}

impl UpdateQueue {
    /// Applies every update at or above `render_expiration_time`.
    pub(crate) fn process(&mut self, props: &Props, render_expiration_time: ExpirationTime) -> Processed {
        let mut out = Processed {
            state: self.base_state.clone(),
            remaining: NO_WORK,
            force_update: false,
            effect_tag: EffectTag::empty(),
        };
        let mut new_base_state = None;

        let mut first_skipped = None;
        for (i, update) in self.updates.iter().enumerate() {
            if update.expiration_time < render_expiration_time {
                if first_skipped.is_none() {
                    first_skipped = Some(i);
                    new_base_state = Some(out.state.clone());
                }
                out.remaining = out.remaining.max(update.expiration_time);
                continue;
            }
            let (state, force, tag) = apply(update, &out.state, props);
            out.state = state;
            out.force_update |= force;
            out.effect_tag |= tag;
            if update.callback.is_some() {
                out.effect_tag |= EffectTag::CALLBACK;
                self.callbacks.push(update.clone());
            }
        }

        let mut first_skipped_captured = None;
        for (i, update) in self.captured.iter().enumerate() {
            if update.expiration_time < render_expiration_time {
                if first_skipped_captured.is_none() {
                    first_skipped_captured = Some(i);
                    if first_skipped.is_none() {
                        new_base_state = Some(out.state.clone());
                    }
                }
                out.remaining = out.remaining.max(update.expiration_time);
                continue;
            }
            let (state, force, tag) = apply(update, &out.state, props);
            out.state = state;
            out.force_update |= force;
            out.effect_tag |= tag;
            if update.callback.is_some() {
                out.effect_tag |= EffectTag::CALLBACK;
                self.captured_callbacks.push(update.clone());
            }
        }

        match first_skipped {
            Some(i) => {
                self.updates.drain(..i);
            }
            None => self.updates.clear(),
        }
        match first_skipped_captured {
            Some(i) => {
                self.captured.drain(..i);
                out.effect_tag |= EffectTag::CALLBACK;
            }
            None => self.captured.clear(),
        }
        self.base_state = new_base_state.unwrap_or_else(|| out.state.clone());
        out
    }

    /// Moves unprocessed captured updates to the regular queue and hands out
    /// the callbacks to run at commit.
    pub(crate) fn take_commit_callbacks(&mut self) -> Vec<Rc<Update>> {
        if !self.captured.is_empty() {
            let captured = std::mem::take(&mut self.captured);
            self.updates.extend(captured);
        }
        let mut callbacks = std::mem::take(&mut self.callbacks);
        callbacks.append(&mut self.captured_callbacks);
        callbacks
    }
}

/// Processes the work-in-progress fiber's queue in place: writes the new
/// state to `memoized_state`, leftover priority to `expiration_time` and any
/// callback/capture flags to `effect_tag`. Returns whether a force update was
/// among the applied updates.
pub(crate) fn process_update_queue<H: HostConfig>(
    fibers: &mut FiberArena<H>,
    wip: FiberId,
    props: &Props,
    render_expiration_time: ExpirationTime,
) -> bool {
    let FiberQueue::State(mut queue) =
        std::mem::replace(&mut fibers[wip].update_queue, FiberQueue::None)
    else {
        return false;
    };
    let out = queue.process(props, render_expiration_time);
    let fiber = &mut fibers[wip];
    fiber.update_queue = FiberQueue::State(queue);
    fiber.memoized_state = MemoizedState::State(out.state);
    fiber.expiration_time = out.remaining;
    if out.effect_tag.contains(EffectTag::DID_CAPTURE) {
        fiber.effect_tag.remove(EffectTag::SHOULD_CAPTURE);
    }
    fiber.effect_tag |= out.effect_tag;
    out.force_update
}

fn ensure_queue<H: HostConfig>(fibers: &mut FiberArena<H>, fiber: FiberId) {
    if matches!(fibers[fiber].update_queue, FiberQueue::State(_)) {
        return;
    }
    let base = match &fibers[fiber].memoized_state {
        MemoizedState::State(s) => s.clone(),
        _ => Rc::new(()) as StateRef,
    };
    fibers[fiber].update_queue = FiberQueue::State(UpdateQueue::new(base));
}

/// Appends `update` to the queues of both `fiber` and its alternate.
pub(crate) fn enqueue_update<H: HostConfig>(fibers: &mut FiberArena<H>, fiber: FiberId, update: Rc<Update>) {
    let alternate = fibers[fiber].alternate.filter(|a| fibers.contains(*a));
    match alternate {
        None => ensure_queue(fibers, fiber),
        Some(alt) => {
            let has1 = matches!(fibers[fiber].update_queue, FiberQueue::State(_));
            let has2 = matches!(fibers[alt].update_queue, FiberQueue::State(_));
            match (has1, has2) {
                (false, false) => {
                    ensure_queue(fibers, fiber);
                    ensure_queue(fibers, alt);
                }
                (true, false) => fibers[alt].update_queue = fibers[fiber].update_queue.clone(),
                (false, true) => fibers[fiber].update_queue = fibers[alt].update_queue.clone(),
                (true, true) => {}
            }
            if let FiberQueue::State(q) = &mut fibers[alt].update_queue {
                q.updates.push(update.clone());
            }
        }
    }
    if let FiberQueue::State(q) = &mut fibers[fiber].update_queue {
        q.updates.push(update);
    }
}

/// Queues an error-recovery update on the work-in-progress fiber only.
pub(crate) fn enqueue_captured_update<H: HostConfig>(
    fibers: &mut FiberArena<H>,
    wip: FiberId,
    update: Rc<Update>,
) {
    ensure_queue(fibers, wip);
    if let FiberQueue::State(q) = &mut fibers[wip].update_queue {
        q.captured.push(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::SYNC;

    fn add(n: i64) -> Payload {
        Rc::new(move |prev: &dyn Any, _: &Props| {
            prev.downcast_ref::<String>()
                .map(|s| Rc::new(format!("{s}{n}")) as StateRef)
        })
    }

    fn state(s: &StateRef) -> String {
        s.downcast_ref::<String>().cloned().unwrap_or_default()
    }

    #[test]
    fn test_skipped_updates_replay_in_insertion_order() {
        let low = ExpirationTime(100);
        let high = ExpirationTime(200);
        let mut q = UpdateQueue::new(Rc::new(String::new()));
        q.updates.push(Rc::new(Update::new(low, UpdateKind::Update(add(1)))));
        q.updates.push(Rc::new(Update::new(high, UpdateKind::Update(add(2)))));

        let first = q.process(&Props::default(), high);
        assert_eq!(state(&first.state), "2");
        assert_eq!(first.remaining, low);
        assert_eq!(state(&q.base_state), "");
        assert_eq!(q.updates.len(), 2);

        let second = q.process(&Props::default(), low);
        assert_eq!(state(&second.state), "12");
        assert_eq!(second.remaining, NO_WORK);
        assert!(q.updates.is_empty());
    }

    #[test]
    fn test_force_and_callbacks_are_reported() {
        let mut q = UpdateQueue::new(Rc::new(String::from("x")));
        q.updates.push(Rc::new(
            Update::new(SYNC, UpdateKind::Force)
                .with_callback(UpdateCallback::Fn(RefCell::new(Some(Box::new(|| Ok(())))))),
        ));
        let out = q.process(&Props::default(), SYNC);
        assert!(out.force_update);
        assert!(out.effect_tag.contains(EffectTag::CALLBACK));
        assert_eq!(q.take_commit_callbacks().len(), 1);
    }
}
