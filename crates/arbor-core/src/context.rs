//! Context propagation.
//!
//! Two mechanisms live here:
//!
//! - **legacy context**: class components declare `child_context_types` and
//!   merge `child_context()` into an inherited map; descendants pick the keys
//!   they list in `context_types`. The merged map is pushed on a cursor during
//!   begin-work and popped in complete-work.
//! - **provider context**: a [`crate::element::Context`] provider pushes its
//!   value for the duration of its subtree. Readers record a dependency on
//!   their fiber, and a provider whose value changed walks its subtree to
//!   schedule every dependent fiber at the current render priority.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::class::ClassInstance;
use crate::element::{ContextId, ContextKey, PropValue};
use crate::expiration::{ExpirationTime, NO_WORK};
use crate::fiber::{FiberArena, FiberId, FiberKind};
use crate::host_config::HostConfig;
use crate::stack::Cursor;
use crate::update_queue::{Update, UpdateKind, enqueue_update};

/// An immutable legacy context map. Compared by identity.
#[derive(Clone, Default)]
pub struct LegacyContext(Rc<BTreeMap<Rc<str>, PropValue>>);

impl LegacyContext {
    pub fn new(values: BTreeMap<Rc<str>, PropValue>) -> Self {
        Self(Rc::new(values))
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&Rc<str>, &PropValue)> {
        self.0.iter()
    }

    pub fn ptr_eq(&self, other: &LegacyContext) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LegacyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

pub(crate) struct LegacyContextStack {
    context: Cursor<LegacyContext>,
    did_perform_work: Cursor<bool>,
    /// The parent context of the provider pushed last, needed to merge once
    /// the provider's own instance exists.
    previous: LegacyContext,
    empty: LegacyContext,
}

impl Default for LegacyContextStack {
    fn default() -> Self {
        let empty = LegacyContext::default();
        Self {
            context: Cursor::new("legacy context", empty.clone()),
            did_perform_work: Cursor::new("legacy context changed", false),
            previous: empty.clone(),
            empty,
        }
    }
}

impl LegacyContextStack {
    pub(crate) fn empty(&self) -> LegacyContext {
        self.empty.clone()
    }

    /// A provider must not see its own child context, so once it has pushed
    /// it reads the parent's.
    pub(crate) fn unmasked(&self, is_provider: bool, did_push_own: bool) -> LegacyContext {
        if did_push_own && is_provider {
            self.previous.clone()
        } else {
            self.context.current().clone()
        }
    }

    /// Picks `keys` out of `unmasked`, reusing the instance's cached copy when
    /// the unmasked map is unchanged.
    pub(crate) fn masked(
        &self,
        keys: &[&str],
        instance: Option<&ClassInstance>,
        unmasked: &LegacyContext,
    ) -> LegacyContext {
        if keys.is_empty() {
            return self.empty.clone();
        }
        if let Some(instance) = instance
            && let Some((cached_unmasked, cached)) = instance.0.masked_cache.borrow().as_ref()
            && cached_unmasked.ptr_eq(unmasked)
        {
            return cached.clone();
        }
        let masked: BTreeMap<Rc<str>, PropValue> = keys
            .iter()
            .filter_map(|k| unmasked.get(k).map(|v| (Rc::from(*k), v.clone())))
            .collect();
        let masked = LegacyContext::new(masked);
        if let Some(instance) = instance {
            *instance.0.masked_cache.borrow_mut() = Some((unmasked.clone(), masked.clone()));
        }
        masked
    }

    pub(crate) fn has_changed(&self) -> bool {
        *self.did_perform_work.current()
    }

    pub(crate) fn push_top_level(&mut self, fiber: FiberId, context: LegacyContext, did_change: bool) {
        if !self.context.current().ptr_eq(&self.empty) {
            log::error!("unexpected legacy context found on the stack");
        }
        self.context.push(context, fiber);
        self.did_perform_work.push(did_change, fiber);
    }

    /// Pushes early so the stack stays balanced even if the instance does not
    /// exist yet; `invalidate_provider` replaces the entry later.
    pub(crate) fn push_provider(&mut self, fiber: FiberId, instance: Option<&ClassInstance>) {
        let merged = instance
            .and_then(|i| i.0.merged_child_context.borrow().clone())
            .unwrap_or_else(|| self.empty.clone());
        self.previous = self.context.current().clone();
        self.context.push(merged, fiber);
        let inherited = *self.did_perform_work.current();
        self.did_perform_work.push(inherited, fiber);
    }

    pub(crate) fn invalidate_provider(
        &mut self,
        fiber: FiberId,
        instance: &ClassInstance,
        did_change: bool,
    ) {
        if did_change {
            let merged = instance.child_context(&self.previous);
            *instance.0.merged_child_context.borrow_mut() = Some(merged.clone());
            self.did_perform_work.pop(fiber);
            self.context.pop(fiber);
            self.context.push(merged, fiber);
            self.did_perform_work.push(did_change, fiber);
        } else {
            self.did_perform_work.pop(fiber);
            self.did_perform_work.push(did_change, fiber);
        }
    }

    pub(crate) fn pop(&mut self, fiber: FiberId) {
        self.did_perform_work.pop(fiber);
        self.context.pop(fiber);
    }

    pub(crate) fn reset(&mut self) {
        self.context.reset();
        self.did_perform_work.reset();
        self.previous = self.empty.clone();
    }
}

/// Current values of every provided context, plus the values they shadow.
#[derive(Default)]
pub(crate) struct ProviderStack {
    values: HashMap<ContextId, Rc<dyn Any>>,
    saved: Vec<(ContextId, Option<Rc<dyn Any>>, FiberId)>,
}

impl ProviderStack {
    pub(crate) fn push(&mut self, fiber: FiberId, key: &ContextKey, value: Rc<dyn Any>) {
        let prev = self.values.insert(key.id, value);
        self.saved.push((key.id, prev, fiber));
    }

    pub(crate) fn pop(&mut self, fiber: FiberId) {
        let Some((id, prev, owner)) = self.saved.pop() else {
            log::error!("provider stack: unexpected pop");
            return;
        };
        if owner != fiber {
            log::error!("provider stack: unexpected fiber popped");
        }
        match prev {
            Some(v) => {
                self.values.insert(id, v);
            }
            None => {
                self.values.remove(&id);
            }
        }
    }

    pub(crate) fn read(&self, key: &ContextKey) -> Rc<dyn Any> {
        self.values
            .get(&key.id)
            .cloned()
            .unwrap_or_else(|| key.default.clone())
    }

    pub(crate) fn reset(&mut self) {
        self.values.clear();
        self.saved.clear();
    }
}

/// Records the contexts a fiber reads during one render.
#[derive(Default)]
pub(crate) struct ContextReads {
    pub(crate) contexts: SmallVec<[ContextId; 4]>,
}

impl ContextReads {
    pub(crate) fn record(&mut self, id: ContextId) {
        if !self.contexts.contains(&id) {
            self.contexts.push(id);
        }
    }
}

/// Walks the subtree under a provider whose value changed and schedules every
/// fiber that read `context`. Nested providers of the same context shield
/// their subtrees.
pub(crate) fn propagate_context_change<H: HostConfig>(
    fibers: &mut FiberArena<H>,
    provider: FiberId,
    context: ContextId,
    render_expiration_time: ExpirationTime,
) {
    let mut fiber = fibers[provider].child;
    if let Some(child) = fiber {
        fibers[child].parent = Some(provider);
    }
    while let Some(id) = fiber {
        let mut next = None;
        let reads = fibers[id]
            .dependencies
            .as_ref()
            .is_some_and(|d| d.contexts.contains(&context));

        if reads {
            if matches!(fibers[id].kind, FiberKind::ClassComponent(_)) {
                // force a re-render even if should_update would say no
                let update = Rc::new(Update {
                    expiration_time: render_expiration_time,
                    kind: UpdateKind::Force,
                    callback: None,
                });
                enqueue_update(fibers, id, update);
            }
            bump_expiration(fibers, id, render_expiration_time);
            if let Some(deps) = fibers[id].dependencies.as_mut()
                && deps.expiration_time < render_expiration_time
            {
                deps.expiration_time = render_expiration_time;
            }
            schedule_ancestors(fibers, fibers[id].parent, render_expiration_time);
            next = fibers[id].child;
        } else if let FiberKind::ContextProvider(key) = &fibers[id].kind {
            if key.id != context {
                next = fibers[id].child;
            }
        } else {
            next = fibers[id].child;
        }

        if let Some(child) = next {
            fibers[child].parent = Some(id);
        } else {
            // no child: move to the next sibling, climbing as needed
            let mut node = id;
            loop {
                if node == provider {
                    next = None;
                    break;
                }
                if let Some(sibling) = fibers[node].sibling {
                    fibers[sibling].parent = fibers[node].parent;
                    next = Some(sibling);
                    break;
                }
                match fibers[node].parent {
                    Some(parent) => node = parent,
                    None => {
                        next = None;
                        break;
                    }
                }
            }
        }
        fiber = next;
    }
}

fn bump_expiration<H: HostConfig>(fibers: &mut FiberArena<H>, id: FiberId, time: ExpirationTime) {
    if fibers[id].expiration_time < time {
        fibers[id].expiration_time = time;
    }
    if let Some(alt) = fibers[id].alternate
        && fibers.contains(alt)
        && fibers[alt].expiration_time < time
    {
        fibers[alt].expiration_time = time;
    }
}

/// Raises `child_expiration_time` on `from` and every ancestor (and their
/// alternates) until one already carries work at `time`.
pub(crate) fn schedule_ancestors<H: HostConfig>(
    fibers: &mut FiberArena<H>,
    from: Option<FiberId>,
    time: ExpirationTime,
) {
    let mut node = from;
    while let Some(id) = node {
        let alt = fibers[id].alternate.filter(|a| fibers.contains(*a));
        if fibers[id].child_expiration_time < time {
            fibers[id].child_expiration_time = time;
            if let Some(alt) = alt
                && fibers[alt].child_expiration_time < time
            {
                fibers[alt].child_expiration_time = time;
            }
        } else if let Some(alt) = alt
            && fibers[alt].child_expiration_time < time
        {
            fibers[alt].child_expiration_time = time;
        } else {
            break;
        }
        node = fibers[id].parent;
    }
}

/// Whether a fiber's previous context reads are stale for this render.
pub(crate) fn has_pending_context_work<H: HostConfig>(
    fibers: &FiberArena<H>,
    fiber: FiberId,
    render_expiration_time: ExpirationTime,
) -> bool {
    fibers[fiber].dependencies.as_ref().is_some_and(|d| {
        d.expiration_time != NO_WORK && d.expiration_time >= render_expiration_time
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Context;
    use slotmap::SlotMap;

    #[test]
    fn test_provider_values_shadow_and_restore() {
        let mut ids: SlotMap<FiberId, ()> = SlotMap::with_key();
        let (outer, inner) = (ids.insert(()), ids.insert(()));
        let theme = Context::new("light");
        let mut stack = ProviderStack::default();
        let read = |s: &ProviderStack| *s.read(theme.key()).downcast_ref::<&str>().unwrap_or(&"?");
        assert_eq!(read(&stack), "light");
        stack.push(outer, theme.key(), Rc::new("dark"));
        stack.push(inner, theme.key(), Rc::new("blue"));
        assert_eq!(read(&stack), "blue");
        stack.pop(inner);
        assert_eq!(read(&stack), "dark");
        stack.pop(outer);
        assert_eq!(read(&stack), "light");
    }

    #[test]
    fn test_masked_context_picks_declared_keys() {
        let stack = LegacyContextStack::default();
        let mut map = BTreeMap::new();
        map.insert(Rc::from("color"), PropValue::from("red"));
        map.insert(Rc::from("size"), PropValue::from(3));
        let unmasked = LegacyContext::new(map);
        let masked = stack.masked(&["color"], None, &unmasked);
        assert_eq!(masked.get("color"), Some(&PropValue::from("red")));
        assert!(masked.get("size").is_none());
        assert!(stack.masked(&[], None, &unmasked).is_empty());
    }
}
