//! Component stacks for captured errors.

use std::fmt::Write;

use crate::error::UserError;
use crate::fiber::{FiberArena, FiberId, FiberKind};
use crate::host_config::HostConfig;

fn describe_fiber<H: HostConfig>(fibers: &FiberArena<H>, fiber: FiberId) -> Option<String> {
    match fibers[fiber].kind {
        FiberKind::HostRoot
        | FiberKind::HostPortal
        | FiberKind::HostText
        | FiberKind::Fragment
        | FiberKind::ContextProvider(_)
        | FiberKind::ContextConsumer(_) => None,
        _ => Some(fibers[fiber].display_name()),
    }
}

/// "in Leaf / in div / in App", innermost first.
pub(crate) fn component_stack<H: HostConfig>(fibers: &FiberArena<H>, fiber: FiberId) -> String {
    let mut out = String::new();
    let mut node = Some(fiber);
    while let Some(id) = node {
        let Some(f) = fibers.get(id) else {
            break;
        };
        if let Some(name) = describe_fiber(fibers, id) {
            let _ = write!(out, "\n    in {name}");
        }
        node = f.parent;
    }
    out
}

/// An error stamped with the component stack of the fiber that raised it.
#[derive(Clone, Debug)]
pub(crate) struct CapturedValue {
    pub(crate) error: UserError,
}

impl CapturedValue {
    pub(crate) fn new<H: HostConfig>(fibers: &FiberArena<H>, error: UserError, source: Option<FiberId>) -> Self {
        let error = match source {
            Some(s) if fibers.contains(s) => error.with_component_stack(component_stack(fibers, s)),
            _ => error,
        };
        Self { error }
    }
}

/// Reports a captured error the way an error dialog would.
pub(crate) fn log_captured_error(boundary: Option<&str>, error: &UserError) {
    let stack = error.component_stack().unwrap_or("");
    match boundary {
        Some(name) => log::error!(
            "{}\n\nThe above error occurred in a component:{stack}\n\nRecreating this component tree from scratch using the error boundary {name}.",
            error.message()
        ),
        None => log::error!(
            "{}\n\nThe above error occurred in a component:{stack}\n\nConsider adding an error boundary to your tree to customize error handling behavior.",
            error.message()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementBuilder, ElementType, host};
    use crate::expiration::SYNC;
    use crate::fiber::Mode;
    use crate::testing::MemoryHost;

    #[test]
    fn test_stack_lists_components_innermost_first() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let profiler = ElementBuilder::new(ElementType::Profiler).build();
        let outer = arena.create_from_element(&profiler, Mode::empty(), SYNC);
        let div = arena.create_from_element(&host("div").build(), Mode::empty(), SYNC);
        let text = arena.create_text("x".into(), Mode::empty(), SYNC);
        arena[div].parent = Some(outer);
        arena[text].parent = Some(div);
        assert_eq!(component_stack(&arena, text), "\n    in div\n    in Profiler");
    }
}
