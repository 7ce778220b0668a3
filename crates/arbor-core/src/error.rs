use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::element::Node;
use crate::suspense::WaitHandle;

/// An error raised by application code: a component body, a lifecycle, a ref
/// callback or an effect. Cheap to clone so it can be captured, stored in an
/// update and handed to an error boundary.
#[derive(Clone, Error)]
#[error("{message}")]
pub struct UserError {
    message: Rc<str>,
    component_stack: Option<Rc<str>>,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            message: message.into(),
            component_stack: None,
        }
    }

    /// Flattens an error and its `source()` chain into a single message.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(s) = source {
            message.push_str(": ");
            message.push_str(&s.to_string());
            source = s.source();
        }
        Self::new(message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn component_stack(&self) -> Option<&str> {
        self.component_stack.as_deref()
    }

    pub(crate) fn with_component_stack(mut self, stack: String) -> Self {
        if self.component_stack.is_none() {
            self.component_stack = Some(stack.into());
        }
        self
    }
}

impl fmt::Debug for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserError")
            .field("message", &self.message)
            .finish()
    }
}

impl PartialEq for UserError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

/// Internal consistency failures and forbidden usage. Never recovered, never
/// routed to error boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Invariant {
    #[error("rendered more hooks than during the previous render")]
    TooManyHooks,
    #[error("rendered fewer hooks than expected; this may be caused by an accidental early return")]
    TooFewHooks,
    #[error("hook #{index} changed between renders: expected {expected}, found {found}")]
    HookKindMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("too many re-renders: render-phase updates exceeded the limit of {0}")]
    TooManyReRenders(usize),
    #[error("maximum update depth exceeded: {0} nested synchronous updates")]
    NestedUpdateLimit(usize),
    #[error("expected to find a host parent")]
    MissingHostParent,
    #[error("expected {0}")]
    Missing(&'static str),
    #[error("a {0} fiber should not have side effects")]
    UnexpectedEffect(&'static str),
    #[error("a root cannot capture an error twice in one render")]
    RootAlreadyCaptured,
    #[error("{0}")]
    Other(&'static str),
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("internal reconciler invariant violated: {0}")]
    Invariant(#[from] Invariant),
    #[error("uncaught error: {0}")]
    Uncaught(UserError),
    #[error("unknown root container")]
    UnknownRoot,
}

impl ReconcilerError {
    /// True for core bugs and forbidden usage, false for application errors.
    pub fn is_invariant(&self) -> bool {
        matches!(self, ReconcilerError::Invariant(_))
    }
}

/// How a render step can end other than producing children.
#[derive(Clone, Debug)]
pub enum RenderSignal {
    /// Data is not ready. The nearest suspense boundary shows its fallback and
    /// retries once the handle settles.
    Suspended(WaitHandle),
    Failed(UserError),
    Fatal(Invariant),
}

impl From<UserError> for RenderSignal {
    fn from(e: UserError) -> Self {
        RenderSignal::Failed(e)
    }
}

impl From<Invariant> for RenderSignal {
    fn from(e: Invariant) -> Self {
        RenderSignal::Fatal(e)
    }
}

pub type RenderResult<T = Node> = Result<T, RenderSignal>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn test_from_error_flattens_source_chain() {
        let e = UserError::from_error(&Outer(Inner));
        assert_eq!(e.message(), "outer: inner");
    }

    #[test]
    fn test_invariants_are_distinguishable() {
        let inv: ReconcilerError = Invariant::TooFewHooks.into();
        assert!(inv.is_invariant());
        assert!(!ReconcilerError::Uncaught(UserError::new("boom")).is_invariant());
    }
}
