use crate::error::Invariant;
use crate::fiber::FiberId;
use crate::host_config::HostConfig;
use crate::stack::Cursor;

/// Root container, host context and the fiber that owns the innermost host
/// context, tracked while rendering.
pub(crate) struct HostContextStack<H: HostConfig> {
    container: Cursor<Option<H::Container>>,
    context: Cursor<Option<H::HostContext>>,
    context_fiber: Cursor<Option<FiberId>>,
}

impl<H: HostConfig> Default for HostContextStack<H> {
    fn default() -> Self {
        Self {
            container: Cursor::new("root container", None),
            context: Cursor::new("host context", None),
            context_fiber: Cursor::new("host context fiber", None),
        }
    }
}

impl<H: HostConfig> HostContextStack<H> {
    pub(crate) fn root_container(&self) -> Result<H::Container, Invariant> {
        self.container
            .current()
            .clone()
            .ok_or(Invariant::Missing("a root container on the host context stack"))
    }

    pub(crate) fn host_context(&self) -> Result<H::HostContext, Invariant> {
        self.context
            .current()
            .clone()
            .ok_or(Invariant::Missing("a host context on the stack"))
    }

    pub(crate) fn push_container(&mut self, host: &H, fiber: FiberId, container: H::Container) {
        let root_context = host.root_host_context(&container);
        self.container.push(Some(container), fiber);
        self.context_fiber.push(Some(fiber), fiber);
        self.context.push(Some(root_context), fiber);
    }

    pub(crate) fn pop_container(&mut self, fiber: FiberId) {
        self.context.pop(fiber);
        self.context_fiber.pop(fiber);
        self.container.pop(fiber);
    }

    /// Pushes only when `ty` changes the context, so pops must check
    /// ownership.
    pub(crate) fn push_context(&mut self, host: &H, fiber: FiberId, ty: &str) -> Result<(), Invariant> {
        let root = self.root_container()?;
        let parent = self.host_context()?;
        let next = host.child_host_context(&parent, ty, &root);
        if next == parent {
            return Ok(());
        }
        self.context_fiber.push(Some(fiber), fiber);
        self.context.push(Some(next), fiber);
        Ok(())
    }

    pub(crate) fn pop_context(&mut self, fiber: FiberId) {
        if *self.context_fiber.current() != Some(fiber) {
            return;
        }
        self.context.pop(fiber);
        self.context_fiber.pop(fiber);
    }

    pub(crate) fn reset(&mut self) {
        self.container.reset();
        self.context.reset();
        self.context_fiber.reset();
    }
}
