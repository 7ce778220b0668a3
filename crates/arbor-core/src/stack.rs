//! Value cursors for the render session.
//!
//! A render pushes values on the way down (begin-work) and pops them on the
//! way up (complete-work or unwind), so every push is paired with a pop by the
//! same fiber. Each cursor keeps the fiber that pushed an entry and checks it
//! on pop; a mismatch means the traversal lost balance and is logged.

use crate::fiber::FiberId;

pub(crate) struct Cursor<T> {
    name: &'static str,
    current: T,
    saved: Vec<(T, FiberId)>,
}

impl<T> Cursor<T> {
    pub(crate) fn new(name: &'static str, initial: T) -> Self {
        Self {
            name,
            current: initial,
            saved: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> &T {
        &self.current
    }

    pub(crate) fn push(&mut self, value: T, fiber: FiberId) {
        let prev = std::mem::replace(&mut self.current, value);
        self.saved.push((prev, fiber));
    }

    /// Restores the value saved by `fiber`'s push.
    pub(crate) fn pop(&mut self, fiber: FiberId) {
        match self.saved.pop() {
            Some((prev, owner)) => {
                if owner != fiber {
                    log::error!("{}: unexpected fiber popped", self.name);
                }
                self.current = prev;
            }
            None => log::error!("{}: unexpected pop", self.name),
        }
    }

    /// Pops every entry regardless of owner, back to the initial value.
    pub(crate) fn reset(&mut self) {
        while let Some((prev, _)) = self.saved.pop() {
            self.current = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_push_pop_restores_in_reverse() {
        let mut ids: SlotMap<FiberId, ()> = SlotMap::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut c = Cursor::new("test", 0);
        c.push(1, a);
        c.push(2, b);
        assert_eq!(*c.current(), 2);
        c.pop(b);
        assert_eq!(*c.current(), 1);
        c.pop(a);
        assert_eq!(*c.current(), 0);
    }

    #[test]
    fn test_reset_drops_unbalanced_pushes() {
        let mut ids: SlotMap<FiberId, ()> = SlotMap::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut c = Cursor::new("test", "root");
        c.push("x", a);
        c.push("y", b);
        c.reset();
        assert_eq!(*c.current(), "root");
        c.push("z", a);
        c.pop(a);
        assert_eq!(*c.current(), "root");
    }
}
