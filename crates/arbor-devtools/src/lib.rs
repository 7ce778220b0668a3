use std::cell::RefCell;
use std::fmt::Write;
use std::rc::Rc;

use web_time::Instant;

use arbor_core::{CommitInfo, FiberId, FiberKind, HostConfig, Reconciler, RootId};

/// Running numbers over every commit a reconciler makes.
#[derive(Clone, Debug, Default)]
pub struct CommitStats {
    pub commits: u64,
    pub effects: u64,
    /// Exponential moving average of commit duration, in ms.
    pub duration_ema_ms: f64,
    pub last: Option<CommitInfo>,
    last_at: Option<Instant>,
}

impl CommitStats {
    fn record(&mut self, info: &CommitInfo) {
        self.commits += 1;
        self.effects += info.effect_count as u64;
        let a = 0.2;
        self.duration_ema_ms = if self.commits == 1 {
            info.duration_ms
        } else {
            (1.0 - a) * self.duration_ema_ms + a * info.duration_ms
        };
        self.last = Some(info.clone());
        self.last_at = Some(Instant::now());
    }

    /// Wall time since the last commit, if there was one.
    pub fn since_last_commit_ms(&self) -> Option<f64> {
        self.last_at.map(|t| t.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("commits: {}", self.commits),
            format!("effects: {}", self.effects),
            format!("commit: {:.2} ms", self.duration_ema_ms),
        ];
        if let Some(last) = &self.last {
            parts.push(format!("live fibers: {}", last.live_fibers));
        }
        parts.join("  |  ")
    }
}

/// Watches the commits of one reconciler.
pub struct Inspector {
    stats: Rc<RefCell<CommitStats>>,
    pub log_commits: bool,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self {
            stats: Rc::default(),
            log_commits: false,
        }
    }

    /// Starts observing `reconciler`. Observers can't be removed; the
    /// inspector keeps counting for the reconciler's lifetime.
    pub fn attach<H: HostConfig>(&self, reconciler: &mut Reconciler<H>) {
        let stats = self.stats.clone();
        let log_commits = self.log_commits;
        reconciler.on_commit(move |info| {
            if log_commits {
                log::debug!(
                    "commit {:?} at {:?}: {} effects in {:.2} ms",
                    info.root,
                    info.expiration_time,
                    info.effect_count,
                    info.duration_ms
                );
            }
            stats.borrow_mut().record(info);
        });
    }

    pub fn stats(&self) -> CommitStats {
        self.stats.borrow().clone()
    }
}

/// Renders the committed fiber tree of `root`, one fiber per line.
pub fn dump_tree<H: HostConfig>(reconciler: &Reconciler<H>, root: RootId) -> String {
    let mut out = String::new();
    if let Some(current) = reconciler.root_current(root) {
        dump_fiber(reconciler, current, 0, &mut out);
    }
    out
}

fn dump_fiber<H: HostConfig>(reconciler: &Reconciler<H>, id: FiberId, depth: usize, out: &mut String) {
    let fibers = reconciler.fibers();
    let mut next = Some(id);
    while let Some(id) = next {
        let Some(fiber) = fibers.get(id) else {
            return;
        };
        let _ = write!(out, "{:indent$}", "", indent = depth * 2);
        match (fiber.kind(), fiber.text()) {
            (FiberKind::HostText, Some(text)) => {
                let _ = write!(out, "{text:?}");
            }
            (FiberKind::HostComponent(_) | FiberKind::HostRoot, _) => out.push_str(&fiber.display_name()),
            (kind, _) => {
                let _ = write!(out, "<{}> {}", fiber.display_name(), kind.tag_name());
            }
        }
        if let Some(key) = fiber.key() {
            let _ = write!(out, " key={}", key.as_str());
        }
        out.push('\n');
        if let Some(child) = fiber.child() {
            dump_fiber(reconciler, child, depth + 1, out);
        }
        // the root's siblings are not part of its tree
        next = if depth == 0 { None } else { fiber.sibling() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::testing::MemoryHost;
    use arbor_core::{FunctionComponent, Node, RootOptions, component, host};

    fn setup() -> (Reconciler<MemoryHost>, RootId) {
        let mut r = Reconciler::new(MemoryHost::new());
        let container = r.host_mut().create_root();
        let root = r.create_container(container, RootOptions::default());
        (r, root)
    }

    #[test]
    fn test_inspector_counts_commits() {
        let (mut r, root) = setup();
        let inspector = Inspector::new();
        inspector.attach(&mut r);

        r.render(root, host("p").child("a")).unwrap();
        r.render(root, host("p").child("b")).unwrap();
        let stats = inspector.stats();
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.last.as_ref().map(|l| l.root), Some(root));
        assert!(stats.since_last_commit_ms().is_some());
        assert!(stats.summary().starts_with("commits: 2"));
    }

    #[test]
    fn test_dump_tree() {
        let label = FunctionComponent::new("Label", |_, props| Ok(props.children().clone()));
        let (mut r, root) = setup();
        let tree: Node = host("ul")
            .children([
                host("li").key("a").child("one").into(),
                host("li").key("b").child(component(&label).child("two")).into(),
            ])
            .into();
        r.render(root, tree).unwrap();
        insta::assert_snapshot!(dump_tree(&r, root), @r#"
        #root
          ul
            li key=a
              "one"
            li key=b
              <Label> FunctionComponent
                "two"
        "#);
    }
}
