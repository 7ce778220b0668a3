//! Render timing for `Profiler` subtrees.
//!
//! Timing is only recorded for fibers in `Mode::PROFILE`. Each fiber tracks
//! its own render time (`self_base_duration`), the sum over its subtree
//! (`tree_base_duration`) and the time actually spent in this render
//! (`actual_duration`, zero for bailed-out subtrees).

use crate::fiber::{FiberArena, FiberId, Mode};
use crate::host_config::HostConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfilerPhase {
    Mount,
    Update,
}

/// Handed to a profiler's `on_render` callback after each commit that touched
/// its subtree.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfilerReport {
    pub id: String,
    pub phase: ProfilerPhase,
    pub actual_duration: f64,
    pub base_duration: f64,
    pub start_time: f64,
    pub commit_time: f64,
}

#[derive(Debug)]
pub(crate) struct ProfilerTimer {
    commit_time: f64,
    start_time: f64,
}

impl Default for ProfilerTimer {
    fn default() -> Self {
        Self {
            commit_time: 0.0,
            start_time: -1.0,
        }
    }
}

impl ProfilerTimer {
    pub(crate) fn commit_time(&self) -> f64 {
        self.commit_time
    }

    pub(crate) fn record_commit_time(&mut self, now: f64) {
        self.commit_time = now;
    }

    pub(crate) fn start<H: HostConfig>(&mut self, fibers: &mut FiberArena<H>, fiber: FiberId, now: f64) {
        if !fibers[fiber].mode.contains(Mode::PROFILE) {
            return;
        }
        self.start_time = now;
        if fibers[fiber].actual_start_time < 0.0 {
            fibers[fiber].actual_start_time = now;
        }
    }

    pub(crate) fn stop(&mut self) {
        self.start_time = -1.0;
    }

    /// Adds the time since `start` to the fiber. With `override_base`, the
    /// elapsed time also becomes the fiber's own base duration.
    pub(crate) fn stop_and_record<H: HostConfig>(
        &mut self,
        fibers: &mut FiberArena<H>,
        fiber: FiberId,
        now: f64,
        override_base: bool,
    ) {
        if self.start_time >= 0.0 {
            let elapsed = now - self.start_time;
            let f = &mut fibers[fiber];
            f.actual_duration += elapsed;
            if override_base {
                f.self_base_duration = elapsed;
            }
            self.start_time = -1.0;
        }
    }
}

/// Sums child durations into `fiber` once its subtree completed.
pub(crate) fn accumulate_child_durations<H: HostConfig>(fibers: &mut FiberArena<H>, fiber: FiberId) {
    let mut actual = fibers[fiber].actual_duration;
    let mut tree_base = fibers[fiber].self_base_duration;
    // a fiber that rendered this pass counts its children's actual time;
    // a bailed-out one only their base time
    let rendered = fibers[fiber]
        .alternate
        .and_then(|a| fibers.get(a))
        .is_none_or(|a| a.child != fibers[fiber].child);
    let mut child = fibers[fiber].child;
    while let Some(c) = child {
        if rendered {
            actual += fibers[c].actual_duration;
        }
        tree_base += fibers[c].tree_base_duration;
        child = fibers[c].sibling;
    }
    let f = &mut fibers[fiber];
    f.actual_duration = actual;
    f.tree_base_duration = tree_base;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::SYNC;
    use crate::testing::MemoryHost;

    #[test]
    fn test_timer_records_only_in_profile_mode() {
        let mut arena: FiberArena<MemoryHost> = FiberArena::default();
        let plain = arena.create_text("a".into(), Mode::empty(), SYNC);
        let profiled = arena.create_text("b".into(), Mode::PROFILE, SYNC);
        let mut timer = ProfilerTimer::default();

        timer.start(&mut arena, plain, 10.0);
        timer.stop_and_record(&mut arena, plain, 15.0, true);
        assert_eq!(arena[plain].actual_duration, 0.0);

        timer.start(&mut arena, profiled, 10.0);
        timer.stop_and_record(&mut arena, profiled, 15.0, true);
        assert_eq!(arena[profiled].actual_duration, 5.0);
        assert_eq!(arena[profiled].self_base_duration, 5.0);
        assert_eq!(arena[profiled].actual_start_time, 10.0);
    }
}
