use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::info;

use needscoop_common::{ClusterState, PublishedRun};

/// Holds the latest complete ranked result. Readers get an owned `Arc` so a
/// publish mid-read never changes what they see.
#[derive(Default)]
pub struct ResultBoard {
    current: ArcSwapOption<PublishedRun>,
    stale: AtomicBool,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a previously published run. A run saved after being marked
    /// stale comes back stale.
    pub fn with_run(run: Option<PublishedRun>) -> Self {
        let stale = run
            .as_ref()
            .is_some_and(|r| r.reports.iter().any(|c| c.state == ClusterState::Stale));
        Self {
            current: ArcSwapOption::new(run.map(Arc::new)),
            stale: AtomicBool::new(stale),
        }
    }

    /// Replace the published run in one swap and clear the stale marker.
    pub fn publish(&self, run: PublishedRun) {
        info!(
            run_id = %run.run_id,
            clusters = run.reports.len(),
            "Publishing ranked result set"
        );
        self.current.store(Some(Arc::new(run)));
        self.stale.store(false, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<Arc<PublishedRun>> {
        self.current.load_full()
    }

    /// Flag the published ranking as computed over an older corpus and move
    /// every report to `Stale`. No-op when nothing has been published.
    pub fn mark_stale(&self) {
        if self.current.load().is_none() {
            return;
        }
        self.current.rcu(|current| {
            current.as_ref().map(|run| {
                let mut run = PublishedRun::clone(run);
                for report in &mut run.reports {
                    report.state = report
                        .state
                        .transition(ClusterState::Stale)
                        .unwrap_or(report.state);
                }
                Arc::new(run)
            })
        });
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}
