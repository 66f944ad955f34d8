use std::future::Future;

use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

/// Owns the background tasks of one node: every task spawned through it is
/// stopped by [`TaskSupervisor::shutdown`], which waits for them to finish.
#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawns `fut`, dropping it as soon as the supervisor is shut down.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(task = name, "Task cancelled"),
                _ = fut => debug!(task = name, "Task finished"),
            }
        });
    }

    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
