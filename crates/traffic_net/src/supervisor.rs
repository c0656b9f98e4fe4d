//! Supervised task groups.
//!
//! A [`TaskGroup`] owns a set of long-running tasks that share one
//! [`CancellationToken`]. Tasks are expected to return once the token is
//! cancelled. The first task to fail cancels the token, so its siblings wind
//! down, and [`TaskGroup::join`] reports that first failure.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Tasks sharing a cancellation token.
#[derive(Debug)]
pub struct TaskGroup {
    tasks: JoinSet<(String, anyhow::Result<()>)>,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// Create a group cancelled together with `cancel`.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Token every task in the group should select on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of tasks still tracked by the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a named task onto the current runtime.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "spawning task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Wait for every task to finish.
    ///
    /// # Errors
    ///
    /// Returns the first task failure or panic. Any failure cancels the rest
    /// of the group.
    pub async fn join(mut self) -> anyhow::Result<()> {
        let mut first: Option<anyhow::Error> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    debug!(task = %name, "task finished");
                    continue;
                }
                Ok((name, Err(e))) => {
                    error!(task = %name, error = %e, "task failed");
                    e.context(format!("task {name} failed"))
                }
                Err(e) => {
                    error!(error = %e, "task panicked or was aborted");
                    anyhow::Error::new(e)
                }
            };
            self.cancel.cancel();
            first.get_or_insert(failure);
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_clean_shutdown() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());
        for i in 0..3 {
            let token = group.token();
            group.spawn(format!("worker-{i}"), async move {
                token.cancelled().await;
                Ok(())
            });
        }
        assert_eq!(group.len(), 3);
        cancel.cancel();
        group.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());
        let token = group.token();
        group.spawn("waiter", async move {
            token.cancelled().await;
            Ok(())
        });
        group.spawn("failer", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::bail!("boom")
        });

        let err = tokio::time::timeout(Duration::from_secs(5), group.join())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("failer"));
        assert!(format!("{err:#}").contains("boom"));
        assert!(cancel.is_cancelled());
    }
}
