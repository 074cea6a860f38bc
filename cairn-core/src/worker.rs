//! Per-mount task fan-out shared by rebuild and restore.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::multi_error::MultiError;

/// Runs one task per mount and collects their failures.
///
/// Without a concurrency limit every task starts immediately; with one, tasks
/// wait for a permit before doing any work.
pub(crate) struct WorkerPool {
    tasks: JoinSet<()>,
    limiter: Option<Arc<Semaphore>>,
    errors: Arc<MultiError>,
}

impl WorkerPool {
    pub(crate) fn new(max_concurrency: Option<usize>) -> Self {
        Self {
            tasks: JoinSet::new(),
            limiter: max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            errors: Arc::new(MultiError::new()),
        }
    }

    /// Records a failure that happened before a task could be spawned.
    pub(crate) fn fail(&self, mount: &str, error: Error) {
        self.errors.add(error.for_mount(mount));
    }

    pub(crate) fn spawn<F>(&mut self, mount: String, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        let errors = Arc::clone(&self.errors);

        self.tasks.spawn(async move {
            let _permit = match limiter {
                Some(limiter) => limiter.acquire_owned().await.ok(),
                None => None,
            };

            if let Err(error) = job.await {
                errors.add(error.for_mount(mount));
            }
        });
    }

    /// Waits for every task, then returns the combined error, if any.
    pub(crate) async fn join(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                self.errors.add(Error::TaskJoin(e.to_string()));
            }
        }
        self.errors.take()
    }
}
