use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};

/// Runs zero-argument async tasks with a hard ceiling on how many are in flight.
///
/// All tasks are polled on the caller's task, so "concurrent" means interleaved
/// I/O rather than parallel execution. A thunk is not invoked until it is
/// admitted.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A bound of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drives `tasks` to completion and returns their outputs flattened one
    /// level, in completion order.
    ///
    /// The first task error aborts the run: tasks still in flight are dropped
    /// and the error is returned. Callers that want per-task isolation encode
    /// failures in `Ok` values instead.
    pub async fn run<I, F, Fut, R, E>(&self, tasks: I) -> Result<Vec<R::Item>, E>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: IntoIterator,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::new();

        for task in tasks {
            // Wait for one slot to free up, not for the whole batch.
            if in_flight.len() >= self.concurrency {
                if let Some(outcome) = in_flight.next().await {
                    results.extend(outcome?);
                }
            }
            in_flight.push(task());
        }

        while let Some(outcome) = in_flight.next().await {
            results.extend(outcome?);
        }

        Ok(results)
    }
}
