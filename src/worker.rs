//! Claim, execute, report.
//!
//! [`Worker`] drives one [`TaskController`]: it claims a task, marks it
//! started, hands its input to a [`TaskProcessor`], and records either the
//! result or the failure. What a task actually does is up to the processor.

use async_trait::async_trait;

use crate::controller::TaskController;
use crate::domain::SourceMap;
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::types::LifecycleState;

/// Error type returned by a [`TaskProcessor`].
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Executes the work a task represents.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use docqueue::worker::{ProcessError, TaskProcessor};
/// use docqueue::SourceMap;
///
/// struct Upper;
///
/// #[async_trait]
/// impl TaskProcessor for Upper {
///     async fn process(&self, input: String, _sources: SourceMap) -> Result<String, ProcessError> {
///         Ok(input.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Processes one task's input and source map, returning its result.
    async fn process(&self, input: String, sources: SourceMap) -> Result<String, ProcessError>;
}

/// Runs claimed tasks through a [`TaskProcessor`].
#[derive(Debug)]
pub struct Worker {
    controller: TaskController,
}

impl Worker {
    /// Creates a worker claiming through `controller`.
    pub fn new(controller: TaskController) -> Self {
        Self { controller }
    }

    /// Returns the underlying controller.
    pub fn controller(&self) -> &TaskController {
        &self.controller
    }

    /// Claims and processes one task.
    ///
    /// On success the result is written and the task marked `done`. On
    /// processor failure the failure is recorded, which re-queues the task
    /// or marks it `dead` after too many failures. Returns `false` if no
    /// task was available.
    ///
    /// # Errors
    ///
    /// Store and codec failures propagate. A processor error is not a
    /// worker error. If one of those failures hits a task this worker has
    /// claimed, the failure is recorded first so the task is not left
    /// allocated to nobody.
    pub async fn run_once(&self, processor: &dyn TaskProcessor) -> Result<bool, TaskError> {
        let Some(mut handle) = self.controller.claim_next_ready_task().await? else {
            return Ok(false);
        };

        let (input, sources) = match Self::prepare(&mut handle).await {
            Ok(payload) => payload,
            Err(err) => return Err(self.release(&mut handle, err).await),
        };

        match processor.process(input, sources).await {
            Ok(result) => {
                if let Err(err) = Self::finish(&mut handle, &result).await {
                    return Err(self.release(&mut handle, err).await);
                }
                tracing::info!(task_key = %handle.key(), "task done");
            },
            Err(err) => {
                tracing::warn!(task_key = %handle.key(), error = %err, "task processing failed");
                handle
                    .record_failure(self.controller.config().max_failures)
                    .await?;
            },
        }
        Ok(true)
    }

    /// Marks a claimed task started and reads its payload.
    async fn prepare(handle: &mut TaskHandle) -> Result<(String, SourceMap), TaskError> {
        handle.set_state(LifecycleState::Started).await?;
        handle.record_progress().await?;

        let key = handle.key().to_string();
        let missing = || TaskError::NotFound { key: key.clone() };
        let input = handle.get_input().await?.ok_or_else(missing)?;
        let sources = handle.get_source().await?.ok_or_else(missing)?;
        Ok((input, sources))
    }

    async fn finish(handle: &mut TaskHandle, result: &str) -> Result<(), TaskError> {
        handle.set_result(result).await?;
        handle.set_state(LifecycleState::Done).await
    }

    /// Records a failure for a task abandoned on `err`, then hands `err`
    /// back.
    async fn release(&self, handle: &mut TaskHandle, err: TaskError) -> TaskError {
        let max_failures = self.controller.config().max_failures;
        if let Err(release_err) = handle.record_failure(max_failures).await {
            tracing::warn!(
                task_key = %handle.key(),
                error = %err,
                release_error = %release_err,
                "claimed task could not be released"
            );
        }
        err
    }

    /// Processes tasks until none is available. Returns how many were
    /// processed.
    pub async fn run_until_idle(&self, processor: &dyn TaskProcessor) -> Result<usize, TaskError> {
        let mut processed = 0;
        while self.run_once(processor).await? {
            processed += 1;
        }
        tracing::info!(
            job_name = %self.controller.job_name(),
            processed,
            "worker idle"
        );
        Ok(processed)
    }
}
