//! JobHandler - application code bound to a tube.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::{Job, JobError};

/// Handles jobs reserved from one tube.
///
/// # 使用例
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl JobHandler for SendEmail {
///     async fn handle(&self, job: &Job) -> Result<(), JobError> {
///         let body = job.body_str().ok_or_else(|| JobError::new("validation", "not utf-8"))?;
///         smtp::send(body).await.map_err(|e| JobError::from_source("timeout", e))
///     }
/// }
/// ```
///
/// `Ok(())` deletes the job. An error is classified by the tube's retry
/// predicate: matched errors release the job, everything else buries it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Adapter turning an async closure into a `JobHandler`.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a handler. The closure receives an owned copy of the job.
///
/// ```ignore
/// builder.register("emails", handler_fn(|job: Job| async move {
///     println!("{:?}", job.body_str());
///     Ok(())
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}
