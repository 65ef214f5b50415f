//! WorkerBuilder - handler 登録と Worker のワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - tube 名は `register` の時点で検証（`WorkerError::InvalidTube`）
//! - `expect_tubes()` で期待集合を渡すと、`build()` 時に不足を検出
//!   （`WorkerError::MissingHandlers`）
//! - `build()` が登録済み tube を全て watch してから `Worker` を返す

use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::config::{DispositionConfig, WorkerConfig};
use crate::domain::{RetryPredicate, Tube, WorkerError};
use crate::ports::{Connect, ConnectOptions, NoopProbe, QueueClient, ResourceProbe};

use super::dispatcher::Dispatcher;
use super::handler::JobHandler;
use super::registry::HandlerRegistry;
use super::worker::Worker;

/// # 使用例
/// ```ignore
/// let worker = Worker::builder()
///     .register("emails", SendEmail)?
///     .register_with_retry("sms", SendSms, retry_on_kind("timeout"))?
///     .expect_tubes(&["emails", "sms"])
///     .connect::<MyBeanstalkClient>(&ConnectOptions::default())
///     .await?;
/// ```
pub struct WorkerBuilder {
    registry: HandlerRegistry,
    expected_tubes: Option<Vec<String>>,
    disposition: DispositionConfig,
    reserve_timeout: Option<Duration>,
    probe: Arc<dyn ResourceProbe>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            expected_tubes: None,
            disposition: DispositionConfig::default(),
            reserve_timeout: None,
            probe: Arc::new(NoopProbe),
        }
    }

    /// Start from a loaded config (disposition priorities, reserve timeout).
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new()
            .disposition(config.disposition.clone())
            .reserve_timeout(config.reserve_timeout())
    }

    /// Handle jobs from `tube`. Any handler error buries the job.
    pub fn register<H: JobHandler + 'static>(self, tube: &str, handler: H) -> Result<Self, WorkerError> {
        self.insert(tube, Arc::new(handler), None)
    }

    /// Handle jobs from `tube`; errors accepted by `retry` release the job
    /// instead of burying it.
    pub fn register_with_retry<H: JobHandler + 'static>(
        self,
        tube: &str,
        handler: H,
        retry: RetryPredicate,
    ) -> Result<Self, WorkerError> {
        self.insert(tube, Arc::new(handler), Some(retry))
    }

    fn insert(
        mut self,
        tube: &str,
        handler: Arc<dyn JobHandler>,
        retry: Option<RetryPredicate>,
    ) -> Result<Self, WorkerError> {
        let tube = Tube::new(tube)?;
        if self.registry.register(tube.clone(), handler, retry).is_some() {
            tracing::debug!(tube = %tube, "Callback replaced");
        }
        Ok(self)
    }

    pub fn expect_tubes(mut self, tubes: &[&str]) -> Self {
        self.expected_tubes = Some(tubes.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn disposition(mut self, disposition: DispositionConfig) -> Self {
        self.disposition = disposition;
        self
    }

    /// Reserve timeout used by `Worker::run`. `None` blocks until a job arrives.
    pub fn reserve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    pub fn resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Watch every registered tube on `client` and hand back the worker.
    pub async fn build(self, client: Arc<dyn QueueClient>) -> Result<Worker, WorkerError> {
        if let Some(expected) = &self.expected_tubes {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(WorkerError::MissingHandlers(missing));
            }
        }

        let worker_id = Ulid::new();
        for tube in self.registry.tubes() {
            client.watch(&tube).await?;
            tracing::info!(worker_id = %worker_id, tube = %tube, "Callback registered");
        }

        let dispatcher = Dispatcher::new(
            worker_id,
            client,
            self.registry,
            self.disposition,
            self.probe,
        );
        Ok(Worker::new(dispatcher, self.reserve_timeout))
    }

    /// Open a connection with `C` and build on it.
    pub async fn connect<C: Connect + 'static>(self, options: &ConnectOptions) -> Result<Worker, WorkerError> {
        let client = C::connect(options).await?;
        let worker = self.build(Arc::new(client)).await?;
        tracing::info!(worker_id = %worker.id(), addr = %options.addr(), "Worker initiated");
        Ok(worker)
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
