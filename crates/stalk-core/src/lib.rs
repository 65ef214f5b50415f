//! stalk-core
//!
//! Consumer runtime for beanstalkd-style work queues: register a handler per
//! tube, and the worker reserves jobs, runs the matching handler and answers
//! every job with exactly one of delete / release / bury.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（tube, job, outcome, decision, state, errors）
//! - **ports**: 抽象化レイヤー（QueueClient, Clock, ResourceProbe）
//! - **app**: アプリケーションロジック（builder, registry, dispatcher, run_loop, group）
//! - **impls**: 実装（InMemoryQueue など開発用）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{handler_fn, JobHandler, RunStats, ShutdownHandle, Worker, WorkerBuilder, WorkerGroup};
pub use crate::config::{ConfigError, WorkerConfig};
pub use crate::domain::{
    retry_always, retry_on_kind, Job, JobError, JobId, RetryPredicate, Tube, WorkerError,
};
pub use crate::ports::{ClientError, Connect, ConnectOptions, QueueClient};
