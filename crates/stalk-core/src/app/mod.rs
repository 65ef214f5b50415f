//! App - アプリケーション層
//!
//! ports を組み合わせてワーカーを組み立てる。
//!
//! # 主要コンポーネント
//! - **WorkerBuilder**: handler 登録と起動時検証、tube の watch
//! - **HandlerRegistry**: tube → handler (+ retry predicate)
//! - **Dispatcher**: reserve → resolve → lookup → invoke → dispose
//! - **RunLoop**: Dispatcher のループと shutdown
//! - **WorkerGroup**: 複数ワーカーの spawn / join

pub mod builder;
pub mod dispatcher;
pub mod group;
pub mod handler;
pub mod registry;
pub mod run_loop;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::WorkerBuilder;
pub use self::dispatcher::{Dispatched, Dispatcher, Resolution};
pub use self::group::{total_stats, WorkerGroup, WorkerReport};
pub use self::handler::{handler_fn, FnHandler, JobHandler};
pub use self::registry::{HandlerEntry, HandlerRegistry};
pub use self::run_loop::{RunLoop, RunStats, ShutdownHandle};
pub use self::worker::Worker;
