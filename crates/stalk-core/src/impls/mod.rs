//! Impls - ports の実装（開発用・テスト用）
//!
//! 本番の beanstalkd クライアントは別クレートで `QueueClient` を実装します。

pub mod memory;

pub use self::memory::{Command, InMemoryQueue, InMemoryServer, TubeCounts, JOURNAL_LIMIT};
