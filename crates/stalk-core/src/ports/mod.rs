//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。ワーカーが外部に依存する部分
//! （キューサーバー、時刻、プロセス情報）をここで trait として切り出します。

pub mod clock;
pub mod queue_client;
pub mod resource_probe;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::queue_client::{
    ClientError, Connect, ConnectOptions, QueueClient, DEFAULT_PORT, DEFAULT_PRIORITY,
};
pub use self::resource_probe::{NoopProbe, ProcessMemoryProbe, ResourceProbe};
