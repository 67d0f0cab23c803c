// 核心数据结构、并发容器和类型定义

pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod types;

pub use buffer_pool::{BufferPool, PoolBuffer};
pub use clock::{pacing_delay, EpochToken, PlaybackClock, SeekEpoch};
pub use config::PlayerConfig;
pub use error::*;
pub use queue::BlockingQueue;
pub use types::*;
