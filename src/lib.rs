//! myy_engine：多线程音视频播放引擎
//!
//! 一个会话对应四个线程（读包、音频解码、视频解码、绘制），
//! 通过阻塞队列和帧池衔接，以音频游标或墙钟为播放时钟。

pub mod core;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, PlayerEvent, PlayerListener, Result};
pub use crate::player::{Engine, RangedSource, Session};
