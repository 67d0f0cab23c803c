// 播放器核心模块

mod audio_thread;
mod draw_thread;
mod packet_thread;
mod shared;
mod video_thread;

pub mod audio_output;
pub mod codec;
pub mod convert;
pub mod engine;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod session;
pub mod source;
pub mod surface;

pub use audio_output::{AudioFeeder, AudioOutputFactory, AudioSink, SinkError};
#[cfg(feature = "cpal-output")]
pub use audio_output::CpalOutput;
pub use codec::{Demuxer, MediaBackend};
pub use engine::Engine;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use session::Session;
pub use source::{ByteSource, RangeControl, RangedSource};
pub use surface::{MemorySurface, RenderSurface};
