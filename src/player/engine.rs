use crate::core::{PlayerConfig, PlayerListener};
use crate::player::audio_output::AudioOutputFactory;
use crate::player::codec::MediaBackend;
use crate::player::session::{OpenParams, Session};
use crate::player::source::RangedSource;
use log::info;
use std::io::{Read, Seek};
use std::sync::Arc;

/// 播放引擎：持有解码后端、音频输出工厂和配置，负责创建会话
///
/// 同一个引擎可以同时打开多个会话，会话之间不共享状态。
#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn MediaBackend>,
    audio_output: Arc<dyn AudioOutputFactory>,
    config: PlayerConfig,
}

impl Engine {
    /// FFmpeg 解码 + cpal 默认输出设备
    #[cfg(all(feature = "ffmpeg", feature = "cpal-output"))]
    pub fn new(config: PlayerConfig) -> crate::core::Result<Self> {
        let backend = crate::player::ffmpeg::FfmpegBackend::init()?;
        Ok(Self::with_backend(
            Arc::new(backend),
            Arc::new(crate::player::audio_output::CpalOutput::new()),
            config,
        ))
    }

    pub fn with_backend(
        backend: Arc<dyn MediaBackend>,
        audio_output: Arc<dyn AudioOutputFactory>,
        config: PlayerConfig,
    ) -> Self {
        info!("🎮 创建播放引擎: {:?}", config);
        Self {
            backend,
            audio_output,
            config,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// 打开一个会话；`seek_any_frame` 为 None 时使用配置中的值
    ///
    /// 打开失败也会返回会话，用 `Session::error_code` 查询。
    pub fn open<R>(
        &self,
        source: RangedSource<R>,
        listener: Arc<dyn PlayerListener>,
        seek_any_frame: Option<bool>,
    ) -> Session
    where
        R: Read + Seek + Send + 'static,
    {
        let range = source.control();
        let params = OpenParams {
            config: self.config.clone(),
            seek_any_frame: seek_any_frame.unwrap_or(self.config.seek_any_frame),
            backend: self.backend.clone(),
            audio_output: self.audio_output.clone(),
            listener,
        };
        Session::open(params, Box::new(source), range)
    }
}
