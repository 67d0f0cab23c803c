use crate::core::{PcmFormat, PlayerError, Result};
use crate::player::codec::AudioStreamParams;
use crate::player::shared::Shared;
use log::{info, warn};
use std::sync::Weak;
use thiserror::Error;

/// 打开音频输出的失败原因
#[derive(Error, Debug)]
pub enum SinkError {
    /// 设备不支持该格式，可以换一种格式重试
    #[error("音频设备不支持该格式")]
    Unsupported,

    #[error("音频输出错误: {0}")]
    Failed(String),
}

/// 音频输出端
///
/// 输出端在自己的回调线程里调用 `AudioFeeder::fill` 拉取 PCM，
/// `fill` 不会阻塞。
pub trait AudioSink: Send {
    fn open(
        &mut self,
        format: PcmFormat,
        feeder: AudioFeeder,
    ) -> std::result::Result<(), SinkError>;

    fn set_playing(&mut self, playing: bool);

    /// 丢弃设备侧尚未播放的数据
    fn clear(&mut self);
}

pub trait AudioOutputFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioSink>>;
}

/// 音频回调的数据来源
///
/// 只持有会话的弱引用；会话释放后输出静音。
#[derive(Clone)]
pub struct AudioFeeder {
    shared: Weak<Shared>,
}

impl AudioFeeder {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// 不连接任何会话，始终输出静音
    pub fn silent() -> Self {
        Self { shared: Weak::new() }
    }

    /// 用交错 s16（小端）填满 `out`
    pub fn fill(&self, out: &mut [u8]) {
        match self.shared.upgrade() {
            Some(shared) => crate::player::audio_thread::fill_output(&shared, out),
            None => out.fill(0),
        }
    }
}

/// 输出端原生支持的采样率
pub const STANDARD_SAMPLE_RATES: [u32; 13] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 64_000, 88_200, 96_000,
    192_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resample {
    No,
    May48000,
    Force44100,
}

/// 协商输出格式
///
/// 声道数不是 1/2 时强制立体声；非标准采样率先尝试 48 kHz（整倍数时）再退到 44.1 kHz；
/// 设备拒绝原生采样率时按同样顺序回退。
pub(crate) fn negotiate(
    sink: &mut dyn AudioSink,
    params: &AudioStreamParams,
    feeder: &AudioFeeder,
) -> Result<PcmFormat> {
    let channels = if params.channels == 1 { 1 } else { 2 };
    let native = params.sample_rate;
    let mut need = if STANDARD_SAMPLE_RATES.contains(&native) {
        Resample::No
    } else {
        Resample::May48000
    };

    loop {
        let (sample_rate, may_repeat) = match need {
            Resample::May48000 if native % 48_000 == 0 => (48_000, true),
            Resample::May48000 | Resample::Force44100 => (44_100, false),
            Resample::No => (native, true),
        };
        let format = PcmFormat { channels, sample_rate };
        match sink.open(format, feeder.clone()) {
            Ok(()) => {
                info!(
                    "✅ 音频输出: {} Hz, {} 声道（源 {} Hz, {} 声道）",
                    sample_rate, channels, native, params.channels
                );
                return Ok(format);
            }
            Err(SinkError::Unsupported) if may_repeat => {
                warn!("⚠️  音频设备不支持 {} Hz, {} 声道，回退", sample_rate, channels);
                need = match need {
                    Resample::No => Resample::May48000,
                    _ => Resample::Force44100,
                };
            }
            Err(e) => return Err(PlayerError::AudioOutput(e.to_string())),
        }
    }
}

#[cfg(feature = "cpal-output")]
pub use self::cpal_output::{CpalOutput, CpalSink};

#[cfg(feature = "cpal-output")]
mod cpal_output {
    use super::{AudioFeeder, AudioOutputFactory, AudioSink, SinkError};
    use crate::core::{PcmFormat, PlayerError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
    use log::{debug, error, info, warn};

    /// 默认 cpal host 上的音频输出
    pub struct CpalOutput {
        host: cpal::Host,
    }

    // cpal::Host 在部分平台上不是 Send/Sync，但这里只用它查询默认设备
    unsafe impl Send for CpalOutput {}
    unsafe impl Sync for CpalOutput {}

    impl CpalOutput {
        pub fn new() -> Self {
            Self { host: cpal::default_host() }
        }
    }

    impl Default for CpalOutput {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioOutputFactory for CpalOutput {
        fn create(&self) -> Result<Box<dyn AudioSink>> {
            let device = self
                .host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioOutput("无法找到音频输出设备".to_string()))?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());
            Ok(Box::new(CpalSink { device, stream: None }))
        }
    }

    /// 音频输出 - 使用 cpal 播放音频
    pub struct CpalSink {
        device: Device,
        stream: Option<Stream>,
    }

    // cpal::Stream 本身不是 Send，但它只在会话的锁内被访问
    unsafe impl Send for CpalSink {}

    impl CpalSink {
        /// 检查配置是否兼容
        fn is_config_compatible(
            config: &StreamConfig,
            supported: &SupportedStreamConfigRange,
        ) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;

            let channels_match = config.channels == supported.channels();

            rate_in_range && channels_match
        }

        fn sample_format_for(
            &self,
            config: &StreamConfig,
        ) -> std::result::Result<SampleFormat, SinkError> {
            let formats: Vec<SampleFormat> = self
                .device
                .supported_output_configs()
                .map_err(|e| SinkError::Failed(format!("无法获取支持的音频配置: {}", e)))?
                .filter(|supported| Self::is_config_compatible(config, supported))
                .map(|supported| supported.sample_format())
                .collect();

            [SampleFormat::I16, SampleFormat::F32]
                .into_iter()
                .find(|format| formats.contains(format))
                .ok_or(SinkError::Unsupported)
        }
    }

    impl AudioSink for CpalSink {
        fn open(
            &mut self,
            format: PcmFormat,
            feeder: AudioFeeder,
        ) -> std::result::Result<(), SinkError> {
            let config = StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let sample_format = self.sample_format_for(&config)?;

            let on_error = |err| error!("❌ 音频流错误: {}", err);
            let stream = match sample_format {
                SampleFormat::I16 => self.device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        // 小端主机上 s16 字节序与内存布局一致
                        feeder.fill(bytemuck::cast_slice_mut(data));
                    },
                    on_error,
                    None,
                ),
                _ => {
                    let mut scratch: Vec<i16> = Vec::new();
                    self.device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            scratch.resize(data.len(), 0);
                            feeder.fill(bytemuck::cast_slice_mut(&mut scratch));
                            for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                                *out = sample as f32 / 32768.0;
                            }
                        },
                        on_error,
                        None,
                    )
                }
            }
            .map_err(|e| SinkError::Failed(format!("创建音频流失败: {}", e)))?;

            if let Err(e) = stream.pause() {
                debug!("音频流无法暂停（设备可能不支持）: {}", e);
            }
            info!(
                "音频输出已创建: {:?} {} Hz, {} 声道",
                sample_format, format.sample_rate, format.channels
            );
            self.stream = Some(stream);
            Ok(())
        }

        fn set_playing(&mut self, playing: bool) {
            let Some(stream) = &self.stream else {
                return;
            };
            let result = if playing { stream.play() } else { stream.pause() };
            if let Err(e) = result {
                warn!("⚠️  切换音频流状态失败: {}", e);
            }
        }

        fn clear(&mut self) {
            // 回调直接从会话拉取数据，设备侧没有额外队列
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            if self.stream.take().is_some() {
                info!("音频输出已停止");
            }
        }
    }
}
