use crate::core::{Packet, PcmFormat, Result, StreamKind, VideoFormat};
use crate::player::source::ByteSource;
use std::any::Any;

/// 流描述
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    /// 是否存在可用的解码器
    pub decodable: bool,
}

/// Seek 方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// 向后找到最近的关键帧
    Backward,
    /// 向后找到任意帧（用于探测真实时间戳）
    BackwardAny,
}

/// 视频流打开后的参数
#[derive(Debug, Clone, Default)]
pub struct VideoStreamParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub codec_name: String,
    pub pixel_format: String,
}

/// 音频流打开后的参数
#[derive(Debug, Clone, Default)]
pub struct AudioStreamParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub codec_name: String,
}

/// 已打开的音频解码链
pub struct AudioCodecs {
    pub params: AudioStreamParams,
    pub decoder: Box<dyn AudioDecoder>,
    pub resampler: Box<dyn Resampler>,
}

/// 已打开的视频解码器
pub struct VideoCodecs {
    pub params: VideoStreamParams,
    pub decoder: Box<dyn VideoDecoder>,
}

/// Demuxer 数据源抽象接口
///
/// 不同的解码库实现这个接口；会话只通过它读取 packet、seek 和打开解码器。
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek 到指定位置（毫秒）
    fn seek(&mut self, position_ms: i64, mode: SeekMode) -> Result<()>;

    /// 总时长（毫秒），未知为 0
    fn duration_ms(&self) -> i64;

    /// 容器元数据
    fn metadata(&self) -> Vec<(String, String)>;

    fn open_audio(&self, stream_index: usize) -> Result<AudioCodecs>;

    fn open_video(&self, stream_index: usize) -> Result<VideoCodecs>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 解码后的音频帧
pub trait AudioChunk: Send {
    /// 显示位置（毫秒），未知为 None
    fn position_ms(&self) -> Option<i64>;

    fn as_any(&self) -> &dyn Any;
}

pub trait AudioDecoder: Send {
    /// 送入一个 packet 并尝试取出一帧，需要更多数据时返回 Ok(None)
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn AudioChunk>>>;

    /// 流结束后取出解码器内部缓存的帧，没有更多帧时返回 Ok(None)
    fn drain(&mut self) -> Result<Option<Box<dyn AudioChunk>>>;

    fn flush(&mut self);
}

/// 重采样为交错 s16
pub trait Resampler: Send {
    fn resample(&mut self, chunk: &dyn AudioChunk, target: PcmFormat) -> Result<Vec<u8>>;
}

/// 解码后的视频帧
pub trait VideoPicture: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn position_ms(&self) -> Option<i64>;

    /// 是否为平面 YUV420P，可走直接转换
    fn is_yuv420p(&self) -> bool;

    /// 第 `index` 个平面的数据与行跨度（字节）
    fn plane(&self, index: usize) -> (&[u8], usize);

    fn as_any(&self) -> &dyn Any;
}

pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn VideoPicture>>>;

    fn drain(&mut self) -> Result<Option<Box<dyn VideoPicture>>>;

    fn flush(&mut self);
}

/// 输出缓冲区描述：按 `VideoFormat` 的平面布局写入 `data`
pub struct ScaleTarget<'a> {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub data: &'a mut [u8],
}

/// 像素格式转换 / 缩放上下文（按帧尺寸缓存）
pub trait Scaler: Send {
    fn scale(&mut self, picture: &dyn VideoPicture, target: ScaleTarget<'_>) -> Result<()>;
}

/// 解码库后端
pub trait MediaBackend: Send + Sync {
    fn open_demuxer(&self, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>>;

    fn create_scaler(
        &self,
        picture: &dyn VideoPicture,
        format: VideoFormat,
    ) -> Result<Box<dyn Scaler>>;
}

/// 解码一次；单帧的解码错误降级为“无帧”。
pub(crate) fn decode_once<T>(
    kind: StreamKind,
    result: Result<Option<T>>,
) -> Option<T> {
    match result {
        Ok(frame) => frame,
        Err(e) => {
            log::debug!("{:?} 解码失败（已跳过）: {}", kind, e);
            None
        }
    }
}
