use serde::{Deserialize, Serialize};

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// 压缩数据
pub enum PacketPayload {
    Bytes(Vec<u8>),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(ffmpeg_next::Packet),
}

impl Clone for PacketPayload {
    fn clone(&self) -> Self {
        match self {
            PacketPayload::Bytes(bytes) => PacketPayload::Bytes(bytes.clone()),
            #[cfg(feature = "ffmpeg")]
            PacketPayload::Ffmpeg(packet) => PacketPayload::Ffmpeg(packet.clone()),
        }
    }
}

/// 媒体包（可跨线程传递）
#[derive(Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub kind: StreamKind,
    /// 显示时间戳（毫秒），未知为 None
    pub position_ms: Option<i64>,
    pub key: bool,
    pub payload: PacketPayload,
}

impl Packet {
    pub fn size(&self) -> usize {
        match &self.payload {
            PacketPayload::Bytes(bytes) => bytes.len(),
            #[cfg(feature = "ffmpeg")]
            PacketPayload::Ffmpeg(packet) => packet.size(),
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            PacketPayload::Bytes(bytes) => Some(bytes),
            #[cfg(feature = "ffmpeg")]
            PacketPayload::Ffmpeg(packet) => packet.data(),
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("kind", &self.kind)
            .field("position_ms", &self.position_ms)
            .field("key", &self.key)
            .field("size", &self.size())
            .finish()
    }
}

/// 宿主事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// 音视频都已播放完毕（每轮播放一次）
    PlaybackComplete,
    /// 绘制尺寸变化
    SizeChanged { width: u32, height: u32 },
    /// 开始 seek
    SeekStarted,
    /// seek 后第一帧已绘制
    SeekEnded,
    /// 读取位置不在已提供的字节范围内
    DataRequest { offset: u64 },
}

/// 宿主事件接收方
///
/// 在引擎线程中调用，部分事件发出时引擎持有内部锁：
/// 回调应尽快返回，不要在回调里调用会话的控制方法。
pub trait PlayerListener: Send + Sync {
    fn on_event(&self, event: PlayerEvent);
}

impl PlayerListener for crossbeam_channel::Sender<PlayerEvent> {
    fn on_event(&self, event: PlayerEvent) {
        // 接收端已关闭时丢弃
        let _ = self.send(event);
    }
}

/// 不关心事件时使用
pub struct NullListener;

impl PlayerListener for NullListener {
    fn on_event(&self, _event: PlayerEvent) {}
}

/// 渲染表面像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceFormat {
    Rgba8888,
    Rgbx8888,
    Rgb565,
    Yv12,
    Other(u32),
}

impl SurfaceFormat {
    /// 对应的解码输出格式，不支持的表面格式返回 None
    pub fn video_format(self) -> Option<VideoFormat> {
        match self {
            SurfaceFormat::Rgba8888 | SurfaceFormat::Rgbx8888 => Some(VideoFormat::Rgba),
            SurfaceFormat::Rgb565 => Some(VideoFormat::Rgb565),
            SurfaceFormat::Yv12 => Some(VideoFormat::Yuv420p),
            SurfaceFormat::Other(_) => None,
        }
    }

    pub fn name(self) -> String {
        match self {
            SurfaceFormat::Rgba8888 => "RGBA_8888".to_string(),
            SurfaceFormat::Rgbx8888 => "RGBX_8888".to_string(),
            SurfaceFormat::Rgb565 => "RGB_565".to_string(),
            SurfaceFormat::Yv12 => "YV12".to_string(),
            SurfaceFormat::Other(code) => format!("Unknown ({})", code),
        }
    }
}

/// 解码帧的输出像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    Rgba,
    Rgb565,
    /// 平面 YUV 4:2:0，平面顺序 Y、V、U（YV12 布局）
    Yuv420p,
}

impl VideoFormat {
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            VideoFormat::Rgba => pixels * 4,
            VideoFormat::Rgb565 => pixels * 2,
            VideoFormat::Yuv420p => pixels * 3 / 2,
        }
    }

    /// 打包格式的每像素字节数；平面格式返回亮度平面的 1
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            VideoFormat::Rgba => 4,
            VideoFormat::Rgb565 => 2,
            VideoFormat::Yuv420p => 1,
        }
    }
}

/// 协商后的 PCM 输出格式（交错 s16）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmFormat {
    /// 每秒字节数
    pub fn byte_rate(&self) -> i64 {
        2 * self.channels as i64 * self.sample_rate as i64
    }
}

/// 帧池中每个缓冲区附带的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    /// 显示位置（毫秒），未知为 -1
    pub position: i64,
}

/// YUV420P → RGBA 转换方式（运行时计时选择）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMethod {
    Unknown,
    Direct,
    Scaler,
}

impl ConversionMethod {
    pub fn label(self) -> &'static str {
        match self {
            ConversionMethod::Unknown => "Unknown",
            ConversionMethod::Direct => "yuv-direct",
            ConversionMethod::Scaler => "swscale",
        }
    }
}

/// 会话概要
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// 截图（打包 ARGB，0xAARRGGBB）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl Thumbnail {
    /// 按 RGBA 字节顺序展开，供图像编码使用
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&argb| {
                let [a, r, g, b] = argb.to_be_bytes();
                [r, g, b, a]
            })
            .collect()
    }
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,

    /// 待绘制视频帧数
    pub video_frames: usize,

    /// 待播放音频缓冲区数
    pub audio_buffers: usize,
}
