use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("无法读取数据源: {0}")]
    LoadIo(String),

    #[error("无法识别的容器格式: {0}")]
    LoadFormat(String),

    #[error("无法启动工作线程: {0}")]
    StartThread(String),

    #[error("无法读取流信息: {0}")]
    FindStreamInfo(String),

    #[error("无法找到视频流")]
    FindStream,

    #[error("无法找到视频解码器")]
    FindCodec,

    #[error("无法打开解码器: {0}")]
    OpenCodec(String),

    #[error("音频输出错误: {0}")]
    AudioOutput(String),

    #[error("解码错误: {0}")]
    Decode(String),

    #[error("格式转换错误: {0}")]
    Convert(String),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpeg(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Config(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 打开阶段的致命错误码（宿主侧约定），其余错误为 0
    pub fn code(&self) -> i32 {
        match self {
            PlayerError::LoadIo(_) => 1,
            PlayerError::LoadFormat(_) => 2,
            PlayerError::StartThread(_) => 3,
            PlayerError::FindStreamInfo(_) => 4,
            PlayerError::FindStream => 5,
            PlayerError::FindCodec => 6,
            PlayerError::OpenCodec(_) => 7,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
