use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 播放引擎参数
///
/// 所有字段都有默认值，JSON 中缺失的字段使用默认值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 音频 packet 队列目标深度
    pub audio_packet_depth: usize,
    /// 视频 packet 队列目标深度
    pub video_packet_depth: usize,
    /// 已解码音频缓冲区个数
    pub audio_ready_buffers: usize,
    /// 视频帧池大小
    pub video_pool_size: usize,
    /// 音频领先视频超过该值（毫秒）时休眠
    pub gaining_threshold_ms: i64,
    /// 绘制帧率上限
    pub max_fps: i64,
    /// 开头静音时长（毫秒）
    pub start_mute_ms: i64,
    /// 结束标记处连续取空的最大重试次数
    pub finish_decode_attempts: usize,
    /// 每种转换方式的计时样本数
    pub conversion_measurements: usize,
    /// 截图最大边长
    pub thumbnail_max_dimension: u32,
    /// 精确 seek（丢弃目标位置之前的帧）
    pub seek_any_frame: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_packet_depth: 20,
            video_packet_depth: 10,
            audio_ready_buffers: 5,
            video_pool_size: 3,
            gaining_threshold_ms: 100,
            max_fps: 60,
            start_mute_ms: 40,
            finish_decode_attempts: 10,
            conversion_measurements: 10,
            thumbnail_max_dimension: 1000,
            seek_any_frame: false,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
