use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 播放时钟 - 用于音视频同步
///
/// 有音频且音频未结束时以音频游标为准；否则以 `start_time` 为锚点的墙钟为准；
/// 暂停时冻结在 `paused_position`。
///
/// 所有字段都是原子量：写入方在各自阶段的互斥锁内写，读取方不加锁。
pub struct PlaybackClock {
    origin: Instant,
    playing: AtomicBool,
    has_audio: AtomicBool,
    audio_finished: AtomicBool,
    video_finished: AtomicBool,
    audio_position: AtomicI64,      // 音频游标（毫秒）
    video_position: AtomicI64,      // 最近绘制帧的位置（毫秒）
    paused_position: AtomicI64,     // 暂停时的位置
    start_time: AtomicI64,          // 墙钟锚点：position = now - start_time
    audio_not_sync: AtomicBool,     // seek 后音频游标尚未对齐
    video_not_sync: AtomicBool,     // seek 后尚未绘制第一帧
}

impl PlaybackClock {
    pub fn new(has_audio: bool) -> Self {
        Self {
            origin: Instant::now(),
            playing: AtomicBool::new(false),
            has_audio: AtomicBool::new(has_audio),
            audio_finished: AtomicBool::new(false),
            video_finished: AtomicBool::new(false),
            audio_position: AtomicI64::new(0),
            video_position: AtomicI64::new(0),
            paused_position: AtomicI64::new(0),
            start_time: AtomicI64::new(0),
            audio_not_sync: AtomicBool::new(false),
            video_not_sync: AtomicBool::new(false),
        }
    }

    /// 单调时钟（毫秒），起点为时钟创建时刻
    pub fn now(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    /// 把本时钟的毫秒时刻换算成 `Instant`
    pub fn instant_at(&self, time_ms: i64) -> Instant {
        self.origin + Duration::from_millis(time_ms.max(0) as u64)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::Acquire)
    }

    pub fn drop_audio(&self) {
        self.has_audio.store(false, Ordering::Release);
    }

    pub fn audio_finished(&self) -> bool {
        self.audio_finished.load(Ordering::Acquire)
    }

    pub fn video_finished(&self) -> bool {
        self.video_finished.load(Ordering::Acquire)
    }

    pub fn set_audio_finished(&self, finished: bool) {
        self.audio_finished.store(finished, Ordering::Release);
    }

    pub fn set_video_finished(&self, finished: bool) {
        self.video_finished.store(finished, Ordering::Release);
    }

    pub fn audio_position(&self) -> i64 {
        self.audio_position.load(Ordering::Relaxed)
    }

    pub fn video_position(&self) -> i64 {
        self.video_position.load(Ordering::Relaxed)
    }

    pub fn set_video_position(&self, position: i64) {
        self.video_position.store(position, Ordering::Relaxed);
    }

    /// 音频游标前进，同时认为音频已对齐
    pub fn set_audio_position(&self, position: i64) {
        self.audio_position.store(position, Ordering::Relaxed);
        self.audio_not_sync.store(false, Ordering::Release);
    }

    pub fn audio_not_sync(&self) -> bool {
        self.audio_not_sync.load(Ordering::Acquire)
    }

    pub fn video_not_sync(&self) -> bool {
        self.video_not_sync.load(Ordering::Acquire)
    }

    /// 第一帧已绘制，返回之前是否处于未对齐状态
    pub fn take_video_not_sync(&self) -> bool {
        self.video_not_sync.swap(false, Ordering::AcqRel)
    }

    fn audio_is_master(&self) -> bool {
        self.has_audio() && !self.audio_finished()
    }

    /// 当前播放位置（毫秒）
    ///
    /// 墙钟模式下，视频已结束且 `may_use_wall_clock` 为假时返回最后一帧的位置。
    pub fn position(&self, may_use_wall_clock: bool) -> i64 {
        if self.audio_is_master() {
            return self.audio_position();
        }
        if self.is_playing() {
            if may_use_wall_clock || !self.video_finished() {
                self.now() - self.start_time.load(Ordering::Relaxed)
            } else {
                self.video_position()
            }
        } else {
            self.paused_position.load(Ordering::Relaxed)
        }
    }

    /// 把墙钟锚定到 `position`
    ///
    /// 非强制调用只在音频未对齐时生效；没有音频可对齐时顺带清除未对齐标记。
    pub fn sync_wall_clock(&self, position: i64, force: bool) {
        if force || self.audio_not_sync() {
            self.start_time.store(self.now() - position, Ordering::Relaxed);
            if !self.audio_is_master() && !force {
                self.audio_not_sync.store(false, Ordering::Release);
            }
        }
    }

    /// 视频落后时推迟墙钟
    pub fn delay_wall_clock(&self, gaining: i64) {
        self.start_time.fetch_add(gaining, Ordering::Relaxed);
    }

    /// 暂停：冻结当前位置
    pub fn pause(&self) {
        self.paused_position.store(self.position(true), Ordering::Relaxed);
        self.playing.store(false, Ordering::Release);
    }

    /// 继续：墙钟从暂停位置重新起算
    pub fn resume(&self) {
        self.sync_wall_clock(self.paused_position.load(Ordering::Relaxed), true);
        self.playing.store(true, Ordering::Release);
    }

    /// seek 后的时钟状态
    pub fn reset_for_seek(&self, position: i64) {
        self.audio_finished.store(false, Ordering::Release);
        self.video_finished.store(false, Ordering::Release);
        self.sync_wall_clock(position, true);
        self.audio_position.store(position, Ordering::Relaxed);
        self.video_position.store(position, Ordering::Relaxed);
        self.paused_position.store(position, Ordering::Relaxed);
        self.audio_not_sync.store(true, Ordering::Release);
        self.video_not_sync.store(true, Ordering::Release);
    }
}

/// 节奏控制的提前唤醒：等待 `wait` 毫秒时提前 clamp(wait/2, 25, 100) 毫秒醒来
pub fn pacing_delay(wait_ms: i64) -> Duration {
    let early = (wait_ms / 2).clamp(25, 100);
    Duration::from_millis((wait_ms - early).max(0) as u64)
}

/// Seek 纪元
///
/// 每次 seek 在持有全部阶段锁、清空队列之后递增。
/// 各阶段出队时在队列锁内取得令牌，令牌过期即丢弃手上的工作。
#[derive(Default)]
pub struct SeekEpoch(AtomicU64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochToken(u64);

impl SeekEpoch {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn token(&self) -> EpochToken {
        EpochToken(self.0.load(Ordering::Acquire))
    }

    pub fn advance(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_stale(&self, token: EpochToken) -> bool {
        self.0.load(Ordering::Acquire) != token.0
    }
}
