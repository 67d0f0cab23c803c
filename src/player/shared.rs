use crate::core::{
    BlockingQueue, BufferPool, EpochToken, FrameMeta, Packet, PcmFormat, PlaybackClock,
    PlayerConfig, PlayerEvent, PlayerListener, SeekEpoch, VideoFormat,
};
use crate::player::audio_output::AudioSink;
use crate::player::codec::{
    AudioDecoder, AudioStreamParams, Demuxer, MediaBackend, VideoDecoder, VideoStreamParams,
};
use crate::player::convert::ConversionState;
use crate::player::draw_thread::NEVER_DRAWN;
use crate::player::surface::{LastFrame, RenderSurface};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// packet 队列元素：压缩包或流结束标记
pub(crate) enum PacketItem {
    Packet(Packet),
    Finish,
}

/// 当前 seek 纪元内最后一个包的位置，结束标记据此判断解码器是否已排空
#[derive(Debug, Default)]
pub(crate) struct LastPacket {
    token: Option<EpochToken>,
    position: Option<i64>,
}

impl LastPacket {
    pub fn observe(&mut self, token: EpochToken, item: &PacketItem) {
        if self.token != Some(token) {
            self.token = Some(token);
            self.position = None;
        }
        if let PacketItem::Packet(packet) = item {
            self.position = packet.position_ms;
        }
    }

    /// 帧位置已追上最后一个包
    pub fn reached(&self, position: i64) -> bool {
        self.position.is_some_and(|last| position >= last)
    }
}

pub(crate) struct FinishState {
    /// packet 线程已读到文件末尾
    pub packets_finished: bool,
}

/// 已重采样的 PCM
pub(crate) struct AudioBuffer {
    pub data: Vec<u8>,
    pub index: usize,
    /// 缓冲区起点的位置（毫秒），未知为 -1
    pub position: i64,
    /// 每秒字节数
    pub divider: i64,
}

impl AudioBuffer {
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }
}

pub(crate) struct AudioState {
    pub ready: VecDeque<AudioBuffer>,
    pub current: Option<AudioBuffer>,
    /// 输出端饿死过，下一个解码好的缓冲区需要立即对齐游标
    pub need_enqueue: bool,
    pub sink: Option<Box<dyn AudioSink>>,
}

pub(crate) struct DrawState {
    pub surface: Option<Box<dyn RenderSurface>>,
    pub format: Option<VideoFormat>,
    pub last_frame: Option<LastFrame>,
    pub last_draw_times: [i64; 2],
    /// 最近一次设置给表面的尺寸
    pub geometry: (u32, u32),
}

pub(crate) struct VideoQueue {
    pub pool: Option<BufferPool<FrameMeta>>,
    pub format: Option<VideoFormat>,
}

/// 打开后不再变化的媒体信息
pub(crate) struct MediaInfo {
    pub duration_ms: i64,
    pub metadata: Vec<(String, String)>,
    pub video: VideoStreamParams,
    pub audio: Option<AudioStreamParams>,
}

/// 会话内各线程共享的状态
///
/// 锁顺序（seek 时全部持有）：
/// finish → demuxer → flow → audio_decoder → video_decoder → audio → draw → video_queue
pub(crate) struct Shared {
    pub config: PlayerConfig,
    pub seek_any_frame: bool,
    pub interrupted: AtomicBool,
    pub clock: PlaybackClock,
    pub epoch: SeekEpoch,
    pub listener: Arc<dyn PlayerListener>,
    pub backend: Arc<dyn MediaBackend>,
    pub info: MediaInfo,
    pub pcm: OnceLock<PcmFormat>,
    pub conversion: ConversionState,

    pub finish: Mutex<FinishState>,
    pub finish_cond: Condvar,
    pub demuxer: Mutex<Box<dyn Demuxer>>,
    pub flow: Mutex<()>,
    pub flow_cond: Condvar,
    pub audio_decoder: Mutex<Option<Box<dyn AudioDecoder>>>,
    pub video_decoder: Mutex<Box<dyn VideoDecoder>>,
    pub audio: Mutex<AudioState>,
    pub audio_sleep_cond: Condvar,
    pub audio_buffer_cond: Condvar,
    pub draw: Mutex<DrawState>,
    pub draw_sleep_cond: Condvar,
    pub video_queue: Mutex<VideoQueue>,
    pub video_queue_cond: Condvar,

    pub audio_packets: BlockingQueue<PacketItem>,
    pub video_packets: BlockingQueue<PacketItem>,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PlayerConfig,
        seek_any_frame: bool,
        listener: Arc<dyn PlayerListener>,
        backend: Arc<dyn MediaBackend>,
        info: MediaInfo,
        demuxer: Box<dyn Demuxer>,
        audio_decoder: Option<Box<dyn AudioDecoder>>,
        video_decoder: Box<dyn VideoDecoder>,
    ) -> Self {
        let has_audio = audio_decoder.is_some();
        Self {
            config,
            seek_any_frame,
            interrupted: AtomicBool::new(false),
            clock: PlaybackClock::new(has_audio),
            epoch: SeekEpoch::new(),
            listener,
            backend,
            info,
            pcm: OnceLock::new(),
            conversion: ConversionState::new(),
            finish: Mutex::new(FinishState { packets_finished: false }),
            finish_cond: Condvar::new(),
            demuxer: Mutex::new(demuxer),
            flow: Mutex::new(()),
            flow_cond: Condvar::new(),
            audio_decoder: Mutex::new(audio_decoder),
            video_decoder: Mutex::new(video_decoder),
            audio: Mutex::new(AudioState {
                ready: VecDeque::new(),
                current: None,
                need_enqueue: false,
                sink: None,
            }),
            audio_sleep_cond: Condvar::new(),
            audio_buffer_cond: Condvar::new(),
            draw: Mutex::new(DrawState {
                surface: None,
                format: None,
                last_frame: None,
                last_draw_times: NEVER_DRAWN,
                geometry: (0, 0),
            }),
            draw_sleep_cond: Condvar::new(),
            video_queue: Mutex::new(VideoQueue { pool: None, format: None }),
            video_queue_cond: Condvar::new(),
            audio_packets: BlockingQueue::new(),
            video_packets: BlockingQueue::new(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn has_audio(&self) -> bool {
        self.clock.has_audio()
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.listener.on_event(event);
    }

    /// 阻塞直到处于播放状态或会话中断，返回是否可以继续
    pub fn wait_playing(&self) -> bool {
        let mut finish = self.finish.lock();
        while !self.is_interrupted() && !self.clock.is_playing() {
            self.finish_cond.wait(&mut finish);
        }
        !self.is_interrupted()
    }

    pub fn notify_finish(&self) {
        let _finish = self.finish.lock();
        self.finish_cond.notify_all();
    }

    /// 输出端回调使用：拿不到 finish 锁时不等待，直接广播
    pub fn notify_finish_nonblocking(&self) {
        let _finish = self.finish.try_lock();
        self.finish_cond.notify_all();
    }

    pub fn notify_flow(&self) {
        let _flow = self.flow.lock();
        self.flow_cond.notify_all();
    }

    /// 视频帧池和 packet 队列都已空
    pub fn mark_video_finished(&self) {
        let busy = self
            .video_queue
            .lock()
            .pool
            .as_ref()
            .map_or(0, |pool| pool.busy_count());
        if busy == 0 && self.video_packets.is_empty() && !self.clock.video_finished() {
            self.clock.set_video_finished(true);
            self.notify_finish();
        }
    }

    /// 在 `audio` 锁内判断，锁外调用 `notify_finish`
    pub fn audio_drained(&self, audio: &AudioState) -> bool {
        audio.current.is_none() && audio.ready.is_empty() && self.audio_packets.is_empty()
    }

    /// 中断所有线程：先置标志，再在各自的锁内广播
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.audio_packets.interrupt();
        self.video_packets.interrupt();
        {
            let _guard = self.finish.lock();
            self.finish_cond.notify_all();
        }
        {
            let _guard = self.flow.lock();
            self.flow_cond.notify_all();
        }
        {
            let _guard = self.audio.lock();
            self.audio_sleep_cond.notify_all();
            self.audio_buffer_cond.notify_all();
        }
        {
            let _guard = self.draw.lock();
            self.draw_sleep_cond.notify_all();
        }
        {
            let _guard = self.video_queue.lock();
            self.video_queue_cond.notify_all();
        }
    }
}
