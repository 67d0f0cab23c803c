#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver};
use myy_engine::core::{
    Packet, PacketPayload, PcmFormat, PlayerConfig, PlayerError, PlayerEvent, Result, StreamKind,
    VideoFormat,
};
use myy_engine::player::audio_output::{AudioFeeder, AudioOutputFactory, AudioSink, SinkError};
use myy_engine::player::codec::{
    AudioChunk, AudioCodecs, AudioDecoder, AudioStreamParams, Demuxer, MediaBackend, Resampler,
    ScaleTarget, Scaler, SeekMode, StreamInfo, VideoCodecs, VideoDecoder, VideoPicture,
    VideoStreamParams,
};
use myy_engine::player::source::{ByteSource, RangedSource};
use myy_engine::player::{Engine, Session};
use std::any::Any;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const VIDEO_INDEX: usize = 0;
pub const AUDIO_INDEX: usize = 1;

/// 合成媒体的参数
#[derive(Debug, Clone)]
pub struct MockMedia {
    pub has_video: bool,
    pub video_decodable: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    pub video_frames: usize,
    pub frame_interval_ms: i64,
    pub keyframe_interval: usize,
    pub audio_interval_ms: i64,
    pub open_error: Option<i32>,
    /// 视频解码器缓存的帧数，结束时需要 drain 取出
    pub decoder_delay: usize,
    /// 读到文件末尾时的额外耗时
    pub eof_delay_ms: u64,
}

impl Default for MockMedia {
    fn default() -> Self {
        Self {
            has_video: true,
            video_decodable: true,
            has_audio: false,
            width: 16,
            height: 8,
            video_frames: 500,
            frame_interval_ms: 40,
            keyframe_interval: 10,
            audio_interval_ms: 20,
            open_error: None,
            decoder_delay: 0,
            eof_delay_ms: 0,
        }
    }
}

impl MockMedia {
    pub fn duration_ms(&self) -> i64 {
        self.video_frames as i64 * self.frame_interval_ms
    }

    /// 第 `index` 帧的亮度值
    pub fn luma(index: usize) -> u8 {
        16 + (index * 37 % 220) as u8
    }

    fn packets(&self) -> Vec<MockPacket> {
        let mut packets = Vec::new();
        if self.has_video {
            for index in 0..self.video_frames {
                packets.push(MockPacket {
                    stream_index: VIDEO_INDEX,
                    kind: StreamKind::Video,
                    position: index as i64 * self.frame_interval_ms,
                    key: index % self.keyframe_interval == 0,
                    index,
                });
            }
        }
        if self.has_audio {
            let count = (self.duration_ms() / self.audio_interval_ms) as usize;
            for index in 0..count {
                packets.push(MockPacket {
                    stream_index: AUDIO_INDEX,
                    kind: StreamKind::Audio,
                    position: index as i64 * self.audio_interval_ms,
                    key: true,
                    index,
                });
            }
        }
        // 按时间交错，同一时刻视频在前
        packets.sort_by_key(|packet| (packet.position, packet.stream_index));
        packets
    }
}

#[derive(Debug, Clone, Copy)]
struct MockPacket {
    stream_index: usize,
    kind: StreamKind,
    position: i64,
    key: bool,
    index: usize,
}

pub struct MockDemuxer {
    media: MockMedia,
    streams: Vec<StreamInfo>,
    packets: Vec<MockPacket>,
    cursor: usize,
    reads: Arc<AtomicUsize>,
    eof_reads: Arc<AtomicUsize>,
    drained: Arc<AtomicUsize>,
    // 保持字节源存活，与真实后端一致
    _source: Box<dyn ByteSource>,
}

impl Demuxer for MockDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(packet) = self.packets.get(self.cursor).copied() else {
            self.eof_reads.fetch_add(1, Ordering::SeqCst);
            if self.media.eof_delay_ms > 0 {
                thread::sleep(Duration::from_millis(self.media.eof_delay_ms));
            }
            return Ok(None);
        };
        self.cursor += 1;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Packet {
            stream_index: packet.stream_index,
            kind: packet.kind,
            position_ms: Some(packet.position),
            key: packet.key,
            payload: PacketPayload::Bytes((packet.index as u32).to_le_bytes().to_vec()),
        }))
    }

    fn seek(&mut self, position_ms: i64, mode: SeekMode) -> Result<()> {
        let target = match mode {
            SeekMode::Backward => self
                .packets
                .iter()
                .filter(|p| p.stream_index == VIDEO_INDEX && p.key && p.position <= position_ms)
                .map(|p| p.position)
                .max()
                .unwrap_or(0),
            SeekMode::BackwardAny => self
                .packets
                .iter()
                .filter(|p| p.position <= position_ms)
                .map(|p| p.position)
                .max()
                .unwrap_or(0),
        };
        self.cursor = self
            .packets
            .iter()
            .position(|p| p.position >= target)
            .unwrap_or(self.packets.len());
        Ok(())
    }

    fn duration_ms(&self) -> i64 {
        self.media.duration_ms()
    }

    fn metadata(&self) -> Vec<(String, String)> {
        vec![("title".to_string(), "synthetic".to_string())]
    }

    fn open_audio(&self, _stream_index: usize) -> Result<AudioCodecs> {
        Ok(AudioCodecs {
            params: AudioStreamParams {
                channels: 2,
                sample_rate: 48_000,
                codec_name: "mock audio".to_string(),
            },
            decoder: Box::new(MockAudioDecoder),
            resampler: Box::new(MockResampler {
                interval_ms: self.media.audio_interval_ms,
            }),
        })
    }

    fn open_video(&self, _stream_index: usize) -> Result<VideoCodecs> {
        Ok(VideoCodecs {
            params: VideoStreamParams {
                width: self.media.width,
                height: self.media.height,
                frame_rate: 1000.0 / self.media.frame_interval_ms as f64,
                codec_name: "mock video".to_string(),
                pixel_format: "yuv420p".to_string(),
            },
            decoder: Box::new(MockVideoDecoder {
                width: self.media.width,
                height: self.media.height,
                delay: self.media.decoder_delay,
                pending: VecDeque::new(),
                drained: self.drained.clone(),
            }),
        })
    }

    fn description(&self) -> String {
        "Mock Demuxer".to_string()
    }
}

fn packet_index(packet: &Packet) -> Result<usize> {
    let bytes = packet
        .bytes()
        .and_then(|bytes| bytes.get(..4))
        .ok_or_else(|| PlayerError::Decode("bad packet".to_string()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

pub struct TestPicture {
    width: u32,
    height: u32,
    position: Option<i64>,
    planes: [Vec<u8>; 3],
}

impl VideoPicture for TestPicture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn position_ms(&self) -> Option<i64> {
        self.position
    }

    fn is_yuv420p(&self) -> bool {
        true
    }

    fn plane(&self, index: usize) -> (&[u8], usize) {
        let stride = if index == 0 { self.width } else { self.width / 2 };
        (&self.planes[index], stride as usize)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 先缓存 `delay` 帧再输出，和带重排序的真实解码器一样
struct MockVideoDecoder {
    width: u32,
    height: u32,
    delay: usize,
    pending: VecDeque<TestPicture>,
    drained: Arc<AtomicUsize>,
}

impl VideoDecoder for MockVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn VideoPicture>>> {
        let index = packet_index(packet)?;
        let luma = (self.width * self.height) as usize;
        let chroma = luma / 4;
        self.pending.push_back(TestPicture {
            width: self.width,
            height: self.height,
            position: packet.position_ms,
            planes: [vec![MockMedia::luma(index); luma], vec![128; chroma], vec![128; chroma]],
        });
        if self.pending.len() <= self.delay {
            return Ok(None);
        }
        Ok(self
            .pending
            .pop_front()
            .map(|picture| Box::new(picture) as Box<dyn VideoPicture>))
    }

    fn drain(&mut self) -> Result<Option<Box<dyn VideoPicture>>> {
        let Some(picture) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.drained.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(picture)))
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

struct MockChunk {
    position: Option<i64>,
}

impl AudioChunk for MockChunk {
    fn position_ms(&self) -> Option<i64> {
        self.position
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MockAudioDecoder;

impl AudioDecoder for MockAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn AudioChunk>>> {
        Ok(Some(Box::new(MockChunk {
            position: packet.position_ms,
        })))
    }

    fn drain(&mut self) -> Result<Option<Box<dyn AudioChunk>>> {
        Ok(None)
    }

    fn flush(&mut self) {}
}

/// 每个包输出 `interval_ms` 的非零 PCM
struct MockResampler {
    interval_ms: i64,
}

impl Resampler for MockResampler {
    fn resample(&mut self, _chunk: &dyn AudioChunk, target: PcmFormat) -> Result<Vec<u8>> {
        let bytes = (target.byte_rate() * self.interval_ms / 1000) as usize & !1;
        Ok(vec![1; bytes])
    }
}

/// 按目标格式复制平面：YUV 原样拷贝（Y、V、U），RGBA 输出灰度
struct CopyScaler;

impl Scaler for CopyScaler {
    fn scale(&mut self, picture: &dyn VideoPicture, target: ScaleTarget<'_>) -> Result<()> {
        let (w, h) = (target.width as usize, target.height as usize);
        let (y, y_stride) = picture.plane(0);
        match target.format {
            VideoFormat::Yuv420p => {
                let (u, _) = picture.plane(1);
                let (v, _) = picture.plane(2);
                let chroma = (w / 2) * (h / 2);
                for row in 0..h {
                    target.data[row * w..(row + 1) * w]
                        .copy_from_slice(&y[row * y_stride..row * y_stride + w]);
                }
                target.data[w * h..w * h + chroma].copy_from_slice(&v[..chroma]);
                target.data[w * h + chroma..w * h + 2 * chroma].copy_from_slice(&u[..chroma]);
            }
            VideoFormat::Rgba => {
                for row in 0..h {
                    for col in 0..w {
                        let value = y[row * y_stride + col];
                        let i = (row * w + col) * 4;
                        target.data[i..i + 4].copy_from_slice(&[value, value, value, 0xff]);
                    }
                }
            }
            VideoFormat::Rgb565 => target.data.fill(0),
        }
        Ok(())
    }
}

pub struct MockBackend {
    pub media: MockMedia,
    pub reads: Arc<AtomicUsize>,
    /// 读到文件末尾的次数
    pub eof_reads: Arc<AtomicUsize>,
    /// drain 取出的视频帧数
    pub drained: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(media: MockMedia) -> Self {
        Self {
            media,
            reads: Arc::new(AtomicUsize::new(0)),
            eof_reads: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MediaBackend for MockBackend {
    fn open_demuxer(&self, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
        match self.media.open_error {
            Some(2) => return Err(PlayerError::LoadFormat("mock".to_string())),
            Some(4) => return Err(PlayerError::FindStreamInfo("mock".to_string())),
            Some(_) => return Err(PlayerError::LoadIo("mock".to_string())),
            None => {}
        }
        let mut streams = Vec::new();
        if self.media.has_video {
            streams.push(StreamInfo {
                index: VIDEO_INDEX,
                kind: StreamKind::Video,
                decodable: self.media.video_decodable,
            });
        }
        if self.media.has_audio {
            streams.push(StreamInfo {
                index: AUDIO_INDEX,
                kind: StreamKind::Audio,
                decodable: true,
            });
        }
        Ok(Box::new(MockDemuxer {
            media: self.media.clone(),
            streams,
            packets: self.media.packets(),
            cursor: 0,
            reads: self.reads.clone(),
            eof_reads: self.eof_reads.clone(),
            drained: self.drained.clone(),
            _source: source,
        }))
    }

    fn create_scaler(
        &self,
        _picture: &dyn VideoPicture,
        _format: VideoFormat,
    ) -> Result<Box<dyn Scaler>> {
        Ok(Box::new(CopyScaler))
    }
}

/// 没有音频设备
pub struct NoAudio;

impl AudioOutputFactory for NoAudio {
    fn create(&self) -> Result<Box<dyn AudioSink>> {
        Err(PlayerError::AudioOutput("no device".to_string()))
    }
}

/// 模拟实时设备：每 10 ms 从 feeder 拉取 10 ms 的数据
pub struct RealtimeAudio {
    /// 含有声音的拉取缓冲区的总字节数
    pub pulled: Arc<AtomicUsize>,
    /// 非零字节数
    pub audible: Arc<AtomicUsize>,
}

impl RealtimeAudio {
    pub fn new() -> Self {
        Self {
            pulled: Arc::new(AtomicUsize::new(0)),
            audible: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AudioOutputFactory for RealtimeAudio {
    fn create(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(RealtimeSink {
            stop: Arc::new(AtomicBool::new(false)),
            pulled: self.pulled.clone(),
            audible: self.audible.clone(),
            pump: None,
        }))
    }
}

struct RealtimeSink {
    stop: Arc<AtomicBool>,
    pulled: Arc<AtomicUsize>,
    audible: Arc<AtomicUsize>,
    pump: Option<thread::JoinHandle<()>>,
}

impl AudioSink for RealtimeSink {
    fn open(
        &mut self,
        format: PcmFormat,
        feeder: AudioFeeder,
    ) -> std::result::Result<(), SinkError> {
        let stop = self.stop.clone();
        let pulled = self.pulled.clone();
        let audible = self.audible.clone();
        let mut buffer = vec![0u8; (format.byte_rate() / 100) as usize];
        self.pump = Some(thread::spawn(move || {
            let started = Instant::now();
            let mut ticks: u32 = 0;
            while !stop.load(Ordering::SeqCst) {
                ticks += 1;
                let deadline = started + Duration::from_millis(10) * ticks;
                if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
                feeder.fill(&mut buffer);
                let nonzero = buffer.iter().filter(|&&b| b != 0).count();
                if nonzero > 0 {
                    audible.fetch_add(nonzero, Ordering::SeqCst);
                    pulled.fetch_add(buffer.len(), Ordering::SeqCst);
                }
            }
        }));
        Ok(())
    }

    fn set_playing(&mut self, _playing: bool) {}

    fn clear(&mut self) {}
}

impl Drop for RealtimeSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

pub struct Harness {
    pub session: Session,
    pub events: Receiver<PlayerEvent>,
    pub reads: Arc<AtomicUsize>,
    pub eof_reads: Arc<AtomicUsize>,
    pub drained: Arc<AtomicUsize>,
}

pub fn open_with(
    media: MockMedia,
    audio: Arc<dyn AudioOutputFactory>,
    config: PlayerConfig,
) -> Harness {
    let backend = MockBackend::new(media);
    let reads = backend.reads.clone();
    let eof_reads = backend.eof_reads.clone();
    let drained = backend.drained.clone();
    let engine = Engine::with_backend(Arc::new(backend), audio, config);
    let (tx, events) = unbounded();
    let source = RangedSource::complete(Cursor::new(vec![0u8; 64]), 64);
    let session = engine.open(source, Arc::new(tx), None);
    Harness {
        session,
        events,
        reads,
        eof_reads,
        drained,
    }
}

pub fn open_video_only(media: MockMedia) -> Harness {
    open_with(media, Arc::new(NoAudio), PlayerConfig::default())
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// 等待满足条件的事件，返回它之前是否等到
pub fn wait_event(events: &Receiver<PlayerEvent>, timeout: Duration, wanted: PlayerEvent) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        match events.recv_timeout(left) {
            Ok(event) if event == wanted => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
