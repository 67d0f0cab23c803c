//! FFmpeg 后端：自定义 AVIO 解封装、send/receive 解码、swresample 与 swscale

use crate::core::{Packet, PacketPayload, PcmFormat, PlayerError, Result, StreamKind, VideoFormat};
use crate::player::codec::{
    AudioChunk, AudioCodecs, AudioDecoder, AudioStreamParams, Demuxer, MediaBackend, Resampler,
    ScaleTarget, Scaler, SeekMode, StreamInfo, VideoCodecs, VideoDecoder, VideoPicture,
    VideoStreamParams,
};
use crate::player::source::ByteSource;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, media, software, util};
use log::{debug, info};
use std::any::Any;
use std::ffi::{c_int, c_void};
use std::io::{self, SeekFrom};
use std::ptr;
use std::slice;

const IO_BUFFER_SIZE: usize = 32 * 1024;
const AVSEEK_SIZE: c_int = 0x10000;
const AVSEEK_FORCE: c_int = 0x20000;

fn time_base_of(rational: util::rational::Rational) -> f64 {
    if rational.denominator() == 0 {
        0.0
    } else {
        rational.numerator() as f64 / rational.denominator() as f64
    }
}

fn to_ms(timestamp: i64, time_base: f64) -> i64 {
    (timestamp as f64 * time_base * 1000.0) as i64
}

unsafe extern "C" fn read_callback(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let source = &mut *(opaque as *mut Box<dyn ByteSource>);
    let out = slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match source.read(out) {
        Ok(0) => c_int::from(ffmpeg::Error::Eof),
        Ok(read) => read as c_int,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => c_int::from(ffmpeg::Error::Exit),
        Err(e) => {
            debug!("数据源读取失败: {}", e);
            c_int::from(ffmpeg::Error::External)
        }
    }
}

unsafe extern "C" fn seek_callback(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let source = &mut *(opaque as *mut Box<dyn ByteSource>);
    if whence & AVSEEK_SIZE != 0 {
        return source.size().map_or(-1, |size| size as i64);
    }
    let pos = match whence & !AVSEEK_FORCE {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match source.seek(pos) {
        Ok(position) => position as i64,
        Err(_) => -1,
    }
}

/// 自定义 AVIO 上下文，持有字节源
struct CustomIo {
    context: *mut ffi::AVIOContext,
    opaque: *mut Box<dyn ByteSource>,
}

impl CustomIo {
    fn new(source: Box<dyn ByteSource>) -> Result<Self> {
        let opaque = Box::into_raw(Box::new(source));
        unsafe {
            let buffer = ffi::av_malloc(IO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(opaque));
                return Err(PlayerError::LoadIo("无法分配 IO 缓冲区".to_string()));
            }
            let context = ffi::avio_alloc_context(
                buffer,
                IO_BUFFER_SIZE as c_int,
                0,
                opaque as *mut c_void,
                Some(read_callback),
                None,
                Some(seek_callback),
            );
            if context.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::LoadIo("无法创建 IO 上下文".to_string()));
            }
            Ok(Self { context, opaque })
        }
    }
}

impl Drop for CustomIo {
    fn drop(&mut self) {
        unsafe {
            if !self.context.is_null() {
                // 缓冲区可能已被 avio 替换，按上下文当前持有的释放
                ffi::av_freep(ptr::addr_of_mut!((*self.context).buffer) as *mut c_void);
                ffi::avio_context_free(&mut self.context);
            }
            drop(Box::from_raw(self.opaque));
        }
    }
}

/// FFmpeg 解封装器
///
/// 字段顺序决定释放顺序：先关闭输入，再释放自定义 IO。
pub struct FfmpegDemuxer {
    input: format::context::Input,
    _io: CustomIo,
    streams: Vec<StreamInfo>,
    time_bases: Vec<f64>,
}

// 只在持有会话的 demuxer 锁时访问
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(source: Box<dyn ByteSource>) -> Result<Self> {
        let io = CustomIo::new(source)?;
        let input = unsafe {
            let mut context = ffi::avformat_alloc_context();
            if context.is_null() {
                return Err(PlayerError::LoadIo("无法创建格式上下文".to_string()));
            }
            (*context).pb = io.context;
            (*context).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;
            // 失败时 avformat_open_input 会释放 context
            let ret = ffi::avformat_open_input(
                &mut context,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if ret < 0 {
                return Err(PlayerError::LoadFormat(ffmpeg::Error::from(ret).to_string()));
            }
            let ret = ffi::avformat_find_stream_info(context, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut context);
                return Err(PlayerError::FindStreamInfo(ffmpeg::Error::from(ret).to_string()));
            }
            format::context::Input::wrap(context)
        };

        let mut streams = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            let parameters = stream.parameters();
            let kind = match parameters.medium() {
                media::Type::Video => StreamKind::Video,
                media::Type::Audio => StreamKind::Audio,
                _ => StreamKind::Other,
            };
            streams.push(StreamInfo {
                index: stream.index(),
                kind,
                decodable: codec::decoder::find(parameters.id()).is_some(),
            });
            time_bases.push(time_base_of(stream.time_base()));
        }
        info!("✅ 容器格式: {}（{} 个流）", input.format().description(), streams.len());

        Ok(Self {
            input,
            _io: io,
            streams,
            time_bases,
        })
    }

    fn time_base(&self, index: usize) -> f64 {
        self.time_bases.get(index).copied().unwrap_or(0.0)
    }

    fn decoder_context(&self, index: usize) -> Result<codec::context::Context> {
        let stream = self
            .input
            .stream(index)
            .ok_or_else(|| PlayerError::OpenCodec(format!("流 #{} 不存在", index)))?;
        codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PlayerError::OpenCodec(e.to_string()))
    }
}

fn codec_long_name(context: &codec::context::Context) -> String {
    codec::decoder::find(context.id())
        .map_or_else(|| "Unknown".to_string(), |codec| codec.description().to_string())
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let stream_index = packet.stream();
        let kind = self
            .streams
            .get(stream_index)
            .map_or(StreamKind::Other, |stream| stream.kind);
        let time_base = self.time_base(stream_index);
        Ok(Some(Packet {
            stream_index,
            kind,
            position_ms: packet.pts().map(|pts| to_ms(pts, time_base)),
            key: packet.is_key(),
            payload: PacketPayload::Ffmpeg(packet),
        }))
    }

    fn seek(&mut self, position_ms: i64, mode: SeekMode) -> Result<()> {
        let mut flags = ffi::AVSEEK_FLAG_BACKWARD as c_int;
        if mode == SeekMode::BackwardAny {
            flags |= ffi::AVSEEK_FLAG_ANY as c_int;
        }
        let ret =
            unsafe { ffi::av_seek_frame(self.input.as_mut_ptr(), -1, position_ms * 1000, flags) };
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret).into());
        }
        Ok(())
    }

    fn duration_ms(&self) -> i64 {
        (self.input.duration() / 1000).max(0)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.input
            .metadata()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn open_audio(&self, stream_index: usize) -> Result<AudioCodecs> {
        let context = self.decoder_context(stream_index)?;
        let codec_name = codec_long_name(&context);
        let decoder = context.decoder().audio().map_err(|e| PlayerError::OpenCodec(e.to_string()))?;
        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        let params = AudioStreamParams {
            channels: decoder.channels(),
            sample_rate: decoder.rate(),
            codec_name,
        };
        Ok(AudioCodecs {
            params,
            decoder: Box::new(FfmpegAudioDecoder {
                decoder,
                time_base: self.time_base(stream_index),
                draining: false,
            }),
            resampler: Box::new(FfmpegResampler { context: None }),
        })
    }

    fn open_video(&self, stream_index: usize) -> Result<VideoCodecs> {
        let context = self.decoder_context(stream_index)?;
        let codec_name = codec_long_name(&context);
        let decoder = context.decoder().video().map_err(|e| PlayerError::OpenCodec(e.to_string()))?;
        let frame_rate = self
            .input
            .stream(stream_index)
            .map_or(0.0, |stream| time_base_of(stream.rate()));
        let pixel_format = decoder
            .format()
            .descriptor()
            .map_or_else(|| "Unknown".to_string(), |descriptor| descriptor.name().to_string());
        let params = VideoStreamParams {
            width: decoder.width(),
            height: decoder.height(),
            frame_rate,
            codec_name,
            pixel_format,
        };
        Ok(VideoCodecs {
            params,
            decoder: Box::new(FfmpegVideoDecoder {
                decoder,
                time_base: self.time_base(stream_index),
                draining: false,
            }),
        })
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.input.format().name())
    }
}

fn ffmpeg_packet(packet: &Packet) -> Result<&ffmpeg::Packet> {
    match &packet.payload {
        PacketPayload::Ffmpeg(packet) => Ok(packet),
        PacketPayload::Bytes(_) => Err(PlayerError::Decode("不是 FFmpeg 数据包".to_string())),
    }
}

/// 送入数据包；解码器已满（EAGAIN）时本包丢弃
fn send(decoder: &mut codec::decoder::Opened, packet: &ffmpeg::Packet) -> Result<()> {
    match decoder.send_packet(packet) {
        Ok(()) => Ok(()),
        Err(ffmpeg::Error::Other { errno: 11 }) => Ok(()), // EAGAIN
        Err(ffmpeg::Error::Eof) => {
            debug!("解码器收到 EOF（send_packet），执行 flush");
            decoder.flush();
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// 解码后的视频帧
pub struct FfmpegPicture {
    frame: util::frame::Video,
    position_ms: Option<i64>,
}

impl VideoPicture for FfmpegPicture {
    fn width(&self) -> u32 {
        self.frame.width()
    }

    fn height(&self) -> u32 {
        self.frame.height()
    }

    fn position_ms(&self) -> Option<i64> {
        self.position_ms
    }

    fn is_yuv420p(&self) -> bool {
        self.frame.format() == util::format::Pixel::YUV420P
    }

    fn plane(&self, index: usize) -> (&[u8], usize) {
        (self.frame.data(index), self.frame.stride(index))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
    time_base: f64,
    draining: bool,
}

impl FfmpegVideoDecoder {
    fn receive(&mut self) -> Result<Option<Box<dyn VideoPicture>>> {
        let mut frame = util::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let position_ms = frame.timestamp().map(|ts| to_ms(ts, self.time_base));
                Ok(Some(Box::new(FfmpegPicture { frame, position_ms })))
            }
            Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn VideoPicture>>> {
        send(&mut self.decoder, ffmpeg_packet(packet)?)?;
        self.receive()
    }

    fn drain(&mut self) -> Result<Option<Box<dyn VideoPicture>>> {
        if !self.draining {
            self.draining = true;
            let _ = self.decoder.send_eof();
        }
        self.receive()
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.draining = false;
    }
}

/// 解码后的音频帧
pub struct FfmpegAudioChunk {
    frame: util::frame::Audio,
    position_ms: Option<i64>,
}

impl AudioChunk for FfmpegAudioChunk {
    fn position_ms(&self) -> Option<i64> {
        self.position_ms
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
    time_base: f64,
    draining: bool,
}

impl FfmpegAudioDecoder {
    fn receive(&mut self) -> Result<Option<Box<dyn AudioChunk>>> {
        let mut frame = util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let position_ms = frame.timestamp().map(|ts| to_ms(ts, self.time_base));
                Ok(Some(Box::new(FfmpegAudioChunk { frame, position_ms })))
            }
            Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Box<dyn AudioChunk>>> {
        send(&mut self.decoder, ffmpeg_packet(packet)?)?;
        self.receive()
    }

    fn drain(&mut self) -> Result<Option<Box<dyn AudioChunk>>> {
        if !self.draining {
            self.draining = true;
            let _ = self.decoder.send_eof();
        }
        self.receive()
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.draining = false;
    }
}

#[derive(Clone, Copy, PartialEq)]
struct ResampleKey {
    format: util::format::Sample,
    layout: util::channel_layout::ChannelLayout,
    rate: u32,
    target: PcmFormat,
}

/// 重采样为交错 s16，上下文按输入参数缓存
pub struct FfmpegResampler {
    context: Option<(ResampleKey, software::resampling::Context)>,
}

// SwrContext 本身不是 Send，但只在音频解码线程中使用
unsafe impl Send for FfmpegResampler {}

impl Resampler for FfmpegResampler {
    fn resample(&mut self, chunk: &dyn AudioChunk, target: PcmFormat) -> Result<Vec<u8>> {
        let frame = &chunk
            .as_any()
            .downcast_ref::<FfmpegAudioChunk>()
            .ok_or_else(|| PlayerError::Convert("不是 FFmpeg 音频帧".to_string()))?
            .frame;

        let mut layout = frame.channel_layout();
        if layout.is_empty() {
            layout = util::channel_layout::ChannelLayout::default(frame.channels() as i32);
        }
        let key = ResampleKey {
            format: frame.format(),
            layout,
            rate: frame.rate(),
            target,
        };
        if self.context.as_ref().map_or(true, |(cached, _)| *cached != key) {
            let target_layout = if target.channels == 1 {
                util::channel_layout::ChannelLayout::MONO
            } else {
                util::channel_layout::ChannelLayout::STEREO
            };
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                key.rate,
                frame.channels(),
                target.sample_rate,
                target.channels
            );
            let context = software::resampling::Context::get(
                key.format,
                layout,
                key.rate,
                util::format::Sample::I16(util::format::sample::Type::Packed),
                target_layout,
                target.sample_rate,
            )?;
            self.context = Some((key, context));
        }
        let Some((_, context)) = self.context.as_mut() else {
            return Err(PlayerError::Convert("重采样器不可用".to_string()));
        };

        let mut resampled = util::frame::Audio::empty();
        context.run(frame, &mut resampled)?;
        let bytes = resampled.samples() * target.channels as usize * 2;
        let data = resampled.data(0);
        Ok(data[..bytes.min(data.len())].to_vec())
    }
}

/// swscale 转换到目标格式，再按连续布局拷贝
pub struct FfmpegScaler {
    context: software::scaling::Context,
    output: util::frame::Video,
}

// SwsContext 本身不是 Send，但每个实例只在视频解码线程中使用
unsafe impl Send for FfmpegScaler {}

fn copy_plane(
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: usize,
    dst: &mut [u8],
) -> Result<()> {
    for row in 0..rows {
        let from = src
            .get(row * src_stride..row * src_stride + row_bytes)
            .ok_or_else(|| PlayerError::Convert("源平面数据不足".to_string()))?;
        dst.get_mut(row * row_bytes..(row + 1) * row_bytes)
            .ok_or_else(|| PlayerError::Convert("目标缓冲区过小".to_string()))?
            .copy_from_slice(from);
    }
    Ok(())
}

impl Scaler for FfmpegScaler {
    fn scale(&mut self, picture: &dyn VideoPicture, target: ScaleTarget<'_>) -> Result<()> {
        let frame = &picture
            .as_any()
            .downcast_ref::<FfmpegPicture>()
            .ok_or_else(|| PlayerError::Convert("不是 FFmpeg 视频帧".to_string()))?
            .frame;
        self.context.run(frame, &mut self.output)?;

        let (w, h) = (target.width as usize, target.height as usize);
        match target.format {
            VideoFormat::Rgba | VideoFormat::Rgb565 => {
                let bpp = target.format.bytes_per_pixel();
                copy_plane(self.output.data(0), self.output.stride(0), w * bpp, h, target.data)
            }
            VideoFormat::Yuv420p => {
                let luma = w * h;
                let chroma = (w / 2) * (h / 2);
                if target.data.len() < luma + 2 * chroma {
                    return Err(PlayerError::Convert("目标缓冲区过小".to_string()));
                }
                let (y, rest) = target.data.split_at_mut(luma);
                let (v, u) = rest.split_at_mut(chroma);
                copy_plane(self.output.data(0), self.output.stride(0), w, h, y)?;
                copy_plane(self.output.data(2), self.output.stride(2), w / 2, h / 2, v)?;
                copy_plane(self.output.data(1), self.output.stride(1), w / 2, h / 2, u)
            }
        }
    }
}

/// FFmpeg 解码后端
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// 初始化 FFmpeg（可重复调用）
    pub fn init() -> Result<Self> {
        ffmpeg::init()?;
        info!("✅ FFmpeg 初始化成功");
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_demuxer(&self, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(FfmpegDemuxer::open(source)?))
    }

    fn create_scaler(
        &self,
        picture: &dyn VideoPicture,
        format: VideoFormat,
    ) -> Result<Box<dyn Scaler>> {
        let frame = &picture
            .as_any()
            .downcast_ref::<FfmpegPicture>()
            .ok_or_else(|| PlayerError::Convert("不是 FFmpeg 视频帧".to_string()))?
            .frame;
        let target = match format {
            VideoFormat::Rgba => util::format::Pixel::RGBA,
            VideoFormat::Rgb565 => util::format::Pixel::RGB565LE,
            VideoFormat::Yuv420p => util::format::Pixel::YUV420P,
        };
        debug!(
            "创建 swscale 上下文: {:?} {}x{} → {:?}",
            frame.format(),
            frame.width(),
            frame.height(),
            target
        );
        let context = software::scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            target,
            frame.width(),
            frame.height(),
            software::scaling::Flags::FAST_BILINEAR,
        )?;
        Ok(Box::new(FfmpegScaler {
            context,
            output: util::frame::Video::empty(),
        }))
    }
}
