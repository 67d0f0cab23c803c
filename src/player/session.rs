use crate::core::{
    BufferPool, BufferStatus, ConversionMethod, PlayerConfig, PlayerError, PlayerEvent,
    PlayerListener, Result, StreamKind, Summary, Thumbnail,
};
use crate::player::audio_output::{negotiate, AudioFeeder, AudioOutputFactory};
use crate::player::codec::{Demuxer, MediaBackend, SeekMode};
use crate::player::convert::thumbnail;
use crate::player::draw_thread::{self, NEVER_DRAWN};
use crate::player::shared::{log_ctx, MediaInfo, Shared};
use crate::player::source::{ByteSource, RangeControl};
use crate::player::surface::{LastFrame, RenderSurface};
use crate::player::{audio_thread, packet_thread, video_thread};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 一次播放会话
///
/// 打开失败时会话仍然存在，通过 `error()` / `error_code()` 查询原因，其他查询返回默认值。
/// 释放时中断并等待所有线程退出。
pub struct Session {
    inner: Option<Arc<Shared>>,
    range: Arc<RangeControl>,
    audio_index: Option<usize>,
    video_index: usize,
    threads: Vec<JoinHandle<()>>,
    error: Option<PlayerError>,
}

/// 打开会话需要的外部依赖
pub(crate) struct OpenParams {
    pub config: PlayerConfig,
    pub seek_any_frame: bool,
    pub backend: Arc<dyn MediaBackend>,
    pub audio_output: Arc<dyn AudioOutputFactory>,
    pub listener: Arc<dyn PlayerListener>,
}

impl Session {
    pub(crate) fn open(
        params: OpenParams,
        source: Box<dyn ByteSource>,
        range: Arc<RangeControl>,
    ) -> Self {
        info!("{} 📂 打开会话...", log_ctx());
        range.set_listener(params.listener.clone());
        let mut session = Self {
            inner: None,
            range,
            audio_index: None,
            video_index: 0,
            threads: Vec::new(),
            error: None,
        };
        match session.start(params, source) {
            Ok(()) => info!("{} ✅ 会话已启动（{} 个线程）", log_ctx(), session.threads.len()),
            Err(e) => {
                error!("{} ❌ 打开失败（code {}）: {}", log_ctx(), e.code(), e);
                session.shutdown();
                session.error = Some(e);
            }
        }
        session
    }

    fn start(&mut self, params: OpenParams, source: Box<dyn ByteSource>) -> Result<()> {
        let demuxer = params.backend.open_demuxer(source)?;
        info!("{} 📄 {}", log_ctx(), demuxer.description());

        let streams = demuxer.streams().to_vec();
        let video = streams
            .iter()
            .find(|stream| stream.kind == StreamKind::Video)
            .ok_or(PlayerError::FindStream)?;
        if !video.decodable {
            return Err(PlayerError::FindCodec);
        }
        self.video_index = video.index;

        let video_codecs = demuxer.open_video(video.index).map_err(|e| match e {
            PlayerError::OpenCodec(_) => e,
            other => PlayerError::OpenCodec(other.to_string()),
        })?;
        info!(
            "{} 🎬 视频流 #{}: {} {}x{} @ {:.3} fps ({})",
            log_ctx(),
            video.index,
            video_codecs.params.codec_name,
            video_codecs.params.width,
            video_codecs.params.height,
            video_codecs.params.frame_rate,
            video_codecs.params.pixel_format
        );

        let audio_codecs = streams
            .iter()
            .find(|stream| stream.kind == StreamKind::Audio && stream.decodable)
            .and_then(|stream| match demuxer.open_audio(stream.index) {
                Ok(codecs) => {
                    info!(
                        "{} 🔊 音频流 #{}: {} {} Hz, {} 声道",
                        log_ctx(),
                        stream.index,
                        codecs.params.codec_name,
                        codecs.params.sample_rate,
                        codecs.params.channels
                    );
                    Some((stream.index, codecs))
                }
                Err(e) => {
                    warn!("{} ⚠️  音频解码器打开失败，仅播放视频: {}", log_ctx(), e);
                    None
                }
            });

        let info = MediaInfo {
            duration_ms: demuxer.duration_ms(),
            metadata: demuxer.metadata(),
            video: video_codecs.params,
            audio: audio_codecs.as_ref().map(|(_, codecs)| codecs.params.clone()),
        };
        let (audio_decoder, resampler) = match audio_codecs {
            Some((index, codecs)) => {
                self.audio_index = Some(index);
                (Some(codecs.decoder), Some(codecs.resampler))
            }
            None => (None, None),
        };

        let shared = Arc::new(Shared::new(
            params.config,
            params.seek_any_frame,
            params.listener,
            params.backend,
            info,
            demuxer,
            audio_decoder,
            video_codecs.decoder,
        ));
        self.inner = Some(shared.clone());

        let resampler = match (resampler, shared.info.audio.as_ref()) {
            (Some(resampler), Some(audio_params)) => {
                let feeder = AudioFeeder::new(Arc::downgrade(&shared));
                let negotiated = params.audio_output.create().and_then(|mut sink| {
                    negotiate(sink.as_mut(), audio_params, &feeder).map(|format| (sink, format))
                });
                match negotiated {
                    Ok((sink, format)) => {
                        let _ = shared.pcm.set(format);
                        shared.audio.lock().sink = Some(sink);
                        Some(resampler)
                    }
                    Err(e) => {
                        warn!("{} ⚠️  音频输出不可用，仅播放视频: {}", log_ctx(), e);
                        shared.clock.drop_audio();
                        *shared.audio_decoder.lock() = None;
                        self.audio_index = None;
                        None
                    }
                }
            }
            _ => None,
        };

        self.spawn("myy-draw", {
            let shared = shared.clone();
            move || draw_thread::run(shared)
        })?;
        if let Some(resampler) = resampler {
            self.spawn("myy-audio", {
                let shared = shared.clone();
                move || audio_thread::run(shared, resampler)
            })?;
        }
        self.spawn("myy-video", {
            let shared = shared.clone();
            move || video_thread::run(shared)
        })?;
        let (audio_index, video_index) = (self.audio_index, self.video_index);
        self.spawn("myy-packets", move || packet_thread::run(shared, audio_index, video_index))?;
        Ok(())
    }

    fn spawn(&mut self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| PlayerError::StartThread(format!("{}: {}", name, e)))?;
        self.threads.push(handle);
        Ok(())
    }

    /// 中断并等待所有线程退出
    fn shutdown(&mut self) {
        if let Some(shared) = self.inner.as_ref() {
            shared.interrupt();
        }
        self.range.interrupt();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                error!("{} ❌ 线程 {} 异常退出", log_ctx(), name);
            }
        }
        if let Some(shared) = self.inner.as_ref() {
            // 输出端可能还持有回调，先停掉再释放
            let sink = shared.audio.lock().sink.take();
            if let Some(mut sink) = sink {
                sink.set_playing(false);
            }
        }
    }

    /// 关闭会话（等同于 drop）
    pub fn close(mut self) {
        self.shutdown();
        info!("{} ✅ 会话已关闭", log_ctx());
    }

    pub fn error(&self) -> Option<&PlayerError> {
        self.error.as_ref()
    }

    /// 打开失败的错误码，成功为 0
    pub fn error_code(&self) -> i32 {
        self.error.as_ref().map_or(0, PlayerError::code)
    }

    pub fn set_playing(&self, playing: bool) {
        let Some(shared) = self.inner.as_ref() else {
            return;
        };
        if shared.clock.is_playing() == playing {
            return;
        }
        info!("{} {}", log_ctx(), if playing { "▶️  播放" } else { "⏸️  暂停" });
        {
            let _finish = shared.finish.lock();
            if playing {
                shared.clock.resume();
            } else {
                shared.clock.pause();
            }
            shared.finish_cond.notify_all();
        }
        if shared.has_audio() {
            let mut audio = shared.audio.lock();
            if let Some(sink) = audio.sink.as_mut() {
                sink.set_playing(playing);
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inner.as_ref().is_some_and(|shared| shared.clock.is_playing())
    }

    /// Seek 到 `position` 毫秒；负值忽略
    ///
    /// 按固定顺序锁住所有阶段，清空队列和帧池、flush 解码器、移动读取位置，
    /// 最后推进 seek 纪元并唤醒所有等待者。
    pub fn set_position(&self, position: i64) {
        let Some(shared) = self.inner.as_ref() else {
            return;
        };
        if position < 0 {
            return;
        }
        info!("{} 🎯 Seek 到: {} ms", log_ctx(), position);

        let mut finish = shared.finish.lock();
        let mut demuxer = shared.demuxer.lock();
        let _flow = shared.flow.lock();
        let mut audio_decoder = shared.audio_decoder.lock();
        let mut video_decoder = shared.video_decoder.lock();
        let mut audio = shared.audio.lock();
        let mut draw = shared.draw.lock();
        let mut queue = shared.video_queue.lock();

        shared.audio_packets.clear();
        shared.video_packets.clear();
        let dropped_audio = audio.ready.len() + usize::from(audio.current.is_some());
        audio.ready.clear();
        audio.current = None;
        if let Some(sink) = audio.sink.as_mut() {
            sink.clear();
            audio.need_enqueue = true;
        }
        let dropped_video = queue.pool.as_ref().map_or(0, BufferPool::busy_count);
        if let Some(pool) = queue.pool.as_mut() {
            pool.clear();
        }
        if dropped_audio > 0 || dropped_video > 0 {
            debug!("🧹 Seek 清空: {} 音频缓冲区, {} 视频帧", dropped_audio, dropped_video);
        }
        if let Some(decoder) = audio_decoder.as_mut() {
            decoder.flush();
        }
        video_decoder.flush();

        let mut target = position;
        if shared.seek_any_frame {
            target = self.probe_position(demuxer.as_mut(), shared.has_audio(), position);
            debug!("精确 seek 探测结果: {} → {}", position, target);
        }
        if let Err(e) = demuxer.seek(target, SeekMode::Backward) {
            warn!("{} ⚠️  Seek 失败: {}", log_ctx(), e);
        }

        finish.packets_finished = false;
        shared.clock.reset_for_seek(target);
        shared.epoch.advance();
        draw.last_draw_times = NEVER_DRAWN;
        shared.emit(PlayerEvent::SeekStarted);

        shared.finish_cond.notify_all();
        shared.flow_cond.notify_all();
        shared.audio_sleep_cond.notify_all();
        shared.audio_buffer_cond.notify_all();
        shared.draw_sleep_cond.notify_all();
        shared.video_queue_cond.notify_all();
    }

    /// 以 i²·1000 ms 的步长向前回退，扫描包时间戳找到目标之前各流真实的最后位置
    fn probe_position(&self, demuxer: &mut dyn Demuxer, has_audio: bool, position: i64) -> i64 {
        let mut audio_position = if has_audio { -1 } else { position };
        let mut video_position = -1;
        let mut i: i64 = 1;
        while audio_position == -1 || video_position == -1 {
            let seek_position = (position - i * i * 1000).max(0);
            let max_position = (position - (i - 1) * (i - 1) * 1000).max(0);
            if demuxer.seek(seek_position, SeekMode::BackwardAny).is_err() {
                break;
            }
            loop {
                let packet = match demuxer.read_packet() {
                    Ok(Some(packet)) => packet,
                    _ => break,
                };
                let Some(timestamp) = packet.position_ms else {
                    continue;
                };
                let slot = if Some(packet.stream_index) == self.audio_index && has_audio {
                    &mut audio_position
                } else if packet.stream_index == self.video_index {
                    &mut video_position
                } else {
                    continue;
                };
                if timestamp > max_position {
                    break;
                }
                *slot = (*slot).max(timestamp);
            }
            if seek_position <= 0 {
                break;
            }
            i += 1;
        }
        if audio_position == -1 {
            audio_position = position;
        }
        if video_position == -1 {
            video_position = position;
        }
        audio_position.min(video_position)
    }

    /// 更新可读字节范围；负值表示未知
    pub fn set_range(&self, start: i64, end: i64, total: i64) {
        let total = u64::try_from(total).ok();
        self.range
            .set_range(start.max(0) as u64, end.max(0) as u64, total);
    }

    pub fn set_cancel_seek(&self, cancel: bool) {
        self.range.set_cancel_seek(cancel);
    }

    /// 设置或移除渲染表面
    ///
    /// 第一次设置时按表面格式确定输出格式并创建帧池和黑色的最后一帧；
    /// 之后更换表面只会用最后一帧重绘。
    pub fn set_surface(&self, surface: Option<Box<dyn RenderSurface>>) {
        let Some(shared) = self.inner.as_ref() else {
            return;
        };
        let mut draw = shared.draw.lock();
        draw.surface = None;
        let Some(mut surface) = surface else {
            debug!("渲染表面已移除");
            return;
        };

        let surface_format = surface.format();
        if draw.format.is_none() {
            match surface_format.video_format() {
                Some(format) => {
                    let (width, height) = (shared.info.video.width, shared.info.video.height);
                    {
                        let mut queue = shared.video_queue.lock();
                        queue.pool = Some(BufferPool::new(
                            format.buffer_size(width, height),
                            shared.config.video_pool_size,
                        ));
                        queue.format = Some(format);
                    }
                    draw.format = Some(format);
                    draw.last_frame = Some(LastFrame::black(format, width, height));
                    info!("{} 🖼 渲染表面格式 {} → {:?}", log_ctx(), surface_format.name(), format);
                    shared.draw_sleep_cond.notify_all();
                }
                None => warn!("{} ⚠️  不支持的渲染表面格式: {}", log_ctx(), surface_format.name()),
            }
        }

        let (width, height) = draw
            .last_frame
            .as_ref()
            .map_or((shared.info.video.width, shared.info.video.height), |last| {
                (last.width, last.height)
            });
        surface.set_buffers_geometry(width, height);
        draw.surface = Some(surface);
        draw.geometry = (width, height);

        if let (Some(format), Some(last)) = (draw.format, draw.last_frame.take()) {
            let size = format.buffer_size(last.width, last.height).min(last.data.len());
            draw_thread::draw_window(
                shared,
                &mut draw,
                format,
                &last.data[..size],
                last.width,
                last.height,
            );
            draw.last_frame = Some(last);
        }
    }

    /// 当前播放位置（毫秒）
    pub fn position_ms(&self) -> i64 {
        self.inner
            .as_ref()
            .map_or(0, |shared| shared.clock.position(false).max(0))
    }

    pub fn duration_ms(&self) -> i64 {
        self.inner.as_ref().map_or(0, |shared| shared.info.duration_ms)
    }

    pub fn summary(&self) -> Summary {
        self.inner.as_ref().map_or_else(Summary::default, |shared| Summary {
            width: shared.info.video.width,
            height: shared.info.video.height,
            has_audio: shared.has_audio(),
        })
    }

    /// 最后一帧的截图（ARGB），未设置过渲染表面时返回 None
    pub fn current_frame(&self) -> Option<Thumbnail> {
        let shared = self.inner.as_ref()?;
        let draw = shared.draw.lock();
        let format = draw.format?;
        let last = draw.last_frame.as_ref()?;
        thumbnail(
            format,
            &last.data,
            last.width,
            last.height,
            shared.config.thumbnail_max_dimension,
        )
    }

    /// 技术信息与容器元数据
    pub fn metadata(&self) -> Vec<(String, String)> {
        let Some(shared) = self.inner.as_ref() else {
            return Vec::new();
        };
        let info = &shared.info;
        let surface_format = shared
            .draw
            .lock()
            .surface
            .as_ref()
            .map_or_else(|| "Unknown".to_string(), |surface| surface.format().name());

        let mut entries = vec![
            ("video_format".to_string(), info.video.codec_name.clone()),
            ("width".to_string(), info.video.width.to_string()),
            ("height".to_string(), info.video.height.to_string()),
            ("frame_rate".to_string(), format!("{:.3}", info.video.frame_rate)),
            ("pixel_format".to_string(), info.video.pixel_format.clone()),
            ("surface_format".to_string(), surface_format),
            ("frame_conversion".to_string(), shared.conversion.method().label().to_string()),
        ];
        if let (true, Some(audio)) = (shared.has_audio(), info.audio.as_ref()) {
            entries.push(("audio_format".to_string(), audio.codec_name.clone()));
            entries.push(("channels".to_string(), audio.channels.to_string()));
            entries.push(("sample_rate".to_string(), audio.sample_rate.to_string()));
        }
        entries.extend(info.metadata.iter().cloned());
        entries
    }

    pub fn conversion_method(&self) -> ConversionMethod {
        self.inner
            .as_ref()
            .map_or(ConversionMethod::Unknown, |shared| shared.conversion.method())
    }

    /// 获取缓冲状态（用于监控和调试）
    pub fn buffer_status(&self) -> BufferStatus {
        let Some(shared) = self.inner.as_ref() else {
            return BufferStatus::default();
        };
        let video_frames = shared
            .video_queue
            .lock()
            .pool
            .as_ref()
            .map_or(0, BufferPool::busy_count);
        let audio_buffers = {
            let audio = shared.audio.lock();
            audio.ready.len() + usize::from(audio.current.is_some())
        };
        BufferStatus {
            video_packets: shared.video_packets.len(),
            audio_packets: shared.audio_packets.len(),
            video_frames,
            audio_buffers,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
