use crate::core::{pacing_delay, EpochToken, StreamKind};
use crate::player::codec::{decode_once, AudioChunk, Resampler};
use crate::player::shared::{log_ctx, AudioBuffer, AudioState, LastPacket, PacketItem, Shared};
use log::{debug, info, warn};
use parking_lot::MutexGuard;
use std::sync::Arc;

/// 音频解码线程
pub(crate) fn run(shared: Arc<Shared>, mut resampler: Box<dyn Resampler>) {
    info!("{} 🔊 音频解码线程启动", log_ctx());
    let Some(&pcm) = shared.pcm.get() else {
        warn!("{} ⚠ 音频输出格式未协商，退出", log_ctx());
        return;
    };
    let divider = pcm.byte_rate();
    let mut mute_bytes = (shared.config.start_mute_ms * divider / 1000) as usize & !1;
    let mut last = LastPacket::default();
    let mut decoded: usize = 0;

    while !shared.is_interrupted() {
        let Some((item, token)) = shared.audio_packets.pop_tagged(true, || shared.epoch.token())
        else {
            break;
        };
        last.observe(token, &item);
        let packet = match item {
            PacketItem::Packet(packet) => Some(packet),
            PacketItem::Finish => None,
        };
        shared.notify_flow();

        if !shared.wait_playing() {
            break;
        }

        let mut empty = 0;
        loop {
            if shared.is_interrupted() || shared.epoch.is_stale(token) {
                break;
            }
            let chunk = {
                let mut decoder = shared.audio_decoder.lock();
                if shared.epoch.is_stale(token) {
                    break;
                }
                let Some(decoder) = decoder.as_mut() else {
                    break;
                };
                let result = match packet.as_ref() {
                    Some(packet) => decoder.decode(packet),
                    None => decoder.drain(),
                };
                decode_once(StreamKind::Audio, result)
            };
            let Some(chunk) = chunk else {
                empty += 1;
                if packet.is_some() || empty > shared.config.finish_decode_attempts {
                    break;
                }
                continue;
            };
            empty = 0;
            decoded += 1;
            let position = chunk.position_ms().unwrap_or(-1);

            let published = publish(
                &shared,
                resampler.as_mut(),
                chunk.as_ref(),
                position,
                divider,
                &mut mute_bytes,
                token,
            );
            if !published || packet.is_some() {
                break;
            }
            if last.reached(position) {
                let mut decoder = shared.audio_decoder.lock();
                if !shared.epoch.is_stale(token) {
                    if let Some(decoder) = decoder.as_mut() {
                        decoder.flush();
                    }
                }
                break;
            }
        }

        // 结束标记处理完后输出端可能已经播空
        if packet.is_none() {
            let drained = shared.audio_drained(&shared.audio.lock());
            if drained && !shared.clock.audio_finished() {
                shared.clock.set_audio_finished(true);
                shared.notify_finish();
            }
        }
    }

    info!("{} 🛑 音频解码线程退出（共解码 {} 帧）", log_ctx(), decoded);
}

/// 重采样、节奏控制并放入待播放队列；返回 false 表示本帧被放弃
fn publish(
    shared: &Shared,
    resampler: &mut dyn Resampler,
    chunk: &dyn AudioChunk,
    position: i64,
    divider: i64,
    mute_bytes: &mut usize,
    token: EpochToken,
) -> bool {
    let clock = &shared.clock;
    if shared.seek_any_frame
        && clock.audio_not_sync()
        && position >= 0
        && position < clock.audio_position()
    {
        // 精确 seek：丢弃目标位置之前的帧，但视为成功以继续 flush
        return true;
    }

    let Some(&pcm) = shared.pcm.get() else {
        return false;
    };
    let mut data = match resampler.resample(chunk, pcm) {
        Ok(data) => data,
        Err(e) => {
            debug!("音频重采样失败（已丢弃）: {}", e);
            return false;
        }
    };
    if shared.epoch.is_stale(token) {
        return false;
    }

    let mut audio = shared.audio.lock();
    while !shared.is_interrupted()
        && !shared.epoch.is_stale(token)
        && audio.ready.len() >= shared.config.audio_ready_buffers
    {
        shared.audio_buffer_cond.wait(&mut audio);
    }
    if shared.is_interrupted() || shared.epoch.is_stale(token) {
        return false;
    }
    if position >= 0 && audio.need_enqueue {
        clock.set_audio_position(position);
    }

    // seek 后等视频先画出第一帧
    while !shared.is_interrupted() && !shared.epoch.is_stale(token) && clock.video_not_sync() {
        shared.audio_sleep_cond.wait(&mut audio);
    }
    if shared.is_interrupted() || shared.epoch.is_stale(token) {
        return false;
    }

    let gaining = if clock.video_finished() { 0 } else { position - clock.video_position() };
    if gaining > shared.config.gaining_threshold_ms {
        if !pace(shared, &mut audio, gaining, token) {
            return false;
        }
    }

    if *mute_bytes > 0 {
        let muted = (*mute_bytes).min(data.len());
        data[..muted].fill(0);
        *mute_bytes -= muted;
    }

    audio.ready.push_back(AudioBuffer {
        data,
        index: 0,
        position,
        divider,
    });
    true
}

/// 音频领先过多时睡到提前唤醒时刻
fn pace(
    shared: &Shared,
    audio: &mut MutexGuard<'_, AudioState>,
    gaining: i64,
    token: EpochToken,
) -> bool {
    let deadline = std::time::Instant::now() + pacing_delay(gaining);
    while !shared.is_interrupted() && !shared.epoch.is_stale(token) {
        if shared.audio_sleep_cond.wait_until(audio, deadline).timed_out() {
            break;
        }
    }
    !shared.is_interrupted() && !shared.epoch.is_stale(token)
}

/// 输出端回调：从待播放队列拷贝 PCM，不阻塞
pub(crate) fn fill_output(shared: &Shared, out: &mut [u8]) {
    if shared.is_interrupted() {
        out.fill(0);
        return;
    }
    let Some(mut audio) = shared.audio.try_lock() else {
        out.fill(0);
        return;
    };
    if !shared.clock.is_playing() {
        audio.need_enqueue = true;
        drop(audio);
        out.fill(0);
        return;
    }

    let clock = &shared.clock;
    let mut written = 0;
    let mut consumed_buffer = false;
    while written < out.len() {
        if audio.current.as_ref().is_some_and(|buffer| buffer.remaining() == 0) {
            if let Some(done) = audio.current.take() {
                if done.position >= 0 {
                    let end = done.position + done.data.len() as i64 * 1000 / done.divider;
                    if audio.ready.is_empty() && shared.audio_packets.is_empty() {
                        // 最后一个缓冲区播完，把墙钟接到音频末尾
                        clock.sync_wall_clock(end, true);
                    }
                }
                consumed_buffer = true;
            }
        }
        let next = match audio.current.take() {
            Some(buffer) => Some(buffer),
            None => audio.ready.pop_front(),
        };
        let Some(mut buffer) = next else {
            audio.need_enqueue = true;
            break;
        };
        if buffer.position >= 0 {
            clock.set_audio_position(buffer.position + buffer.index as i64 * 1000 / buffer.divider);
        }
        let len = buffer.remaining().min(out.len() - written);
        out[written..written + len].copy_from_slice(&buffer.data[buffer.index..buffer.index + len]);
        buffer.index += len;
        written += len;
        audio.current = Some(buffer);
        audio.need_enqueue = false;
    }
    out[written..].fill(0);

    if consumed_buffer {
        shared.audio_buffer_cond.notify_all();
    }
    let drained = shared.audio_drained(&audio);
    drop(audio);
    if drained && !clock.audio_finished() {
        clock.set_audio_finished(true);
        shared.notify_finish_nonblocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        NullListener, Packet, PcmFormat, PlayerConfig, PlayerError, Result, VideoFormat,
    };
    use crate::player::codec::{
        AudioCodecs, AudioDecoder, Demuxer, MediaBackend, Scaler, SeekMode, StreamInfo,
        VideoCodecs, VideoDecoder, VideoPicture, VideoStreamParams,
    };
    use crate::player::shared::MediaInfo;
    use crate::player::source::ByteSource;
    use std::thread;
    use std::time::Duration;

    struct IdleDemuxer;

    impl Demuxer for IdleDemuxer {
        fn streams(&self) -> &[StreamInfo] {
            &[]
        }
        fn read_packet(&mut self) -> Result<Option<Packet>> {
            Ok(None)
        }
        fn seek(&mut self, _position_ms: i64, _mode: SeekMode) -> Result<()> {
            Ok(())
        }
        fn duration_ms(&self) -> i64 {
            0
        }
        fn metadata(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        fn open_audio(&self, _stream_index: usize) -> Result<AudioCodecs> {
            Err(PlayerError::Other("no audio".into()))
        }
        fn open_video(&self, _stream_index: usize) -> Result<VideoCodecs> {
            Err(PlayerError::Other("no video".into()))
        }
        fn description(&self) -> String {
            "idle".into()
        }
    }

    struct IdleDecoder;

    impl VideoDecoder for IdleDecoder {
        fn decode(&mut self, _packet: &Packet) -> Result<Option<Box<dyn VideoPicture>>> {
            Ok(None)
        }
        fn drain(&mut self) -> Result<Option<Box<dyn VideoPicture>>> {
            Ok(None)
        }
        fn flush(&mut self) {}
    }

    impl AudioDecoder for IdleDecoder {
        fn decode(&mut self, _packet: &Packet) -> Result<Option<Box<dyn AudioChunk>>> {
            Ok(None)
        }
        fn drain(&mut self) -> Result<Option<Box<dyn AudioChunk>>> {
            Ok(None)
        }
        fn flush(&mut self) {}
    }

    struct IdleBackend;

    impl MediaBackend for IdleBackend {
        fn open_demuxer(&self, _source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
            Ok(Box::new(IdleDemuxer))
        }
        fn create_scaler(
            &self,
            _picture: &dyn VideoPicture,
            _format: VideoFormat,
        ) -> Result<Box<dyn Scaler>> {
            Err(PlayerError::Other("no scaler".into()))
        }
    }

    fn shared_with_audio() -> Arc<Shared> {
        let info = MediaInfo {
            duration_ms: 0,
            metadata: Vec::new(),
            video: VideoStreamParams::default(),
            audio: None,
        };
        let shared = Shared::new(
            PlayerConfig::default(),
            false,
            Arc::new(NullListener),
            Arc::new(IdleBackend),
            info,
            Box::new(IdleDemuxer),
            Some(Box::new(IdleDecoder)),
            Box::new(IdleDecoder),
        );
        let _ = shared.pcm.set(PcmFormat {
            channels: 2,
            sample_rate: 48_000,
        });
        Arc::new(shared)
    }

    #[test]
    fn fill_output_does_not_wait_for_finish_lock() {
        let shared = shared_with_audio();
        shared.clock.resume();

        // seek 期间 finish 锁一直被持有
        let finish = shared.finish.lock();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let callback = {
            let shared = shared.clone();
            thread::spawn(move || {
                let mut out = vec![7u8; 256];
                fill_output(&shared, &mut out);
                let _ = tx.send(out);
            })
        };

        let out = rx
            .recv_timeout(Duration::from_millis(500))
            .expect("audio callback blocked on finish lock");
        assert!(out.iter().all(|&b| b == 0));
        assert!(shared.clock.audio_finished());
        drop(finish);
        callback.join().unwrap();
    }

    #[test]
    fn fill_output_advances_audio_clock_by_bytes() {
        let shared = shared_with_audio();
        shared.clock.resume();
        shared.audio.lock().ready.push_back(AudioBuffer {
            data: vec![1; 400],
            index: 0,
            position: 1000,
            divider: 4000,
        });

        let mut out = vec![0u8; 200];
        fill_output(&shared, &mut out);
        assert!(out.iter().all(|&b| b == 1));
        assert_eq!(shared.clock.audio_position(), 1000);

        fill_output(&shared, &mut out);
        assert_eq!(shared.clock.audio_position(), 1050);
        assert!(!shared.clock.audio_finished());
    }
}
