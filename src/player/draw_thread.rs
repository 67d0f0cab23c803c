use crate::core::{pacing_delay, EpochToken, FrameMeta, PlayerEvent, PoolBuffer, VideoFormat};
use crate::player::shared::{log_ctx, DrawState, Shared};
use crate::player::surface::{blit, LastFrame};
use log::{debug, info};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Instant;

/// 绘制时间的初始值，保证第一帧不受帧率上限影响
pub(crate) const NEVER_DRAWN: [i64; 2] = [-1000, -1000];

/// 绘制线程
pub(crate) fn run(shared: Arc<Shared>) {
    info!("{} 🖼 绘制线程启动", log_ctx());
    let mut drawn: usize = 0;

    while !shared.is_interrupted() {
        let seized = {
            let mut queue = shared.video_queue.lock();
            loop {
                if shared.is_interrupted() {
                    break None;
                }
                if let Some(buffer) = queue.pool.as_mut().and_then(|pool| pool.seize()) {
                    break Some((buffer, shared.epoch.token()));
                }
                shared.video_queue_cond.wait(&mut queue);
            }
        };
        let Some((buffer, token)) = seized else {
            break;
        };

        if shared.wait_playing() && present(&shared, &buffer, token) {
            drawn += 1;
        }

        {
            let mut queue = shared.video_queue.lock();
            if let Some(pool) = queue.pool.as_mut() {
                pool.release(buffer);
            }
            shared.video_queue_cond.notify_all();
        }
        shared.mark_video_finished();
    }

    info!("{} 🛑 绘制线程退出（共绘制 {} 帧）", log_ctx(), drawn);
}

fn is_stale(shared: &Shared, token: EpochToken) -> bool {
    shared.is_interrupted() || shared.epoch.is_stale(token)
}

/// 等到显示时刻并绘制一帧，返回是否真正提交到了表面
fn present(shared: &Shared, buffer: &PoolBuffer<FrameMeta>, token: EpochToken) -> bool {
    let Some(&meta) = buffer.extra() else {
        return false;
    };
    let clock = &shared.clock;
    let mut draw = shared.draw.lock();
    if is_stale(shared, token) {
        return false;
    }

    let position = clock.position(true);
    let mut wait = 0;
    if meta.position >= 0 {
        clock.set_video_position(meta.position);
        wait = meta.position - position;
        if clock.take_video_not_sync() {
            shared.emit(PlayerEvent::SeekEnded);
            // 按锁顺序先放开绘制锁再唤醒音频
            MutexGuard::unlocked(&mut draw, || {
                let _audio = shared.audio.lock();
                shared.audio_sleep_cond.notify_all();
            });
            if is_stale(shared, token) {
                return false;
            }
        }
    }

    if wait > 0 {
        let deadline = Instant::now() + pacing_delay(wait);
        while !is_stale(shared, token) {
            if shared.draw_sleep_cond.wait_until(&mut draw, deadline).timed_out() {
                break;
            }
        }
        wait = 0;
    }
    if is_stale(shared, token) {
        return false;
    }

    if clock.audio_not_sync() {
        clock.sync_wall_clock(position, false);
    } else {
        let gaining = -wait;
        if !shared.has_audio() && gaining > shared.config.gaining_threshold_ms {
            clock.delay_wall_clock(gaining);
        }
    }

    let Some(format) = draw.format else {
        return false;
    };
    let (width, height) = (meta.width, meta.height);
    let frame = &buffer.data()[..format.buffer_size(width, height).min(buffer.data().len())];
    match draw.last_frame.as_mut() {
        Some(last) => last.store(frame, width, height),
        None => {
            let mut last = LastFrame::black(format, width, height);
            last.store(frame, width, height);
            draw.last_frame = Some(last);
        }
    }

    let now = clock.now();
    let max_fps = shared.config.max_fps;
    let [last, before] = draw.last_draw_times;
    if (last - before) * max_fps >= 1000 || (now - last) * max_fps >= 1000 {
        draw_window(shared, &mut draw, format, frame, width, height);
        draw.last_draw_times = [clock.now(), last];
        true
    } else {
        debug!("跳过绘制（超过帧率上限）: {}", meta.position);
        false
    }
}

/// 绘制到表面；尺寸变化时先更新表面几何并通知宿主
pub(crate) fn draw_window(
    shared: &Shared,
    draw: &mut DrawState,
    format: VideoFormat,
    frame: &[u8],
    width: u32,
    height: u32,
) {
    let geometry_changed = draw.geometry != (width, height);
    let Some(surface) = draw.surface.as_mut() else {
        return;
    };
    if geometry_changed {
        surface.set_buffers_geometry(width, height);
        shared.emit(PlayerEvent::SizeChanged { width, height });
    }
    if let Some(mut canvas) = surface.lock() {
        blit(format, frame, width, height, &mut canvas);
        drop(canvas);
        surface.unlock_and_post();
    }
    draw.geometry = (width, height);
}
