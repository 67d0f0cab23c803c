use crate::core::{EpochToken, FrameMeta, StreamKind};
use crate::player::codec::{decode_once, VideoPicture};
use crate::player::convert::FrameConverter;
use crate::player::shared::{log_ctx, LastPacket, PacketItem, Shared};
use log::{debug, info};
use std::sync::Arc;

/// 视频解码线程
pub(crate) fn run(shared: Arc<Shared>) {
    info!("{} 🎬 视频解码线程启动", log_ctx());

    // 帧池格式由第一次设置的渲染表面决定
    let format = {
        let mut draw = shared.draw.lock();
        loop {
            if shared.is_interrupted() {
                info!("{} 🛑 视频解码线程退出（未设置渲染表面）", log_ctx());
                return;
            }
            if let Some(format) = draw.format {
                break format;
            }
            shared.draw_sleep_cond.wait(&mut draw);
        }
    };
    info!("{} ✅ 视频输出格式: {:?}", log_ctx(), format);

    let mut converter = FrameConverter::new(
        format,
        shared.backend.clone(),
        shared.config.conversion_measurements,
    );
    let mut last = LastPacket::default();
    let mut decoded: usize = 0;

    while !shared.is_interrupted() {
        let Some((item, token)) = shared.video_packets.pop_tagged(true, || shared.epoch.token())
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

        // 结束标记：反复取出解码器缓存的帧，直到追上最后一个包的位置；
        // 重试次数只限制连续取空
        let mut empty = 0;
        loop {
            if shared.is_interrupted() || shared.epoch.is_stale(token) {
                break;
            }
            let picture = {
                let mut decoder = shared.video_decoder.lock();
                if shared.epoch.is_stale(token) {
                    break;
                }
                let result = match packet.as_ref() {
                    Some(packet) => decoder.decode(packet),
                    None => decoder.drain(),
                };
                decode_once(StreamKind::Video, result)
            };
            let Some(picture) = picture else {
                empty += 1;
                if packet.is_some() || empty > shared.config.finish_decode_attempts {
                    break;
                }
                continue;
            };
            empty = 0;
            decoded += 1;
            let position = picture.position_ms().unwrap_or(-1);

            if !push_frame(&shared, &mut converter, picture.as_ref(), position, token)
                || packet.is_some()
            {
                break;
            }
            if last.reached(position) {
                let mut decoder = shared.video_decoder.lock();
                if !shared.epoch.is_stale(token) {
                    decoder.flush();
                }
                break;
            }
        }

        shared.mark_video_finished();
    }

    info!("{} 🛑 视频解码线程退出（共解码 {} 帧）", log_ctx(), decoded);
}

/// 转换并放入帧池；返回 false 表示本帧被放弃
fn push_frame(
    shared: &Shared,
    converter: &mut FrameConverter,
    picture: &dyn VideoPicture,
    position: i64,
    token: EpochToken,
) -> bool {
    let clock = &shared.clock;
    if shared.seek_any_frame
        && clock.video_not_sync()
        && position >= 0
        && position < clock.video_position()
    {
        // 精确 seek：丢弃目标位置之前的帧
        return true;
    }

    let data = match converter.convert(picture, &shared.conversion) {
        Ok(data) => data,
        Err(e) => {
            debug!("视频帧转换失败（已丢弃）: {}", e);
            return false;
        }
    };
    if shared.epoch.is_stale(token) {
        return false;
    }

    let mut queue = shared.video_queue.lock();
    let mut buffer = loop {
        if shared.is_interrupted() || shared.epoch.is_stale(token) {
            return false;
        }
        let Some(pool) = queue.pool.as_mut() else {
            return false;
        };
        // 分辨率变大时扩容
        pool.extend(data.len());
        if let Some(buffer) = pool.prepare() {
            break buffer;
        }
        shared.video_queue_cond.wait(&mut queue);
    };

    buffer.data_mut()[..data.len()].copy_from_slice(data);
    let meta = FrameMeta {
        width: picture.width(),
        height: picture.height(),
        position,
    };
    match queue.pool.as_mut() {
        Some(pool) => pool.add(buffer, meta),
        None => return false,
    }
    shared.video_queue_cond.notify_all();
    true
}
