use crate::core::PlayerEvent;
use crate::player::shared::{log_ctx, PacketItem, Shared};
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Packet 读取线程
///
/// 关键点：
/// - 两个 packet 队列都达到目标深度时阻塞在 flow 条件变量上，解码线程取走一个包后唤醒。
/// - 读包和入队之间发生的 seek 通过纪元令牌识别，过期的包直接丢弃。
/// - 读到文件末尾后给每个流放一个结束标记，然后等待 seek 或退出。
pub(crate) fn run(shared: Arc<Shared>, audio_index: Option<usize>, video_index: usize) {
    info!("{} 🎬 Packet 线程启动", log_ctx());
    let mut packet_count: usize = 0;
    let mut video_packet_count: usize = 0;
    let mut audio_packet_count: usize = 0;

    while !shared.is_interrupted() {
        let mut token = shared.epoch.token();

        while !shared.is_interrupted() {
            let result = {
                let mut demuxer = shared.demuxer.lock();
                token = shared.epoch.token();
                demuxer.read_packet()
            };
            let packet = match result {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("{} 📄 到达文件末尾", log_ctx());
                    break;
                }
                Err(e) => {
                    if !shared.is_interrupted() {
                        error!("{} ❌ 读取包失败，按文件末尾处理: {}", log_ctx(), e);
                    }
                    break;
                }
            };
            packet_count += 1;

            let mut flow = shared.flow.lock();
            if shared.epoch.is_stale(token) {
                continue;
            }
            while !shared.is_interrupted()
                && !shared.epoch.is_stale(token)
                && shared.video_packets.len() >= shared.config.video_packet_depth
                && (!shared.has_audio()
                    || shared.audio_packets.len() >= shared.config.audio_packet_depth)
            {
                shared.flow_cond.wait(&mut flow);
            }
            if shared.is_interrupted() || shared.epoch.is_stale(token) {
                continue;
            }

            if packet.stream_index == video_index {
                video_packet_count += 1;
                if video_packet_count % 100 == 0 {
                    debug!(
                        "{} 📦 视频包 #{}（total packets {}）",
                        log_ctx(),
                        video_packet_count,
                        packet_count
                    );
                }
                shared.video_packets.push(PacketItem::Packet(packet));
                shared.clock.set_video_finished(false);
            } else if Some(packet.stream_index) == audio_index && shared.has_audio() {
                audio_packet_count += 1;
                if audio_packet_count % 100 == 0 {
                    debug!(
                        "{} 🔊 音频包 #{}（total packets {}）",
                        log_ctx(),
                        audio_packet_count,
                        packet_count
                    );
                }
                shared.audio_packets.push(PacketItem::Packet(packet));
                shared.clock.set_audio_finished(false);
            }
            // 其余流（字幕/数据）直接丢弃
        }

        if shared.is_interrupted() {
            break;
        }

        {
            let _flow = shared.flow.lock();
            if !shared.epoch.is_stale(token) {
                shared.video_packets.push(PacketItem::Finish);
                shared.clock.set_video_finished(false);
                if shared.has_audio() {
                    shared.audio_packets.push(PacketItem::Finish);
                    shared.clock.set_audio_finished(false);
                }
            }
        }

        // 等待两个流播放完毕；seek 会清除 packets_finished 让循环继续读包
        let mut finish = shared.finish.lock();
        if shared.epoch.is_stale(token) {
            // 读到末尾之后、拿到 finish 之前发生了 seek
            debug!("{} ⏩ 文件末尾处理期间发生 seek，重新读包", log_ctx());
            continue;
        }
        finish.packets_finished = true;
        let mut need_message = true;
        while !shared.is_interrupted() && finish.packets_finished {
            let clock = &shared.clock;
            if need_message
                && (!shared.has_audio() || clock.audio_finished())
                && clock.video_finished()
            {
                need_message = false;
                info!("{} ✅ 播放完成", log_ctx());
                shared.emit(PlayerEvent::PlaybackComplete);
            }
            // 音频回调不阻塞地通知，可能错过唤醒，这里定时复查
            shared.finish_cond.wait_for(&mut finish, FINISH_POLL_INTERVAL);
        }
    }

    info!(
        "{} 🛑 Packet 线程退出（共读取 {} 个包：{} 视频，{} 音频）",
        log_ctx(),
        packet_count,
        video_packet_count,
        audio_packet_count
    );
}
