use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use log::{info, warn};
use myy_engine::core::{PlayerConfig, PlayerEvent, SurfaceFormat};
use myy_engine::player::{Engine, MemorySurface, RangedSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 命令行播放：解码到内存表面，音频走默认输出设备
#[derive(Parser, Debug)]
#[command(name = "myy_engine", version, about = "喜洋洋播放引擎")]
struct Args {
    /// 媒体文件路径
    input: PathBuf,

    /// 开始播放前 seek 到的位置（毫秒）
    #[arg(long)]
    seek: Option<i64>,

    /// 播放时长（毫秒），不指定则播放到结束
    #[arg(long)]
    play_ms: Option<u64>,

    /// 精确 seek（解码到目标帧）
    #[arg(long)]
    any_frame: bool,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 退出前把最后一帧保存为 PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("cpal", log::LevelFilter::Warn)
        .init();

    let args = Args::parse();
    info!("🎬 MYY Engine 启动: {}", args.input.display());

    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("无法读取配置 {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    let engine = Engine::new(config).map_err(|e| anyhow::anyhow!("引擎初始化失败: {}", e))?;

    let source = RangedSource::open_file(&args.input)
        .with_context(|| format!("无法打开文件 {}", args.input.display()))?;
    let (events_tx, events_rx) = unbounded::<PlayerEvent>();
    let session = engine.open(source, Arc::new(events_tx), args.any_frame.then_some(true));
    if let Some(e) = session.error() {
        anyhow::bail!("打开失败（code {}）: {}", e.code(), e);
    }

    for (key, value) in session.metadata() {
        info!("  {} = {}", key, value);
    }
    let surface = MemorySurface::new(SurfaceFormat::Rgba8888);
    let posted = surface.posted();
    session.set_surface(Some(Box::new(surface)));

    if let Some(position) = args.seek {
        session.set_position(position);
    }
    session.set_playing(true);

    let started = Instant::now();
    let limit = args.play_ms.map(Duration::from_millis);
    let mut last_report = Instant::now();
    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("⏹️  到达播放时长上限");
            break;
        }
        match events_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(PlayerEvent::PlaybackComplete) => {
                info!("✅ 播放完成");
                break;
            }
            Ok(event) => info!("📨 事件: {:?}", event),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let status = session.buffer_status();
            info!(
                "⏱ {} / {} ms（已提交 {} 帧，包队列 {} 视频 / {} 音频）",
                session.position_ms(),
                session.duration_ms(),
                posted.lock().posts,
                status.video_packets,
                status.audio_packets
            );
        }
    }
    session.set_playing(false);

    if let Some(path) = &args.snapshot {
        match session.current_frame() {
            Some(frame) => {
                let rgba = frame.to_rgba_bytes();
                image::save_buffer(path, &rgba, frame.width, frame.height, image::ColorType::Rgba8)
                    .with_context(|| format!("无法保存截图 {}", path.display()))?;
                info!("🖼 截图已保存: {}（{}x{}）", path.display(), frame.width, frame.height);
            }
            None => warn!("⚠️  没有可保存的帧"),
        }
    }

    info!("转换方式: {}", session.conversion_method().label());
    session.close();
    Ok(())
}
