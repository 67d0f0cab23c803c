use crate::core::{ConversionMethod, PlayerError, Result, Thumbnail, VideoFormat};
use crate::player::codec::{MediaBackend, ScaleTarget, Scaler, VideoPicture};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 运行时选定的 YUV420P → RGBA 转换方式，供诊断读取
pub struct ConversionState(AtomicU8);

impl ConversionState {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn method(&self) -> ConversionMethod {
        match self.0.load(Ordering::Acquire) {
            1 => ConversionMethod::Direct,
            2 => ConversionMethod::Scaler,
            _ => ConversionMethod::Unknown,
        }
    }

    fn set(&self, method: ConversionMethod) {
        let value = match method {
            ConversionMethod::Unknown => 0,
            ConversionMethod::Direct => 1,
            ConversionMethod::Scaler => 2,
        };
        self.0.store(value, Ordering::Release);
    }
}

impl Default for ConversionState {
    fn default() -> Self {
        Self::new()
    }
}

/// BT.601 有限范围 YUV → RGB（定点）
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e + 128),
        clamp(c - 100 * d - 208 * e + 128),
        clamp(c + 516 * d + 128),
    ]
}

/// YUV420P → RGBA 直接转换
pub fn i420_to_rgba(picture: &dyn VideoPicture, dst: &mut [u8]) -> Result<()> {
    let width = picture.width() as usize;
    let height = picture.height() as usize;
    if width == 0 || height == 0 {
        return Ok(());
    }
    if dst.len() < width * height * 4 {
        return Err(PlayerError::Convert(format!("输出缓冲区过小: {}", dst.len())));
    }
    let (y_plane, y_stride) = picture.plane(0);
    let (u_plane, u_stride) = picture.plane(1);
    let (v_plane, v_stride) = picture.plane(2);
    let chroma_width = (width + 1) / 2;
    let chroma_height = (height + 1) / 2;
    if y_plane.len() < y_stride * (height - 1) + width
        || u_plane.len() < u_stride * (chroma_height - 1) + chroma_width
        || v_plane.len() < v_stride * (chroma_height - 1) + chroma_width
    {
        return Err(PlayerError::Convert("平面数据不完整".to_string()));
    }

    for (row, out) in dst.chunks_exact_mut(width * 4).take(height).enumerate() {
        let y_row = &y_plane[row * y_stride..row * y_stride + width];
        let u_row = &u_plane[(row / 2) * u_stride..];
        let v_row = &v_plane[(row / 2) * v_stride..];
        for (x, (pixel, &y)) in out.chunks_exact_mut(4).zip(y_row).enumerate() {
            let [r, g, b] = yuv_to_rgb(y, u_row[x / 2], v_row[x / 2]);
            pixel.copy_from_slice(&[r, g, b, 0xff]);
        }
    }
    Ok(())
}

/// 解码帧 → 帧池格式
///
/// 缩放上下文按 (width, height) 缓存。输入为 YUV420P 且输出为 RGBA 时，
/// 前 N 帧走缩放库、再 N 帧走直接转换，比较总耗时后永久选定较快的一种。
pub struct FrameConverter {
    format: VideoFormat,
    backend: Arc<dyn MediaBackend>,
    scalers: HashMap<(u32, u32), Box<dyn Scaler>>,
    measurements: usize,
    measured: usize,
    scaler_time: Duration,
    direct_time: Duration,
    staging: Vec<u8>,
}

impl FrameConverter {
    pub fn new(format: VideoFormat, backend: Arc<dyn MediaBackend>, measurements: usize) -> Self {
        Self {
            format,
            backend,
            scalers: HashMap::new(),
            measurements,
            measured: 0,
            scaler_time: Duration::ZERO,
            direct_time: Duration::ZERO,
            staging: Vec::new(),
        }
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// 转换一帧，返回按帧尺寸截取的输出
    pub fn convert(
        &mut self,
        picture: &dyn VideoPicture,
        state: &ConversionState,
    ) -> Result<&[u8]> {
        let (width, height) = (picture.width(), picture.height());
        if width == 0 || height == 0 {
            return Err(PlayerError::Convert("帧尺寸为 0".to_string()));
        }
        let size = self.format.buffer_size(width, height);
        if self.staging.len() < size {
            self.staging.resize(size, 0);
        }

        if picture.is_yuv420p() && self.format == VideoFormat::Rgba {
            match state.method() {
                ConversionMethod::Direct => i420_to_rgba(picture, &mut self.staging[..size])?,
                ConversionMethod::Scaler => self.scale(picture, size)?,
                ConversionMethod::Unknown => self.measure(picture, size, state)?,
            }
        } else {
            self.scale(picture, size)?;
        }
        Ok(&self.staging[..size])
    }

    fn measure(
        &mut self,
        picture: &dyn VideoPicture,
        size: usize,
        state: &ConversionState,
    ) -> Result<()> {
        let direct = self.measured >= self.measurements;
        let started = Instant::now();
        if direct {
            i420_to_rgba(picture, &mut self.staging[..size])?;
            self.direct_time += started.elapsed();
        } else {
            self.scale(picture, size)?;
            self.scaler_time += started.elapsed();
        }
        self.measured += 1;

        if self.measured >= 2 * self.measurements {
            let method = if self.direct_time <= self.scaler_time {
                ConversionMethod::Direct
            } else {
                ConversionMethod::Scaler
            };
            info!(
                "✅ 选定帧转换方式: {} (direct {:?} / scaler {:?})",
                method.label(),
                self.direct_time,
                self.scaler_time
            );
            state.set(method);
        }
        Ok(())
    }

    fn scale(&mut self, picture: &dyn VideoPicture, size: usize) -> Result<()> {
        let key = (picture.width(), picture.height());
        if !self.scalers.contains_key(&key) {
            debug!("创建缩放上下文: {}x{} -> {:?}", key.0, key.1, self.format);
            let scaler = self.backend.create_scaler(picture, self.format)?;
            self.scalers.insert(key, scaler);
        }
        let scaler = self
            .scalers
            .get_mut(&key)
            .ok_or_else(|| PlayerError::Convert("缩放上下文缺失".to_string()))?;
        scaler.scale(
            picture,
            ScaleTarget {
                format: self.format,
                width: key.0,
                height: key.1,
                data: &mut self.staging[..size],
            },
        )
    }
}

/// 帧池格式下某像素的 ARGB 值
fn pixel_argb(
    format: VideoFormat,
    data: &[u8],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
) -> u32 {
    let [r, g, b] = match format {
        VideoFormat::Rgba => {
            let i = (y * width + x) * 4;
            [data[i], data[i + 1], data[i + 2]]
        }
        VideoFormat::Rgb565 => {
            let i = (y * width + x) * 2;
            let value = u16::from_le_bytes([data[i], data[i + 1]]);
            let r = ((value >> 11) & 0x1f) as u8;
            let g = ((value >> 5) & 0x3f) as u8;
            let b = (value & 0x1f) as u8;
            [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
        }
        VideoFormat::Yuv420p => {
            let luma = width * height;
            let chroma = (width / 2) * (height / 2);
            let c = (y / 2) * (width / 2) + x / 2;
            let yv = data[y * width + x];
            let v = data.get(luma + c).copied().unwrap_or(128);
            let u = data.get(luma + chroma + c).copied().unwrap_or(128);
            yuv_to_rgb(yv, u, v)
        }
    };
    0xff00_0000 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// 把最后一帧转为 ARGB 截图，边长超过 `max_dimension` 时按整数倍抽样缩小
pub fn thumbnail(
    format: VideoFormat,
    data: &[u8],
    width: u32,
    height: u32,
    max_dimension: u32,
) -> Option<Thumbnail> {
    if width == 0 || height == 0 || data.len() < format.buffer_size(width, height) {
        return None;
    }
    let max_dimension = max_dimension.max(1);
    let sample = width.div_ceil(max_dimension).max(height.div_ceil(max_dimension));
    let sample = if sample >= 2 { sample } else { 1 };
    let dest_width = width.div_ceil(sample);
    let dest_height = height.div_ceil(sample);

    let (w, h, s) = (width as usize, height as usize, sample as usize);
    let mut pixels = Vec::with_capacity(dest_width as usize * dest_height as usize);
    for y in 0..dest_height as usize {
        for x in 0..dest_width as usize {
            pixels.push(pixel_argb(format, data, w, h, x * s, y * s));
        }
    }
    Some(Thumbnail {
        width: dest_width,
        height: dest_height,
        pixels,
    })
}
