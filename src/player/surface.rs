use crate::core::{SurfaceFormat, VideoFormat};
use parking_lot::Mutex;
use std::sync::Arc;

/// 已锁定的绘制缓冲区
pub struct Canvas<'a> {
    pub width: u32,
    pub height: u32,
    /// 行跨度（像素）
    pub stride: u32,
    pub bits: &'a mut [u8],
}

/// 宿主提供的渲染表面
pub trait RenderSurface: Send {
    fn format(&self) -> SurfaceFormat;

    fn set_buffers_geometry(&mut self, width: u32, height: u32);

    /// 锁定下一块绘制缓冲区，失败返回 None
    fn lock(&mut self) -> Option<Canvas<'_>>;

    fn unlock_and_post(&mut self);
}

/// 最后一帧（供重绘和截图）
pub struct LastFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl LastFrame {
    /// 指定格式下的黑帧
    pub fn black(format: VideoFormat, width: u32, height: u32) -> Self {
        let size = format.buffer_size(width, height);
        let mut data = vec![0u8; size];
        match format {
            VideoFormat::Rgba => data.chunks_exact_mut(4).for_each(|p| p[3] = 0xff),
            VideoFormat::Rgb565 => {}
            VideoFormat::Yuv420p => data[(width * height) as usize..].fill(0x7f),
        }
        Self { data, width, height }
    }

    /// 缓存一帧，缓冲区只增不减
    pub fn store(&mut self, frame: &[u8], width: u32, height: u32) {
        if self.data.len() < frame.len() {
            self.data.resize(frame.len(), 0);
        }
        self.data[..frame.len()].copy_from_slice(frame);
        self.width = width;
        self.height = height;
    }
}

fn copy_rows(
    frame: &[u8],
    row_bytes: usize,
    rows: usize,
    dst: &mut [u8],
    mut to: usize,
    dst_stride: usize,
) -> Option<usize> {
    for row in 0..rows {
        let src = frame.get(row * row_bytes..(row + 1) * row_bytes)?;
        dst.get_mut(to..to + row_bytes)?.copy_from_slice(src);
        to += dst_stride;
    }
    Some(to)
}

/// 按表面的行跨度拷贝一帧；画布小于帧尺寸时返回 false
pub fn blit(
    format: VideoFormat,
    frame: &[u8],
    width: u32,
    height: u32,
    canvas: &mut Canvas<'_>,
) -> bool {
    if canvas.width < width || canvas.height < height {
        return false;
    }
    let (w, h, stride) = (width as usize, height as usize, canvas.stride as usize);
    match format {
        VideoFormat::Rgba | VideoFormat::Rgb565 => {
            let bpp = format.bytes_per_pixel();
            copy_rows(frame, w * bpp, h, canvas.bits, 0, stride * bpp).is_some()
        }
        VideoFormat::Yuv420p => {
            let luma = w * h;
            let chroma = (w / 2) * (h / 2);
            if frame.len() < luma + 2 * chroma {
                return false;
            }
            let Some(mut to) = copy_rows(&frame[..luma], w, h, canvas.bits, 0, stride) else {
                return false;
            };
            let neutral_end = (to + stride * h / 2).min(canvas.bits.len());
            if to < neutral_end {
                canvas.bits[to..neutral_end].fill(127);
            }
            let v_plane = &frame[luma..luma + chroma];
            let u_plane = &frame[luma + chroma..luma + 2 * chroma];
            let Some(next) = copy_rows(v_plane, w / 2, h / 2, canvas.bits, to, stride / 2) else {
                return false;
            };
            to = next;
            if stride % 32 != 0 {
                to += h / 2 * 8;
            }
            copy_rows(u_plane, w / 2, h / 2, canvas.bits, to, stride / 2).is_some()
        }
    }
}

/// 已提交的一帧
#[derive(Debug, Clone, Default)]
pub struct PostedFrame {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: Vec<u8>,
    pub posts: usize,
}

/// 内存表面：绘制到后台缓冲区，提交时复制给读取端
pub struct MemorySurface {
    format: SurfaceFormat,
    width: u32,
    height: u32,
    back: Vec<u8>,
    front: Arc<Mutex<PostedFrame>>,
}

impl MemorySurface {
    pub fn new(format: SurfaceFormat) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            back: Vec::new(),
            front: Arc::new(Mutex::new(PostedFrame::default())),
        }
    }

    /// 读取端句柄
    pub fn posted(&self) -> Arc<Mutex<PostedFrame>> {
        self.front.clone()
    }

    fn stride(&self) -> u32 {
        (self.width + 15) & !15
    }

    fn canvas_size(&self) -> usize {
        let stride = self.stride() as usize;
        let h = self.height as usize;
        match self.format.video_format() {
            Some(VideoFormat::Yuv420p) => stride * h + stride * h / 2 + h / 2 * 8,
            Some(format) => stride * h * format.bytes_per_pixel(),
            None => stride * h * 4,
        }
    }
}

impl RenderSurface for MemorySurface {
    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn set_buffers_geometry(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn lock(&mut self) -> Option<Canvas<'_>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let size = self.canvas_size();
        self.back.resize(size, 0);
        Some(Canvas {
            width: self.width,
            height: self.height,
            stride: self.stride(),
            bits: &mut self.back,
        })
    }

    fn unlock_and_post(&mut self) {
        let mut front = self.front.lock();
        front.width = self.width;
        front.height = self.height;
        front.stride = self.stride();
        front.data.clear();
        front.data.extend_from_slice(&self.back);
        front.posts += 1;
    }
}
