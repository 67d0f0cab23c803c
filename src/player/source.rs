use crate::core::{PlayerEvent, PlayerListener};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// 可随机访问的字节源
pub trait ByteSource: Send {
    /// 读取数据，返回 0 表示 EOF
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// 总长度，未知为 None
    fn size(&self) -> Option<u64>;
}

struct RangeState {
    start: u64,
    end: u64,
    total: Option<u64>,
    cancel_seek: bool,
    interrupted: bool,
    listener: Option<Arc<dyn PlayerListener>>,
}

/// 字节窗口控制端，由宿主（通过 Session）更新
pub struct RangeControl {
    state: Mutex<RangeState>,
    cond: Condvar,
}

impl RangeControl {
    fn new(start: u64, end: u64, total: Option<u64>) -> Self {
        Self {
            state: Mutex::new(RangeState {
                start,
                end,
                total,
                cancel_seek: false,
                interrupted: false,
                listener: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// 更新已可读的字节范围 `[start, end)` 与总长度
    pub fn set_range(&self, start: u64, end: u64, total: Option<u64>) {
        let mut state = self.state.lock();
        state.start = start;
        state.end = end;
        state.total = total;
        self.cond.notify_all();
    }

    /// 让阻塞中的读取立即失败（宿主放弃等待数据时使用）
    pub fn set_cancel_seek(&self, cancel: bool) {
        let mut state = self.state.lock();
        state.cancel_seek = cancel;
        self.cond.notify_all();
    }

    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.cond.notify_all();
    }

    pub fn set_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.state.lock().listener = Some(listener);
    }

    pub fn total(&self) -> Option<u64> {
        self.state.lock().total
    }

    /// 等待 `offset` 可读，返回可读字节数上限；`Ok(None)` 表示 EOF
    fn wait_readable(&self, offset: u64) -> io::Result<Option<u64>> {
        let mut state = self.state.lock();
        let mut requested = false;
        loop {
            if state.interrupted {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "会话已中断"));
            }
            if state.cancel_seek {
                return Err(io::Error::new(io::ErrorKind::Other, "读取已取消"));
            }
            if matches!(state.total, Some(total) if offset >= total) {
                return Ok(None);
            }
            if state.start <= offset && offset < state.end {
                return Ok(Some(state.end - offset));
            }
            if !requested {
                requested = true;
                if let Some(listener) = state.listener.clone() {
                    // 回调里宿主可能直接调用 set_range
                    MutexGuard::unlocked(&mut state, || {
                        listener.on_event(PlayerEvent::DataRequest { offset });
                    });
                }
                continue;
            }
            self.cond.wait(&mut state);
        }
    }
}

/// 渐进式字节源：只允许读取宿主已声明可用的范围
///
/// 读取位置不在范围内时发出一次 `DataRequest` 并阻塞，
/// 直到范围更新、取消或会话中断。
pub struct RangedSource<R> {
    inner: R,
    offset: u64,
    control: Arc<RangeControl>,
}

impl<R: Read + Seek + Send> RangedSource<R> {
    /// 范围为空、总长度未知
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            control: Arc::new(RangeControl::new(0, 0, None)),
        }
    }

    /// 全部数据已就绪
    pub fn complete(inner: R, len: u64) -> Self {
        Self {
            inner,
            offset: 0,
            control: Arc::new(RangeControl::new(0, len, Some(len))),
        }
    }

    pub fn control(&self) -> Arc<RangeControl> {
        self.control.clone()
    }
}

impl RangedSource<File> {
    pub fn open_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::complete(file, len))
    }
}

impl<R: Read + Seek + Send> ByteSource for RangedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.control.wait_readable(self.offset)? {
            None => Ok(0),
            Some(available) => {
                let len = buf.len().min(available.min(usize::MAX as u64) as usize);
                let read = self.inner.read(&mut buf[..len])?;
                self.offset += read as u64;
                Ok(read)
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::End(delta) => {
                let total = self.control.total().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "总长度未知，无法从末尾定位")
                })?;
                SeekFrom::Start((total as i64 + delta).max(0) as u64)
            }
            other => other,
        };
        self.offset = self.inner.seek(target)?;
        Ok(self.offset)
    }

    fn size(&self) -> Option<u64> {
        self.control.total()
    }
}
