use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// 无界阻塞队列
///
/// `pop(true)` 在队列为空时阻塞，直到有新元素或被 `interrupt()` 唤醒。
pub struct BlockingQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cond: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    interrupted: bool,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                interrupted: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        self.cond.notify_one();
    }

    pub fn pop(&self, wait: bool) -> Option<T> {
        self.pop_tagged(wait, || ()).map(|(item, _)| item)
    }

    /// 取出队首元素，同时在队列锁内求值 `tag`
    pub fn pop_tagged<U>(&self, wait: bool, tag: impl FnOnce() -> U) -> Option<(T, U)> {
        let mut inner = self.inner.lock();
        loop {
            if inner.interrupted {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some((item, tag()));
            }
            if !wait {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 唤醒所有等待者，之后的 pop 一律返回 None
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupted = true;
        self.cond.notify_all();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
