use std::collections::VecDeque;

/// 从池中取出的缓冲区
///
/// 句柄是独占的：`release` / `add` 会消费它，同一个缓冲区不可能被归还两次。
#[derive(Debug)]
pub struct PoolBuffer<E> {
    slot: usize,
    data: Vec<u8>,
    extra: Option<E>,
}

impl<E> PoolBuffer<E> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn extra(&self) -> Option<&E> {
        self.extra.as_ref()
    }
}

/// 固定容量的可复用缓冲池，分为 free / busy 两侧
///
/// 缓冲区大小只增不减，`extend` 之后由 `prepare` 按需重新分配（保留原内容）。
/// 池本身不加锁，调用方在外部互斥锁内使用。
#[derive(Debug)]
pub struct BufferPool<E> {
    buffer_size: usize,
    capacity: usize,
    free: VecDeque<PoolBuffer<E>>,
    busy: VecDeque<PoolBuffer<E>>,
}

impl<E> BufferPool<E> {
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|slot| PoolBuffer {
                slot,
                data: vec![0; buffer_size],
                extra: None,
            })
            .collect();
        Self {
            buffer_size,
            capacity,
            free,
            busy: VecDeque::with_capacity(capacity),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    /// 已被取出、尚未归还的缓冲区个数
    pub fn outstanding(&self) -> usize {
        self.capacity - self.free.len() - self.busy.len()
    }

    /// 提高缓冲区大小，已分配的缓冲区在下次 `prepare` 时扩容
    pub fn extend(&mut self, buffer_size: usize) {
        if buffer_size > self.buffer_size {
            self.buffer_size = buffer_size;
        }
    }

    /// 从 free 侧取出一个缓冲区，保证其大小不小于 `buffer_size()`
    pub fn prepare(&mut self) -> Option<PoolBuffer<E>> {
        let mut buffer = self.free.pop_front()?;
        if buffer.data.len() < self.buffer_size {
            buffer.data.resize(self.buffer_size, 0);
        }
        Some(buffer)
    }

    /// 填充完成，放入 busy 侧
    pub fn add(&mut self, mut buffer: PoolBuffer<E>, extra: E) {
        debug_assert!(buffer.slot < self.capacity);
        buffer.extra = Some(extra);
        self.busy.push_back(buffer);
    }

    /// 从 busy 侧取出最早的缓冲区
    pub fn seize(&mut self) -> Option<PoolBuffer<E>> {
        self.busy.pop_front()
    }

    /// 归还到 free 侧
    pub fn release(&mut self, mut buffer: PoolBuffer<E>) {
        debug_assert!(buffer.slot < self.capacity);
        debug_assert!(self.free.len() + self.busy.len() < self.capacity);
        buffer.extra = None;
        self.free.push_back(buffer);
    }

    /// 丢弃所有待消费的缓冲区
    pub fn clear(&mut self) {
        while let Some(mut buffer) = self.busy.pop_front() {
            buffer.extra = None;
            self.free.push_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn grows_but_never_shrinks() {
        let mut pool: BufferPool<()> = BufferPool::new(16, 2);
        let mut buffer = pool.prepare().unwrap();
        buffer.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        pool.release(buffer);

        pool.extend(64);
        pool.extend(32);
        assert_eq!(pool.buffer_size(), 64);

        // 先取出未使用过的那个，再取回写过数据的那个
        let untouched = pool.prepare().unwrap();
        let reused = pool.prepare().unwrap();
        assert_eq!(untouched.data().len(), 64);
        assert_eq!(reused.data().len(), 64);
        assert_eq!(&reused.data()[..4], &[1, 2, 3, 4]);
        assert!(pool.prepare().is_none());
    }

    #[test]
    fn busy_side_is_fifo_and_clear_returns_everything() {
        let mut pool = BufferPool::new(4, 3);
        for i in 0..3 {
            let buffer = pool.prepare().unwrap();
            pool.add(buffer, i);
        }
        assert_eq!(pool.busy_count(), 3);
        let first = pool.seize().unwrap();
        assert_eq!(first.extra(), Some(&0));
        pool.release(first);
        pool.clear();
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn fuzzed_cycle_conserves_buffers() {
        let capacity = 3;
        let mut pool = BufferPool::new(8, capacity);
        let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
        let mut filling = Vec::new();
        let mut drawing = Vec::new();

        for step in 0..20_000u64 {
            match rng.next() % 6 {
                0 => {
                    if let Some(buffer) = pool.prepare() {
                        filling.push(buffer);
                    }
                }
                1 => {
                    if let Some(buffer) = filling.pop() {
                        pool.add(buffer, step);
                    }
                }
                2 => {
                    if let Some(buffer) = pool.seize() {
                        drawing.push(buffer);
                    }
                }
                3 => {
                    if let Some(buffer) = drawing.pop() {
                        pool.release(buffer);
                    }
                }
                4 => pool.clear(),
                _ => pool.extend(8 + (rng.next() % 64) as usize),
            }

            assert!(pool.busy_count() <= capacity);
            assert_eq!(pool.outstanding(), filling.len() + drawing.len());
            assert_eq!(pool.free_count() + pool.busy_count() + pool.outstanding(), capacity);
        }

        for buffer in filling.drain(..).chain(drawing.drain(..)) {
            pool.release(buffer);
        }
        pool.clear();
        assert_eq!(pool.free_count(), capacity);

        let mut slots: Vec<_> = std::iter::from_fn(|| pool.prepare()).map(|b| b.slot()).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
