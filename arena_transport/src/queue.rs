// arena_transport/src/queue.rs

//! 有界的“丢弃最旧”帧队列。
//!
//! 图像子通道使用此队列缓存待发送的帧。消费端处理缓慢时，新帧会挤掉最旧的帧，
//! 因此单个连接在应用层面积压的图像数据有上限。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// 有界的丢弃最旧队列。
#[derive(Debug)]
pub struct FrameQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> FrameQueue<T> {
    /// 创建一个新的队列，容量至少为 1。
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// 入队一帧。队列已满时丢弃并返回最旧的一帧；队列已关闭时原样返回新帧。
    pub fn push(&self, item: T) -> Option<T> {
        if self.is_closed() {
            return Some(item);
        }
        let evicted = {
            let mut items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// 出队最旧的一帧。
    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    /// 等待新帧入队或队列关闭。
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// 关闭队列并唤醒等待方；关闭后的入队操作会被拒绝。
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因队列已满而被丢弃的帧总数。
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
