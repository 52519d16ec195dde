// arena_node/src/image_feed.rs

//! 图像推送：逐帧决定发给哪些设备。
//!
//! 设备 Q 的最近已知状态中 `requested_image_feed_sources` 包含本机时，Q 就是本机图像的接收方。
//! 接收方集合在每一帧都重新计算，请求列表的变化最晚在下一帧生效。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arena_models::{ContentType, DeviceState, SourceDevice};
use log::{debug, info};

use crate::channels::handler_table::ChannelPayload;
use crate::channels::multiplexer::ChannelMultiplexer;

/// 计算需要本机图像的设备。
pub fn required_recipients(own: SourceDevice, snapshot: &BTreeMap<SourceDevice, DeviceState>) -> Vec<SourceDevice> {
    snapshot
        .values()
        .filter(|state| state.source_device != own && state.wants_image_feed_from(own))
        .map(|state| state.source_device)
        .collect()
}

/// 按目标帧率限制发送频率。
#[derive(Debug)]
pub struct FrameThrottle {
    min_interval: Option<Duration>,
    last_sent: Mutex<Option<Instant>>,
}

impl FrameThrottle {
    /// `target_fps` 为 0 表示不限速。
    pub fn new(target_fps: u32) -> Self {
        let min_interval = (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64));
        Self {
            min_interval,
            last_sent: Mutex::new(None),
        }
    }

    pub fn should_send(&self) -> bool {
        self.should_send_at(Instant::now())
    }

    /// 距上一次放行的时间不少于最小间隔时放行，并记录本次时间。
    pub fn should_send_at(&self, now: Instant) -> bool {
        let Some(min_interval) = self.min_interval else {
            return true;
        };
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last_sent {
            Some(previous) if now.saturating_duration_since(previous) < min_interval => false,
            _ => {
                *last_sent = Some(now);
                true
            }
        }
    }
}

/// 图像发布者，由产生视频帧的设备使用。
pub struct ImageFeedPublisher {
    multiplexer: Arc<ChannelMultiplexer>,
    throttle: FrameThrottle,
    active_feeds: AtomicUsize,
}

impl ImageFeedPublisher {
    pub fn new(multiplexer: Arc<ChannelMultiplexer>, target_fps: u32) -> Self {
        Self {
            multiplexer,
            throttle: FrameThrottle::new(target_fps),
            active_feeds: AtomicUsize::new(0),
        }
    }

    /// 发布一帧已压缩的图像。
    ///
    /// 被限速跳过时返回 `None`；否则把帧发给当前所有接收方，返回接收方数量。
    pub fn publish_frame(&self, encoded: Vec<u8>) -> Option<usize> {
        if !self.throttle.should_send() {
            return None;
        }
        let own = self.multiplexer.own_device();
        let recipients = required_recipients(own, &self.multiplexer.store().snapshot());
        let previous = self.active_feeds.swap(recipients.len(), Ordering::SeqCst);
        if previous != recipients.len() {
            info!("[图像推送] 活跃图像订阅数: {} -> {} {:?}", previous, recipients.len(), recipients);
        }
        if recipients.is_empty() {
            return Some(0);
        }

        let payload = ChannelPayload::Image(encoded);
        for recipient in &recipients {
            if let Err(e) = self.multiplexer.send_to(*recipient, &payload) {
                self.multiplexer.log_send_failure(*recipient, ContentType::Image, &e);
            }
        }
        debug!("[图像推送] 一帧图像已发给 {} 台设备。", recipients.len());
        Some(recipients.len())
    }

    /// 最近一次发布时的接收方数量。
    pub fn active_image_feeds(&self) -> usize {
        self.active_feeds.load(Ordering::SeqCst)
    }
}
