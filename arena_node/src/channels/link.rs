// arena_node/src/channels/link.rs

//! 设备间连接 (`PeerLink`) 与其预先挂接的四个子通道。
//!
//! 每条连接在建立时创建一次四个 `SubChannel` 对象，之后所有发送都复用它们。
//! 出站数据进入两个队列：
//! - 命令/状态/协作共用一个有界有序队列 (`mpsc`)，满时丢弃新消息并报告 `QueueFull`。
//! - 图像使用 `FrameQueue`，满时丢弃最旧的一帧。
//!
//! 每条连接有且只有一个写任务 (`run_writer`) 负责把两个队列的内容写入 WebSocket 发送端。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use arena_models::{ContentType, SourceDevice};
use arena_transport::connection::{WireSink, close_sink, send_wire_message};
use arena_transport::{ChannelFrame, ControlEnvelope, FrameQueue, WireMessage};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// 本进程在一条连接上扮演的角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// 对端连入本机发布的服务。
    Server,
    /// 本机连入对端发布的服务。
    Consumer,
}

impl std::fmt::Display for LinkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkRole::Server => write!(f, "server"),
            LinkRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// 连接的出站句柄，可被多个子通道共享。
#[derive(Debug, Clone)]
struct LinkOutbound {
    ordered: mpsc::Sender<WireMessage>,
    images: Arc<FrameQueue<Vec<u8>>>,
    closing: Arc<AtomicBool>,
}

/// 连接上某一内容类型的子通道。
#[derive(Debug)]
pub struct SubChannel {
    peer: SourceDevice,
    content_type: ContentType,
    outbound: LinkOutbound,
}

impl SubChannel {
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// 把一段已编码的负载放入出站队列，不等待实际写出。
    pub fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        if self.outbound.closing.load(Ordering::SeqCst) {
            return Err(ChannelError::LinkClosed(self.peer));
        }
        if self.content_type == ContentType::Image {
            if let Some(evicted) = self.outbound.images.push(payload) {
                debug!(
                    "[通道复用] 发往 {} 的图像队列已满，丢弃最旧的一帧 ({} 字节)。",
                    self.peer,
                    evicted.len()
                );
            }
            return Ok(());
        }
        let frame = ChannelFrame::new(self.content_type, payload);
        self.outbound
            .ordered
            .try_send(WireMessage::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull {
                    device: self.peer,
                    content_type: self.content_type,
                },
                mpsc::error::TrySendError::Closed(_) => ChannelError::LinkClosed(self.peer),
            })
    }
}

/// 两个出站队列的接收端，由写任务独占。
#[derive(Debug)]
pub struct LinkReceiver {
    ordered: mpsc::Receiver<WireMessage>,
    images: Arc<FrameQueue<Vec<u8>>>,
}

impl LinkReceiver {
    /// 等待下一条待写出的消息。有序队列优先于图像队列；连接关闭后返回 `None`。
    pub async fn next(&mut self) -> Option<WireMessage> {
        loop {
            if let Some(message) = self.try_next() {
                return Some(message);
            }
            if self.images.is_closed() {
                return None;
            }
            tokio::select! {
                message = self.ordered.recv() => return message,
                _ = self.images.notified() => continue,
            }
        }
    }

    /// 不等待地取出下一条消息。
    pub fn try_next(&mut self) -> Option<WireMessage> {
        if let Ok(message) = self.ordered.try_recv() {
            return Some(message);
        }
        self.images
            .pop()
            .map(|bytes| WireMessage::Frame(ChannelFrame::new(ContentType::Image, bytes)))
    }
}

/// 一条已建立的设备间连接。
///
/// 由 `ConnectionManager` 以 `Arc<PeerLink>` 持有，读循环、写任务、心跳监视器共享同一实例。
#[derive(Debug)]
pub struct PeerLink {
    /// 每条连接唯一的标识，用于区分同一设备的新旧连接。
    pub link_id: Uuid,
    pub peer: SourceDevice,
    pub role: LinkRole,
    pub addr: SocketAddr,
    pub created_at: DateTime<Utc>,
    last_seen: RwLock<DateTime<Utc>>,
    sub_channels: [SubChannel; 4],
    control: mpsc::Sender<WireMessage>,
    images: Arc<FrameQueue<Vec<u8>>>,
    closing: Arc<AtomicBool>,
    close_notify: Notify,
}

impl PeerLink {
    /// 创建连接及其出站队列，返回连接与写任务使用的接收端。
    pub fn new(
        peer: SourceDevice,
        role: LinkRole,
        addr: SocketAddr,
        settings: &ChannelConfig,
    ) -> (Arc<Self>, LinkReceiver) {
        let (ordered_tx, ordered_rx) = mpsc::channel(settings.ordered_queue_capacity.max(1));
        let images = Arc::new(FrameQueue::new(settings.image_queue_frames));
        let closing = Arc::new(AtomicBool::new(false));
        let outbound = LinkOutbound {
            ordered: ordered_tx.clone(),
            images: Arc::clone(&images),
            closing: Arc::clone(&closing),
        };
        let sub_channels = ContentType::ALL.map(|content_type| SubChannel {
            peer,
            content_type,
            outbound: outbound.clone(),
        });
        let now = Utc::now();
        let link = Arc::new(Self {
            link_id: Uuid::new_v4(),
            peer,
            role,
            addr,
            created_at: now,
            last_seen: RwLock::new(now),
            sub_channels,
            control: ordered_tx,
            images: Arc::clone(&images),
            closing,
            close_notify: Notify::new(),
        });
        let receiver = LinkReceiver {
            ordered: ordered_rx,
            images,
        };
        (link, receiver)
    }

    /// 取得预先挂接的子通道。
    pub fn sub_channel(&self, content_type: ContentType) -> &SubChannel {
        let index = ContentType::ALL
            .iter()
            .position(|candidate| *candidate == content_type)
            .unwrap_or_default();
        &self.sub_channels[index]
    }

    /// 发送控制消息（Ping/Pong），与有序子通道共用队列。
    pub fn send_control(&self, envelope: ControlEnvelope) -> Result<(), ChannelError> {
        if self.is_closing() {
            return Err(ChannelError::LinkClosed(self.peer));
        }
        self.control
            .try_send(WireMessage::Control(envelope))
            .map_err(|_| ChannelError::LinkClosed(self.peer))
    }

    /// 记录收到了对端的消息。
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&self, at: DateTime<Utc>) {
        let mut last_seen = self.last_seen.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_seen = at;
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 请求关闭连接：读循环与写任务都会在下一次等待时退出。可重复调用。
    pub fn request_close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            debug!("[通道复用] 请求关闭与 {} 的 {} 连接 (link_id={})", self.peer, self.role, self.link_id);
        }
        self.images.close();
        self.close_notify.notify_waiters();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// 等待直到连接被请求关闭。
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closing() {
                return;
            }
            notified.await;
        }
    }
}

/// 连接的写任务：把出站队列中的消息依次写入发送端，直到连接关闭或写失败。
pub async fn run_writer<S>(link: Arc<PeerLink>, mut receiver: LinkReceiver, mut sink: WireSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = link.closed() => None,
            message = receiver.next() => message,
        };
        let Some(message) = next else {
            break;
        };
        if let Err(e) = send_wire_message(&mut sink, message).await {
            warn!("[通道复用] 向 {} 写出消息失败，连接将被关闭: {}", link.peer, e);
            link.request_close();
            break;
        }
    }
    close_sink(&mut sink).await;
    info!("[通道复用] 与 {} 的 {} 连接写任务已结束 (link_id={})", link.peer, link.role, link.link_id);
}
