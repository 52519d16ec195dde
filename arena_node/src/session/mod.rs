//! 传输会话管理。
//!
//! 每个进程按拓扑承担以下一种或两种角色：
//! - **服务端** (`server`): 中枢与相机来源设备发布 `"<设备名>Channel"` 服务，接受对端连接。
//! - **消费端** (`consumer`): 连接到对端发布的服务。叶子设备连接中枢，中枢连接相机来源，
//!   请求了某相机图像的设备也会连接该相机。
//!
//! 两种角色的连接在握手完成后都交给 `pump_link`：一个读循环把入站帧交给通道复用器，
//! 一个写任务把出站队列写入 WebSocket。

pub mod connection_manager;
pub mod consumer;
pub mod server;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use arena_models::SourceDevice;
use arena_transport::connection::{WireSink, WireStream, is_recoverable, receive_wire_message};
use arena_transport::frame::{ANNOUNCE_MESSAGE_TYPE, PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE};
use arena_transport::{ControlEnvelope, ServiceDirectory, WireMessage};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channels::link::{LinkReceiver, PeerLink, run_writer};
use crate::channels::multiplexer::ChannelMultiplexer;
use crate::config::{ChannelConfig, SessionConfig};
use connection_manager::ConnectionManager;

/// 本机发布的服务。
#[derive(Debug)]
struct PublishedServer {
    service: String,
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// 会话管理器：负责服务发布、连接建立、断线处理与重连。
pub struct SessionManager {
    own: SourceDevice,
    settings: SessionConfig,
    channel_settings: ChannelConfig,
    directory: Arc<ServiceDirectory>,
    connections: Arc<ConnectionManager>,
    multiplexer: Arc<ChannelMultiplexer>,
    consumers: DashMap<SourceDevice, JoinHandle<()>>,
    server: Mutex<Option<PublishedServer>>,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(
        settings: SessionConfig,
        channel_settings: ChannelConfig,
        directory: Arc<ServiceDirectory>,
        multiplexer: Arc<ChannelMultiplexer>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            own: multiplexer.own_device(),
            settings,
            channel_settings,
            directory,
            connections: Arc::clone(multiplexer.connections()),
            multiplexer,
            consumers: DashMap::new(),
            server: Mutex::new(None),
            shutdown,
        })
    }

    pub fn own_device(&self) -> SourceDevice {
        self.own
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 等待直到 `shutdown` 被调用。
    async fn shutdown_requested(&self) {
        let mut receiver = self.shutdown.subscribe();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// 停止会话：撤回服务、停止接受连接、停止所有消费端循环并关闭所有连接。
    pub async fn shutdown(&self) {
        info!("[会话管理] {} 正在关闭会话...", self.own);
        self.shutdown.send_replace(true);

        let published = self
            .server
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(published) = published {
            published.accept_task.abort();
            self.directory.withdraw(&published.service);
            info!("[会话管理] 服务 {} ({}) 已停止并撤回。", published.service, published.addr);
        }

        self.connections.close_all();

        let targets: Vec<SourceDevice> = self.consumers.iter().map(|entry| *entry.key()).collect();
        for target in targets {
            if let Some((_, handle)) = self.consumers.remove(&target) {
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("[会话管理] 到 {} 的消费端任务异常结束: {:?}", target, e);
                    }
                }
            }
        }
        info!("[会话管理] {} 的会话已关闭。", self.own);
    }
}

/// 运行一条已握手的连接直到其结束：派生写任务，在当前任务中执行读循环。
pub(crate) async fn pump_link<S>(
    link: &Arc<PeerLink>,
    receiver: LinkReceiver,
    sink: WireSink<S>,
    mut stream: WireStream<S>,
    multiplexer: &ChannelMultiplexer,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let writer = tokio::spawn(run_writer(Arc::clone(link), receiver, sink));

    loop {
        let received = tokio::select! {
            biased;
            _ = link.closed() => {
                debug!("[会话管理] 与 {} 的连接收到关闭请求，读循环结束。", link.peer);
                break;
            }
            received = receive_wire_message(&mut stream) => received,
        };

        match received {
            Some(Ok(WireMessage::Frame(frame))) => {
                link.touch();
                multiplexer.dispatch_inbound(link.peer, frame);
            }
            Some(Ok(WireMessage::Control(envelope))) => {
                link.touch();
                handle_control(link, &envelope);
            }
            Some(Err(e)) if is_recoverable(&e) => {
                warn!("[会话管理] 丢弃来自 {} 的无法解析的消息: {}", link.peer, e);
            }
            Some(Err(e)) => {
                warn!("[会话管理] 与 {} 的连接出现协议错误，连接将被关闭: {}", link.peer, e);
                break;
            }
            None => {
                info!("[会话管理] {} 关闭了连接。", link.peer);
                break;
            }
        }
    }

    link.request_close();
    if let Err(e) = writer.await {
        error!("[会话管理] 与 {} 的写任务异常结束: {:?}", link.peer, e);
    }
}

fn handle_control(link: &PeerLink, envelope: &ControlEnvelope) {
    match envelope.message_type.as_str() {
        PING_MESSAGE_TYPE => match ControlEnvelope::pong() {
            Ok(pong) => {
                if let Err(e) = link.send_control(pong) {
                    debug!("[会话管理] 向 {} 回复 Pong 失败: {}", link.peer, e);
                }
            }
            Err(e) => error!("[会话管理] 创建 Pong 消息失败: {}", e),
        },
        PONG_MESSAGE_TYPE => {
            debug!("[会话管理] 收到 {} 的 Pong。", link.peer);
        }
        ANNOUNCE_MESSAGE_TYPE => {
            warn!("[会话管理] 连接建立后再次收到 {} 的宣告，已忽略。", link.peer);
        }
        other => {
            warn!("[会话管理] 收到 {} 的未知控制消息类型 '{}'，已忽略。", link.peer, other);
        }
    }
}
