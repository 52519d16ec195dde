// arena_node/src/session/server.rs

//! 服务端路径：发布服务、接受连接、身份宣告握手、初始状态同步与断线处理。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use arena_models::SourceDevice;
use arena_models::topology::{is_hub, service_name};
use arena_transport::connection::{WireStream, close_sink, receive_wire_message};
use arena_transport::frame::{ANNOUNCE_MESSAGE_TYPE, AnnouncePayload};
use arena_transport::server::transport::{ServerTransport, WsStream};
use arena_transport::{TransportError, WireMessage};
use futures_util::StreamExt;
use log::{info, warn};
use tokio::net::TcpStream;

use super::{PublishedServer, SessionManager, pump_link};
use crate::channels::link::{LinkRole, PeerLink};

impl SessionManager {
    /// 绑定监听地址并发布本机服务，返回发布到服务目录中的地址。
    pub async fn start_server(self: &Arc<Self>, listen_addr: &str) -> Result<SocketAddr, TransportError> {
        let listener = ServerTransport::bind(listen_addr).await?;
        let local = listener.local_addr()?;
        let published_addr = advertised_addr(local);
        let service = service_name(self.own);

        let manager = Arc::clone(self);
        let accept_task = tokio::spawn(async move {
            ServerTransport::start(listener, move |ws_stream, peer_addr| {
                let manager = Arc::clone(&manager);
                async move { manager.serve_connection(ws_stream, peer_addr).await }
            })
            .await;
        });

        self.directory.publish(&service, published_addr);
        info!("[会话管理] {} 已发布服务 {}，地址 {}", self.own, service, published_addr);
        let previous = self
            .server
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(PublishedServer {
                service,
                addr: published_addr,
                accept_task,
            });
        if let Some(previous) = previous {
            warn!("[会话管理] 重复启动服务端，旧的监听任务 ({}) 已停止。", previous.addr);
            previous.accept_task.abort();
        }
        Ok(published_addr)
    }

    /// 本机服务发布的地址（尚未启动服务端时为 `None`）。
    pub fn published_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|published| published.addr)
    }

    /// 处理一条已完成 WebSocket 握手的入站连接，直到它断开。
    async fn serve_connection(self: Arc<Self>, ws_stream: WsStream, peer_addr: SocketAddr) {
        let (mut sink, mut stream) = ws_stream.split();

        let handshake = tokio::time::timeout(
            self.settings.handshake_timeout(),
            self.await_announce(&mut stream, peer_addr),
        )
        .await;
        let peer = match handshake {
            Ok(Ok(peer)) => peer,
            Ok(Err(e)) => {
                warn!("[会话管理] 拒绝来自 {} 的连接: {}", peer_addr, e);
                close_sink(&mut sink).await;
                return;
            }
            Err(_) => {
                warn!(
                    "[会话管理] {} 未在 {:?} 内宣告身份，连接被关闭。",
                    peer_addr,
                    self.settings.handshake_timeout()
                );
                close_sink(&mut sink).await;
                return;
            }
        };
        if self.is_shutting_down() {
            close_sink(&mut sink).await;
            return;
        }

        let (link, receiver) = PeerLink::new(peer, LinkRole::Server, peer_addr, &self.channel_settings);
        if let Some(previous) = self.connections.register(Arc::clone(&link)) {
            previous.request_close();
        }
        info!("[会话管理] {} 已作为服务端接受 {} 的连接 ({})", self.own, peer, peer_addr);

        if is_hub(self.own) {
            self.multiplexer.sync_all_states_to(peer);
        }
        self.multiplexer.refresh_channel_status();

        pump_link(&link, receiver, sink, stream, &self.multiplexer).await;

        self.handle_server_disconnect(&link);
    }

    /// 读取并校验对端的第一条消息，它必须是身份宣告。
    async fn await_announce(
        &self,
        stream: &mut WireStream<TcpStream>,
        peer_addr: SocketAddr,
    ) -> Result<SourceDevice, TransportError> {
        let handshake_failed = |reason: String| TransportError::HandshakeFailed {
            peer: peer_addr,
            reason,
        };
        let envelope = match receive_wire_message(stream).await {
            Some(Ok(WireMessage::Control(envelope))) if envelope.message_type == ANNOUNCE_MESSAGE_TYPE => envelope,
            Some(Ok(WireMessage::Control(envelope))) => {
                return Err(handshake_failed(format!(
                    "第一条消息应为宣告，实际为 '{}'",
                    envelope.message_type
                )));
            }
            Some(Ok(WireMessage::Frame(frame))) => {
                return Err(handshake_failed(format!(
                    "宣告之前收到了 {} 子通道帧",
                    frame.content_type
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(handshake_failed("宣告之前连接已关闭".to_string())),
        };

        let announce: AnnouncePayload = envelope.deserialize_payload()?;
        let peer = SourceDevice::from_display_name(&announce.device_name)
            .ok_or_else(|| handshake_failed(format!("未知的设备名 '{}'", announce.device_name)))?;
        if peer == self.own {
            return Err(handshake_failed(format!("对端宣告的设备名与本机相同 ({})", peer)));
        }
        Ok(peer)
    }

    fn handle_server_disconnect(&self, link: &PeerLink) {
        if !self.connections.remove_if_current(link) {
            return;
        }
        info!("[会话管理] {} 与本机服务的连接已断开。", link.peer);
        if is_hub(self.own) {
            self.multiplexer.store().reset(link.peer);
            self.multiplexer.broadcast_state_to_all(link.peer);
        }
        self.multiplexer.refresh_channel_status();
    }
}

/// 监听在通配地址上时，发布本机回环地址，其他情况原样发布。
fn advertised_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port()),
        _ => local,
    }
}
