// arena_node/src/session/consumer.rs

//! 消费端路径：浏览服务、连接、宣告身份、运行连接、断线后重置状态并重新浏览。

use std::sync::Arc;

use arena_models::SourceDevice;
use arena_models::topology::{is_hub, publishes_service, service_name};
use arena_transport::client::transport::{ClientConnection, connect_client};
use arena_transport::connection::send_wire_message;
use arena_transport::{ControlEnvelope, WireMessage};
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};

use super::{SessionManager, pump_link};
use crate::channels::link::{LinkRole, PeerLink};

impl SessionManager {
    /// 确保本机正在消费 `target` 发布的服务。已在消费时为空操作，返回是否新启动了消费循环。
    pub fn ensure_consuming(self: &Arc<Self>, target: SourceDevice) -> bool {
        if target == self.own {
            warn!("[会话管理] 忽略连接本机服务 ({}) 的请求。", target);
            return false;
        }
        if !publishes_service(target) {
            warn!("[会话管理] {} 不发布服务，无法连接。", target);
            return false;
        }
        if self.is_shutting_down() {
            debug!("[会话管理] 会话正在关闭，不再启动到 {} 的消费循环。", target);
            return false;
        }
        match self.consumers.entry(target) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let manager = Arc::clone(self);
                let handle = tokio::spawn(async move { manager.consume_loop(target).await });
                vacant.insert(handle);
                info!("[会话管理] {} 开始消费 {} 的服务。", self.own, target);
                true
            }
        }
    }

    pub fn is_consuming(&self, target: SourceDevice) -> bool {
        self.consumers.contains_key(&target)
    }

    /// 到单个目标的消费循环，直到会话关闭。
    async fn consume_loop(self: Arc<Self>, target: SourceDevice) {
        let service = service_name(target);
        loop {
            let addr = tokio::select! {
                _ = self.shutdown_requested() => return,
                addr = self.directory.browse(&service) => addr,
            };
            info!("[会话管理] 发现服务 {}，地址 {}，正在连接...", service, addr);

            let connection = tokio::select! {
                _ = self.shutdown_requested() => return,
                connection = connect_client(addr) => connection,
            };
            let ClientConnection {
                mut ws_sender,
                ws_receiver,
                server_addr,
            } = match connection {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(
                        "[会话管理] 连接 {} ({}) 失败: {}，{:?} 后重试。",
                        service,
                        addr,
                        e,
                        self.settings.reconnect_retry()
                    );
                    if self.pause(self.settings.reconnect_retry()).await {
                        return;
                    }
                    continue;
                }
            };

            let announced = match ControlEnvelope::announce(self.own.display_name()) {
                Ok(envelope) => send_wire_message(&mut ws_sender, WireMessage::Control(envelope)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = announced {
                warn!("[会话管理] 向 {} 宣告身份失败: {}，稍后重试。", target, e);
                if self.pause(self.settings.reconnect_retry()).await {
                    return;
                }
                continue;
            }

            let (link, receiver) = PeerLink::new(target, LinkRole::Consumer, server_addr, &self.channel_settings);
            if let Some(previous) = self.connections.register(Arc::clone(&link)) {
                previous.request_close();
            }
            info!("[会话管理] {} 已作为消费端连接到 {} ({})", self.own, target, server_addr);
            self.multiplexer.refresh_channel_status();
            if is_hub(target) {
                self.multiplexer.broadcast_all_states();
            }

            let pinger = {
                let link = Arc::clone(&link);
                let interval = self.settings.heartbeat_interval();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = link.closed() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                        match ControlEnvelope::ping() {
                            Ok(ping) => {
                                if let Err(e) = link.send_control(ping) {
                                    debug!("[会话管理] 向 {} 发送 Ping 失败: {}", link.peer, e);
                                }
                            }
                            Err(e) => warn!("[会话管理] 创建 Ping 消息失败: {}", e),
                        }
                    }
                })
            };

            pump_link(&link, receiver, ws_sender, ws_receiver, &self.multiplexer).await;
            pinger.abort();

            self.handle_consumer_disconnect(&link);
            if self.is_shutting_down() {
                return;
            }

            let settle = self.settings.reconnect_settle();
            debug!("[会话管理] 等待服务 {} 撤回（最多 {:?}）后重新浏览。", service, settle);
            let withdrawn = tokio::select! {
                _ = self.shutdown_requested() => return,
                withdrawn = self.directory.wait_withdrawn(&service, settle) => withdrawn,
            };
            if withdrawn {
                info!("[会话管理] 服务 {} 已撤回，等待其重新发布。", service);
            } else {
                info!("[会话管理] 服务 {} 仍在目录中，重新连接。", service);
            }
        }
    }

    /// 断线后丢弃目标设备的旧状态，重新计算本机通道状态。
    ///
    /// 状态只在叶子的消费端连接与中枢的服务端连接之间流动。消费端连接断开后，唯一还能继续带来
    /// 对端状态的，是中枢上由该设备连入的服务端连接（例如中枢消费相机来源时，相机仍连着中枢）。
    /// 其余情况一律重置。
    fn handle_consumer_disconnect(&self, link: &PeerLink) {
        self.connections.remove_if_current(link);
        let state_still_flows = is_hub(self.own) && self.connections.has_link(link.peer, LinkRole::Server);
        if state_still_flows {
            info!("[会话管理] 与 {} 的消费端连接已断开，其状态仍由服务端连接维护。", link.peer);
        } else {
            info!("[会话管理] 与 {} 的消费端连接已断开，其状态被重置为未知。", link.peer);
            self.multiplexer.store().reset(link.peer);
        }
        self.multiplexer.refresh_channel_status();
    }

    /// 可被关闭打断的等待，返回 `true` 表示会话正在关闭。
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_requested() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_models::{ChannelStatus, DeviceState};
    use arena_transport::ServiceDirectory;

    use crate::channels::multiplexer::ChannelMultiplexer;
    use crate::config::{ChannelConfig, SessionConfig};
    use crate::session::connection_manager::ConnectionManager;
    use crate::test_support::attach_link;

    fn session_for(own: SourceDevice) -> Arc<SessionManager> {
        let connections = Arc::new(ConnectionManager::new());
        let multiplexer = Arc::new(ChannelMultiplexer::new(own, connections));
        SessionManager::new(
            SessionConfig::default(),
            ChannelConfig::default(),
            Arc::new(ServiceDirectory::new()),
            multiplexer,
        )
    }

    #[test]
    fn test_camera_leaf_resets_hub_state_even_while_hub_consumes_it() {
        let session = session_for(SourceDevice::RoverPhone);
        let (to_hub, _to_hub_rx) = attach_link(&session.connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        let (_from_hub, _from_hub_rx) = attach_link(&session.connections, SourceDevice::ArenaPad, LinkRole::Server);

        let mut hub_state = DeviceState::new(SourceDevice::ArenaPad);
        hub_state.channel_status = ChannelStatus::Server;
        hub_state.battery_level = 0.75;
        session.multiplexer.store().replace(hub_state);

        session.handle_consumer_disconnect(&to_hub);

        assert_eq!(
            session.multiplexer.store().get(SourceDevice::ArenaPad),
            DeviceState::new(SourceDevice::ArenaPad)
        );
        assert!(session.connections.has_link(SourceDevice::ArenaPad, LinkRole::Server));
        assert_eq!(
            session.multiplexer.store().local().channel_status,
            ChannelStatus::Disconnected
        );
    }

    #[test]
    fn test_hub_keeps_camera_state_while_camera_still_connects_in() {
        let session = session_for(SourceDevice::ArenaPad);
        let (to_tripod, _to_tripod_rx) = attach_link(&session.connections, SourceDevice::TripodPhone, LinkRole::Consumer);
        let (_from_tripod, _from_tripod_rx) =
            attach_link(&session.connections, SourceDevice::TripodPhone, LinkRole::Server);

        let mut tripod_state = DeviceState::new(SourceDevice::TripodPhone);
        tripod_state.frames_per_second = 24.0;
        session.multiplexer.store().replace(tripod_state.clone());

        session.handle_consumer_disconnect(&to_tripod);

        assert_eq!(session.multiplexer.store().get(SourceDevice::TripodPhone), tripod_state);
        assert_eq!(
            session.multiplexer.store().local().channel_status,
            ChannelStatus::Server
        );
    }

    #[test]
    fn test_hub_resets_camera_state_without_other_link() {
        let session = session_for(SourceDevice::ArenaPad);
        let (to_rover, _to_rover_rx) = attach_link(&session.connections, SourceDevice::RoverPhone, LinkRole::Consumer);

        let mut rover_state = DeviceState::new(SourceDevice::RoverPhone);
        rover_state.battery_level = 0.5;
        session.multiplexer.store().replace(rover_state);

        session.handle_consumer_disconnect(&to_rover);

        assert_eq!(
            session.multiplexer.store().get(SourceDevice::RoverPhone),
            DeviceState::new(SourceDevice::RoverPhone)
        );
        assert!(session.connections.route(SourceDevice::RoverPhone).is_none());
    }
}
