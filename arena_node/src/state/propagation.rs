// arena_node/src/state/propagation.rs

//! 星型状态传播协议。
//!
//! - 本机状态修改后立即传播：中枢发给所有服务端连接，其他设备只发给中枢。
//! - 中枢收到任一设备的状态后，转发给除该设备以外的所有连接设备。
//! - 叶子设备之间从不直接交换状态。
//!
//! 广播不做相等性过滤，重复的状态会被照常发送，接收方整体替换后内容不变。
//! 角色不符的调用（在叶子设备上“向所有设备广播某设备状态”，或在中枢上
//! “广播全部状态”）属于编程错误，直接 panic。

use arena_models::topology::{self, is_hub};
use arena_models::{ContentType, DeviceState, SourceDevice};
use log::debug;

use crate::channels::handler_table::ChannelPayload;
use crate::channels::link::LinkRole;
use crate::channels::multiplexer::ChannelMultiplexer;

impl ChannelMultiplexer {
    /// 修改本机状态并立即传播，返回修改后的状态。
    pub fn update_local_state<F>(&self, mutate: F) -> DeviceState
    where
        F: FnOnce(&mut DeviceState),
    {
        let state = self.store.mutate_local(mutate);
        self.propagate_local(&state);
        state
    }

    fn propagate_local(&self, state: &DeviceState) {
        let payload = ChannelPayload::State(state.clone());
        if is_hub(self.own) {
            for link in self.connections.server_links() {
                if let Err(e) = self.send_content(link.peer, LinkRole::Server, &payload) {
                    self.log_send_failure(link.peer, ContentType::State, &e);
                }
            }
        } else {
            let hub = topology::hub();
            if let Err(e) = self.send_content(hub, LinkRole::Consumer, &payload) {
                self.log_send_failure(hub, ContentType::State, &e);
            }
        }
    }

    /// 中枢专用：把 `device` 的当前状态发给除它以外的所有连接设备。
    pub fn broadcast_state_to_all(&self, device: SourceDevice) {
        assert!(
            is_hub(self.own),
            "broadcast_state_to_all({}) 只能在中枢上调用，本机为 {}",
            device,
            self.own
        );
        let payload = ChannelPayload::State(self.store.get(device));
        let mut sent = 0usize;
        for link in self.connections.server_links() {
            if link.peer == device {
                continue;
            }
            match self.send_content(link.peer, LinkRole::Server, &payload) {
                Ok(()) => sent += 1,
                Err(e) => self.log_send_failure(link.peer, ContentType::State, &e),
            }
        }
        debug!("[状态同步] {} 的状态已转发给 {} 台设备。", device, sent);
    }

    /// 叶子设备专用：把本机的权威状态发给中枢。
    pub fn broadcast_all_states(&self) {
        assert!(
            !is_hub(self.own),
            "broadcast_all_states 不能在中枢 {} 上调用",
            self.own
        );
        let hub = topology::hub();
        let payload = ChannelPayload::State(self.store.local());
        if let Err(e) = self.send_content(hub, LinkRole::Consumer, &payload) {
            self.log_send_failure(hub, ContentType::State, &e);
        }
    }

    /// 中枢专用：新设备连入后，把除它自身以外的所有已知状态发给它。
    pub fn sync_all_states_to(&self, device: SourceDevice) {
        assert!(
            is_hub(self.own),
            "sync_all_states_to({}) 只能在中枢上调用，本机为 {}",
            device,
            self.own
        );
        for state in self.store.snapshot().into_values() {
            if state.source_device == device {
                continue;
            }
            let payload = ChannelPayload::State(state);
            if let Err(e) = self.send_content(device, LinkRole::Server, &payload) {
                self.log_send_failure(device, ContentType::State, &e);
                return;
            }
        }
        debug!("[状态同步] 已向新连入的 {} 发送初始状态。", device);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arena_models::{BatteryState, ChannelStatus, ContentType};
    use arena_transport::ChannelFrame;

    use super::*;
    use crate::session::connection_manager::ConnectionManager;
    use crate::test_support::{attach_link, drain_states};

    fn hub_mux() -> (Arc<ConnectionManager>, ChannelMultiplexer) {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::ArenaPad, Arc::clone(&connections));
        (connections, mux)
    }

    fn state_frame(state: &DeviceState) -> ChannelFrame {
        ChannelFrame::new(ContentType::State, serde_json::to_vec(state).unwrap())
    }

    #[test]
    fn test_hub_relays_leaf_state_to_every_other_leaf() {
        let (connections, hub) = hub_mux();
        let (_a, mut a_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);
        let (_b, mut b_rx) = attach_link(&connections, SourceDevice::RoverPhone, LinkRole::Server);
        let (_c, mut c_rx) = attach_link(&connections, SourceDevice::TripodPhone, LinkRole::Server);

        let mut update = DeviceState::new(SourceDevice::PilotPhone);
        update.set_battery(0.42, BatteryState::Unplugged);
        hub.dispatch_inbound(SourceDevice::PilotPhone, state_frame(&update));

        assert_eq!(hub.store().get(SourceDevice::PilotPhone), update);
        assert!(drain_states(&mut a_rx).is_empty(), "发送方不应收到自己状态的回显");
        for rx in [&mut b_rx, &mut c_rx] {
            let relayed = drain_states(rx);
            assert_eq!(relayed, vec![update.clone()]);
            assert_eq!(relayed[0].source_device, SourceDevice::PilotPhone);
        }
    }

    #[test]
    fn test_leaf_does_not_relay_received_state() {
        let connections = Arc::new(ConnectionManager::new());
        let leaf = ChannelMultiplexer::new(SourceDevice::TripodPhone, Arc::clone(&connections));
        let (_hub, mut hub_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        let (_pilot, mut pilot_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);

        let relayed = DeviceState::new(SourceDevice::PilotPhone);
        leaf.dispatch_inbound(SourceDevice::ArenaPad, state_frame(&relayed));

        assert_eq!(leaf.store().get(SourceDevice::PilotPhone), relayed);
        assert!(drain_states(&mut hub_rx).is_empty());
        assert!(drain_states(&mut pilot_rx).is_empty());
    }

    #[test]
    fn test_local_update_goes_to_hub_only_on_leaf() {
        let connections = Arc::new(ConnectionManager::new());
        let leaf = ChannelMultiplexer::new(SourceDevice::RoverPhone, Arc::clone(&connections));
        let (_hub, mut hub_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        let (_viewer, mut viewer_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);

        leaf.update_local_state(|state| state.frames_per_second = 12.0);

        let pushed = drain_states(&mut hub_rx);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].source_device, SourceDevice::RoverPhone);
        assert_eq!(pushed[0].frames_per_second, 12.0);
        assert!(drain_states(&mut viewer_rx).is_empty());
    }

    #[test]
    fn test_local_update_fans_out_on_hub_without_equality_gating() {
        let (connections, hub) = hub_mux();
        let (_a, mut a_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);
        let (_b, mut b_rx) = attach_link(&connections, SourceDevice::SparePhone, LinkRole::Server);

        hub.update_local_state(|state| state.battery_level = 0.5);
        hub.update_local_state(|state| state.battery_level = 0.5);

        for rx in [&mut a_rx, &mut b_rx] {
            let pushed = drain_states(rx);
            assert_eq!(pushed.len(), 2);
            assert_eq!(pushed[0], pushed[1]);
        }
    }

    #[test]
    fn test_sync_all_states_excludes_newcomer_entry() {
        let (connections, hub) = hub_mux();
        let (_a, mut a_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);
        hub.sync_all_states_to(SourceDevice::PilotPhone);

        let synced = drain_states(&mut a_rx);
        assert_eq!(synced.len(), SourceDevice::ALL.len() - 1);
        assert!(synced.iter().all(|s| s.source_device != SourceDevice::PilotPhone));
    }

    #[test]
    fn test_hub_reset_broadcasts_default_state() {
        let (connections, hub) = hub_mux();
        let (_a, mut a_rx) = attach_link(&connections, SourceDevice::PilotPhone, LinkRole::Server);
        let mut tripod = DeviceState::new(SourceDevice::TripodPhone);
        tripod.channel_status = ChannelStatus::Consumer;
        hub.store().replace(tripod);

        hub.store().reset(SourceDevice::TripodPhone);
        hub.broadcast_state_to_all(SourceDevice::TripodPhone);

        let pushed = drain_states(&mut a_rx);
        assert_eq!(pushed, vec![DeviceState::new(SourceDevice::TripodPhone)]);
        assert_eq!(pushed[0].channel_status, ChannelStatus::Disconnected);
    }

    #[test]
    fn test_leaf_broadcast_all_states_sends_own_state_to_hub() {
        let connections = Arc::new(ConnectionManager::new());
        let leaf = ChannelMultiplexer::new(SourceDevice::PilotPhone, Arc::clone(&connections));
        let (_hub, mut hub_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        leaf.broadcast_all_states();
        let pushed = drain_states(&mut hub_rx);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].source_device, SourceDevice::PilotPhone);
    }

    #[test]
    #[should_panic(expected = "只能在中枢上调用")]
    fn test_broadcast_state_to_all_panics_on_leaf() {
        let connections = Arc::new(ConnectionManager::new());
        let leaf = ChannelMultiplexer::new(SourceDevice::PilotPhone, connections);
        leaf.broadcast_state_to_all(SourceDevice::RoverPhone);
    }

    #[test]
    #[should_panic(expected = "不能在中枢")]
    fn test_broadcast_all_states_panics_on_hub() {
        let (_connections, hub) = hub_mux();
        hub.broadcast_all_states();
    }
}
