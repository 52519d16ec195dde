// arena_node/src/channels/multiplexer.rs

//! 通道复用器：入站帧的解码与分发、出站负载的路由与编码。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arena_models::topology::{self, is_hub};
use arena_models::{ChannelStatus, ContentType, SourceDevice};
use arena_transport::ChannelFrame;
use log::{debug, info, warn};

use crate::channels::handler_table::{ChannelPayload, HandlerTable};
use crate::channels::link::LinkRole;
use crate::error::ChannelError;
use crate::session::connection_manager::ConnectionManager;
use crate::state::store::DeviceStateStore;

/// 帧率统计窗口长度。
pub const FRAME_RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    last_frame: Instant,
    frames: u32,
}

/// 按来源设备统计入站图像帧率。
#[derive(Debug, Default)]
pub struct FrameRateMeter {
    windows: Mutex<HashMap<SourceDevice, RateWindow>>,
}

impl FrameRateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧。当前窗口已满一秒时结束该窗口，返回其帧率并开始新窗口。
    pub fn record_frame_at(&self, source: SourceDevice, now: Instant) -> Option<f32> {
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows.entry(source).or_insert(RateWindow {
            started_at: now,
            last_frame: now,
            frames: 0,
        });
        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= FRAME_RATE_WINDOW {
            let rate = window.frames as f32 / elapsed.as_secs_f32();
            *window = RateWindow {
                started_at: now,
                last_frame: now,
                frames: 1,
            };
            Some(rate)
        } else {
            window.frames += 1;
            window.last_frame = now;
            None
        }
    }

    /// 丢弃超过一个窗口没有收到帧的来源。本次有来源过期且已没有任何活跃来源时返回 `true`。
    pub fn expire_stale_at(&self, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = windows.len();
        windows.retain(|source, window| {
            let active = now.saturating_duration_since(window.last_frame) < FRAME_RATE_WINDOW;
            if !active {
                debug!("[通道复用] 来自 {} 的图像流已停止。", source);
            }
            active
        });
        windows.len() < before && windows.is_empty()
    }
}

/// 通道复用器。
///
/// 持有设备状态表与处理器注册表，通过 `ConnectionManager` 找到目标设备的连接。
/// 状态传播相关的方法实现在 `state::propagation` 中。
pub struct ChannelMultiplexer {
    pub(crate) own: SourceDevice,
    pub(crate) connections: Arc<ConnectionManager>,
    pub(crate) store: DeviceStateStore,
    handlers: HandlerTable,
    frame_meter: FrameRateMeter,
}

impl ChannelMultiplexer {
    pub fn new(own: SourceDevice, connections: Arc<ConnectionManager>) -> Self {
        Self {
            own,
            connections,
            store: DeviceStateStore::new(own),
            handlers: HandlerTable::new(),
            frame_meter: FrameRateMeter::new(),
        }
    }

    pub fn own_device(&self) -> SourceDevice {
        self.own
    }

    pub fn store(&self) -> &DeviceStateStore {
        &self.store
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// 处理一条来自 `from` 的入站子通道帧。解码失败只记录日志并丢弃。
    pub fn dispatch_inbound(&self, from: SourceDevice, frame: ChannelFrame) {
        let payload = match ChannelPayload::decode(frame.content_type, &frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[通道复用] 丢弃来自 {} 的消息: {}", from, e);
                return;
            }
        };

        match &payload {
            ChannelPayload::State(state) => {
                if state.source_device == self.own {
                    debug!("[通道复用] 忽略 {} 转发的本机状态，本机副本为准。", from);
                    return;
                }
                let device = state.source_device;
                self.store.replace(state.clone());
                self.handlers.invoke(from, &payload);
                if is_hub(self.own) {
                    self.broadcast_state_to_all(device);
                }
            }
            ChannelPayload::Image(_) => {
                self.handlers.invoke(from, &payload);
                self.record_image_frame_at(from, Instant::now());
            }
            ChannelPayload::Command(_) | ChannelPayload::Collaboration(_) => {
                self.handlers.invoke(from, &payload);
            }
        }
    }

    /// 统计一帧入站图像，窗口结束时把帧率写入本机状态并传播。
    pub(crate) fn record_image_frame_at(&self, from: SourceDevice, now: Instant) {
        if let Some(rate) = self.frame_meter.record_frame_at(from, now) {
            debug!("[通道复用] 来自 {} 的图像帧率: {:.1} fps", from, rate);
            self.update_local_state(|state| state.frames_per_second = rate);
        }
    }

    /// 最后一个图像来源停止时把本机帧率归零。由节点按统计窗口周期调用。
    pub fn decay_frame_rate(&self) {
        self.decay_frame_rate_at(Instant::now());
    }

    pub(crate) fn decay_frame_rate_at(&self, now: Instant) {
        if self.frame_meter.expire_stale_at(now) && self.store.local().frames_per_second != 0.0 {
            info!("[通道复用] 已没有正在接收的图像流，本机帧率归零。");
            self.update_local_state(|state| state.frames_per_second = 0.0);
        }
    }

    /// 通过本机在指定角色下与 `target` 的连接发送负载。
    pub fn send_content(
        &self,
        target: SourceDevice,
        role: LinkRole,
        payload: &ChannelPayload,
    ) -> Result<(), ChannelError> {
        let link = self
            .connections
            .get(target, role)
            .ok_or(ChannelError::NoRoute(target))?;
        let bytes = payload.encode()?;
        link.sub_channel(payload.content_type()).send(bytes)
    }

    /// 按路由规则选择连接发送负载：优先服务端连接，其次消费端连接。
    pub fn send_to(&self, target: SourceDevice, payload: &ChannelPayload) -> Result<(), ChannelError> {
        let link = self
            .connections
            .route(target)
            .ok_or(ChannelError::NoRoute(target))?;
        let bytes = payload.encode()?;
        link.sub_channel(payload.content_type()).send(bytes)
    }

    /// 发送失败只记录日志：不可达为调试信息，其余为警告。
    pub(crate) fn log_send_failure(&self, target: SourceDevice, content_type: ContentType, error: &ChannelError) {
        match error {
            ChannelError::NoRoute(_) => {
                debug!("[通道复用] 跳过发往 {} 的 {} 消息: {}", target, content_type, error)
            }
            _ => warn!("[通道复用] 发往 {} 的 {} 消息发送失败: {}", target, content_type, error),
        }
    }

    /// 根据当前连接重新计算本机的通道状态，发生变化时走正常的本地状态传播。
    pub fn refresh_channel_status(&self) -> ChannelStatus {
        let status = if is_hub(self.own) {
            if self.connections.server_link_count() > 0 {
                ChannelStatus::Server
            } else {
                ChannelStatus::Disconnected
            }
        } else if self.connections.has_link(topology::hub(), LinkRole::Consumer) {
            ChannelStatus::Consumer
        } else {
            ChannelStatus::Disconnected
        };
        if self.store.local().channel_status != status {
            info!("[通道复用] 本机通道状态变为 {:?}", status);
            self.update_local_state(|state| state.channel_status = status);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attach_link, drain_frames, drain_states};
    use arena_models::{Command, DeviceState};

    #[test]
    fn test_frame_rate_meter_reports_closed_windows() {
        let meter = FrameRateMeter::new();
        let start = Instant::now();
        assert_eq!(meter.record_frame_at(SourceDevice::RoverPhone, start), None);
        for i in 1..10u64 {
            let at = start + Duration::from_millis(i * 100);
            assert_eq!(meter.record_frame_at(SourceDevice::RoverPhone, at), None);
        }
        let rate = meter
            .record_frame_at(SourceDevice::RoverPhone, start + Duration::from_millis(1000))
            .expect("满一秒后应当报告帧率");
        assert!((rate - 10.0).abs() < 0.01);
        assert_eq!(
            meter.record_frame_at(SourceDevice::TripodPhone, start + Duration::from_millis(1000)),
            None
        );
    }

    #[test]
    fn test_inbound_frame_rate_propagates_to_hub_and_decays() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::PilotPhone, Arc::clone(&connections));
        let (_hub_link, mut hub_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        let frames = Arc::new(Mutex::new(0usize));
        {
            let frames = Arc::clone(&frames);
            mux.handlers()
                .set_handler(ContentType::Image, SourceDevice::TripodPhone, move |_, _| {
                    *frames.lock().unwrap() += 1;
                });
        }

        mux.dispatch_inbound(SourceDevice::TripodPhone, ChannelFrame::new(ContentType::Image, vec![0xFF, 0xD8]));
        assert_eq!(*frames.lock().unwrap(), 1);
        assert!(drain_states(&mut hub_rx).is_empty(), "第一个窗口尚未结束");

        let start = Instant::now() + Duration::from_secs(5);
        for i in 0..10u64 {
            mux.record_image_frame_at(SourceDevice::RoverPhone, start + Duration::from_millis(i * 100));
        }
        mux.record_image_frame_at(SourceDevice::RoverPhone, start + Duration::from_millis(1000));
        assert!((mux.store().local().frames_per_second - 10.0).abs() < 0.01);
        let pushed = drain_states(&mut hub_rx);
        assert_eq!(pushed.len(), 1);
        assert!((pushed[0].frames_per_second - 10.0).abs() < 0.01);

        mux.decay_frame_rate_at(start + Duration::from_millis(1500));
        assert!(drain_states(&mut hub_rx).is_empty(), "图像流仍在窗口内，帧率不应归零");

        mux.decay_frame_rate_at(start + Duration::from_millis(3000));
        assert_eq!(mux.store().local().frames_per_second, 0.0);
        let pushed = drain_states(&mut hub_rx);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].frames_per_second, 0.0);

        mux.decay_frame_rate_at(start + Duration::from_millis(4000));
        assert!(drain_states(&mut hub_rx).is_empty(), "帧率已为零时不再重复传播");
    }

    #[test]
    fn test_interleaved_content_types_reach_only_their_handlers() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::PilotPhone, connections);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let states = Arc::new(Mutex::new(Vec::new()));
        {
            let commands = Arc::clone(&commands);
            mux.handlers()
                .set_handler(ContentType::Command, SourceDevice::ArenaPad, move |_, payload| {
                    commands.lock().unwrap().push(payload.clone());
                });
            let states = Arc::clone(&states);
            mux.handlers()
                .set_handler(ContentType::State, SourceDevice::ArenaPad, move |_, payload| {
                    states.lock().unwrap().push(payload.clone());
                });
        }

        let state = DeviceState::new(SourceDevice::RoverPhone);
        let frames = vec![
            ChannelFrame::new(ContentType::Command, serde_json::to_vec(&Command::scan_world()).unwrap()),
            ChannelFrame::new(ContentType::State, serde_json::to_vec(&state).unwrap()),
            ChannelFrame::new(ContentType::Command, serde_json::to_vec(&Command::build_arena()).unwrap()),
        ];
        for frame in frames {
            mux.dispatch_inbound(SourceDevice::ArenaPad, frame);
        }

        let commands = commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|p| matches!(p, ChannelPayload::Command(_))));
        let states = states.lock().unwrap();
        assert_eq!(*states, vec![ChannelPayload::State(state)]);
    }

    #[test]
    fn test_malformed_state_is_dropped() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::PilotPhone, connections);
        mux.dispatch_inbound(
            SourceDevice::ArenaPad,
            ChannelFrame::new(ContentType::State, b"{\"sourceDevice\": 17".to_vec()),
        );
        assert_eq!(mux.store().get(SourceDevice::ArenaPad), DeviceState::new(SourceDevice::ArenaPad));
    }

    #[test]
    fn test_state_about_local_device_is_ignored() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::PilotPhone, connections);
        mux.update_local_state(|state| state.battery_level = 0.9);
        let mut stale = DeviceState::new(SourceDevice::PilotPhone);
        stale.battery_level = 0.1;
        mux.dispatch_inbound(
            SourceDevice::ArenaPad,
            ChannelFrame::new(ContentType::State, serde_json::to_vec(&stale).unwrap()),
        );
        assert_eq!(mux.store().local().battery_level, 0.9);
    }

    #[test]
    fn test_send_to_prefers_server_link_and_skips_unreachable() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::TripodPhone, Arc::clone(&connections));
        let (_consumer, mut consumer_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        let (_server, mut server_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Server);

        mux.send_to(SourceDevice::ArenaPad, &ChannelPayload::Image(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(drain_frames(&mut server_rx).len(), 1);
        assert!(drain_frames(&mut consumer_rx).is_empty());

        let err = mux
            .send_to(SourceDevice::SparePhone, &ChannelPayload::Image(vec![1]))
            .unwrap_err();
        assert!(matches!(err, ChannelError::NoRoute(SourceDevice::SparePhone)));
    }

    #[test]
    fn test_channel_status_follows_hub_link() {
        let connections = Arc::new(ConnectionManager::new());
        let mux = ChannelMultiplexer::new(SourceDevice::PilotPhone, Arc::clone(&connections));
        assert_eq!(mux.refresh_channel_status(), ChannelStatus::Disconnected);

        let (hub_link, mut hub_rx) = attach_link(&connections, SourceDevice::ArenaPad, LinkRole::Consumer);
        assert_eq!(mux.refresh_channel_status(), ChannelStatus::Consumer);
        let pushed = drain_states(&mut hub_rx);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].channel_status, ChannelStatus::Consumer);

        connections.remove_if_current(&hub_link);
        assert_eq!(mux.refresh_channel_status(), ChannelStatus::Disconnected);
        assert_eq!(mux.store().local().channel_status, ChannelStatus::Disconnected);
    }
}
