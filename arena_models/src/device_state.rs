//! 设备状态快照。
//!
//! `DeviceState` 是某一台设备的状态快照，经由中枢以星型方式复制到所有设备。
//! 每台设备在启动时为每个 `SourceDevice` 创建一个默认（未知）实例；
//! 本机实例在本地被持续修改并重新发布，对端实例只会在收到序列化更新时被整体替换，
//! 从不做字段级合并。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{
    BatteryState, ChannelStatus, PeerSessionStatus, SourceDevice, ThermalState, WorldMappingStatus,
};

/// 单台设备的状态快照。
///
/// 相等性按结构比较，但不包括易变的 `updated_at` 字段。
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// 此状态所描述的设备。
    pub source_device: SourceDevice,
    /// AR 会话标识，未加入会话时为空字符串。
    #[serde(default)]
    pub session_id: String,
    /// AR 点对点协作会话的连接状态。
    #[serde(default)]
    pub p2p_status: PeerSessionStatus,
    /// AR 世界建图进度。
    #[serde(default)]
    pub world_mapping_status: WorldMappingStatus,
    #[serde(default)]
    pub thermal_state: ThermalState,
    /// 电量，范围 0–1。
    #[serde(default)]
    pub battery_level: f32,
    #[serde(default)]
    pub battery_state: BatteryState,
    /// 此设备希望接收其图像流的设备列表。
    #[serde(default)]
    pub requested_image_feed_sources: Vec<SourceDevice>,
    /// 最近一秒统计到的帧率。
    #[serde(default)]
    pub frames_per_second: f32,
    #[serde(default)]
    pub channel_status: ChannelStatus,
    /// 最后一次本地修改的时间，仅供展示，不参与相等性比较。
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl DeviceState {
    /// 为设备创建一个全部为默认/未知值的状态。
    pub fn new(source_device: SourceDevice) -> Self {
        Self {
            source_device,
            session_id: String::new(),
            p2p_status: PeerSessionStatus::default(),
            world_mapping_status: WorldMappingStatus::default(),
            thermal_state: ThermalState::default(),
            battery_level: 0.0,
            battery_state: BatteryState::default(),
            requested_image_feed_sources: Vec::new(),
            frames_per_second: 0.0,
            channel_status: ChannelStatus::default(),
            updated_at: Utc::now(),
        }
    }

    /// 设置电量，超出 0–1 的值会被截断。
    pub fn set_battery(&mut self, level: f32, state: BatteryState) {
        self.battery_level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.battery_state = state;
    }

    /// 此设备是否请求了 `producer` 的图像流。
    pub fn wants_image_feed_from(&self, producer: SourceDevice) -> bool {
        self.requested_image_feed_sources.contains(&producer)
    }

    /// 请求的图像流数量。
    pub fn requested_image_feed_count(&self) -> usize {
        self.requested_image_feed_sources.len()
    }
}

impl PartialEq for DeviceState {
    fn eq(&self, other: &Self) -> bool {
        self.source_device == other.source_device
            && self.session_id == other.session_id
            && self.p2p_status == other.p2p_status
            && self.world_mapping_status == other.world_mapping_status
            && self.thermal_state == other.thermal_state
            && self.battery_level == other.battery_level
            && self.battery_state == other.battery_state
            && self.requested_image_feed_sources == other.requested_image_feed_sources
            && self.frames_per_second == other.frames_per_second
            && self.channel_status == other.channel_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    /// 相等性比较忽略 `updated_at`。
    fn test_equality_ignores_updated_at() {
        let a = DeviceState::new(SourceDevice::PilotPhone);
        let mut b = a.clone();
        b.updated_at = a.updated_at + Duration::seconds(30);
        assert_eq!(a, b);

        b.thermal_state = ThermalState::Serious;
        assert_ne!(a, b);
    }

    #[test]
    /// 测试 JSON 格式以及缺省字段回落到默认值。
    fn test_json_defaults() {
        let json = r#"{"sourceDevice":"RoverPhone","batteryLevel":0.5}"#;
        let state: DeviceState = serde_json::from_str(json).expect("最小状态应当能被解析");
        assert_eq!(state.source_device, SourceDevice::RoverPhone);
        assert_eq!(state.battery_level, 0.5);
        assert_eq!(state.channel_status, ChannelStatus::Disconnected);
        assert!(state.requested_image_feed_sources.is_empty());

        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("requestedImageFeedSources").is_some());
        assert!(value.get("channelStatus").is_some());
    }

    #[test]
    fn test_battery_is_clamped() {
        let mut state = DeviceState::new(SourceDevice::TripodPhone);
        state.set_battery(1.7, BatteryState::Charging);
        assert_eq!(state.battery_level, 1.0);
        state.set_battery(-0.2, BatteryState::Unplugged);
        assert_eq!(state.battery_level, 0.0);
        assert_eq!(state.battery_state, BatteryState::Unplugged);
    }

    #[test]
    fn test_image_feed_requests() {
        let mut state = DeviceState::new(SourceDevice::PilotPhone);
        assert!(!state.wants_image_feed_from(SourceDevice::RoverPhone));
        state.requested_image_feed_sources.push(SourceDevice::RoverPhone);
        assert!(state.wants_image_feed_from(SourceDevice::RoverPhone));
        assert_eq!(state.requested_image_feed_count(), 1);
    }
}
