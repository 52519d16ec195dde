//! 通用枚举模块。
//!
//! 本模块定义了在 RoverArena 各个组件（中枢节点、控制端、车载端、三脚架相机端）之间
//! 共享的通用枚举类型：设备标识、设备角色、通道内容类型以及设备状态中使用的各类状态值。
//!
//! 所有在此模块中定义的枚举都派生 `Serialize`, `Deserialize`, `Debug`, `Clone`, `PartialEq`,
//! 适合作为 HashMap 键的枚举还派生 `Eq` 与 `Hash`。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 竞技场中一台已知的物理设备。
///
/// 设备集合在编译期即已确定（见 `topology` 模块），不会在运行时增减。
/// 进程启动时会根据主机名解析出唯一一个代表“本机”的 `SourceDevice`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceDevice {
    /// 运行 AR 竞技场的中枢平板。
    ArenaPad,
    /// 驾驶员手持的控制端手机。
    PilotPhone,
    /// 固定在小车上的车载手机。
    RoverPhone,
    /// 架在三脚架上的观察相机手机。
    TripodPhone,
    /// 备用设备，不承担任何角色。
    SparePhone,
}

impl SourceDevice {
    /// 所有已知设备，也是设备状态表的固定键集合。
    pub const ALL: [SourceDevice; 5] = [
        SourceDevice::ArenaPad,
        SourceDevice::PilotPhone,
        SourceDevice::RoverPhone,
        SourceDevice::TripodPhone,
        SourceDevice::SparePhone,
    ];

    /// 设备对外宣告的显示名称，也是服务名的前缀。
    pub fn display_name(self) -> &'static str {
        match self {
            SourceDevice::ArenaPad => "ArenaPad",
            SourceDevice::PilotPhone => "PilotPhone",
            SourceDevice::RoverPhone => "RoverPhone",
            SourceDevice::TripodPhone => "TripodPhone",
            SourceDevice::SparePhone => "SparePhone",
        }
    }

    /// 根据显示名称或主机名解析设备。
    ///
    /// 比较时忽略大小写、`-`、`_` 与空格，并丢弃第一个 `.` 之后的部分，
    /// 因此 `RoverPhone.local`、`rover-phone` 都能解析为 `SourceDevice::RoverPhone`。
    pub fn from_display_name(name: &str) -> Option<SourceDevice> {
        let host = name.split('.').next().unwrap_or_default();
        let normalized: String = host
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        if normalized.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|device| device.display_name().to_lowercase() == normalized)
    }

    /// 设备的静态角色分配。
    pub fn role(self) -> DeviceRole {
        match self {
            SourceDevice::ArenaPad => DeviceRole::Hub,
            SourceDevice::PilotPhone => DeviceRole::Controller,
            SourceDevice::RoverPhone => DeviceRole::Onboard,
            SourceDevice::TripodPhone => DeviceRole::Tripod,
            SourceDevice::SparePhone => DeviceRole::None,
        }
    }
}

impl fmt::Display for SourceDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 设备在竞技场中承担的角色。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// 星型拓扑的中心：传输服务端与状态中继点。
    Hub,
    /// 驾驶控制端。
    Controller,
    /// 车载相机端。
    Onboard,
    /// 三脚架相机端。
    Tripod,
    /// 无角色。
    None,
}

impl DeviceRole {
    /// 是否为相机来源角色（车载或三脚架）。
    pub fn is_camera_source(self) -> bool {
        matches!(self, DeviceRole::Onboard | DeviceRole::Tripod)
    }
}

/// 子通道的内容类型。
///
/// 每条设备间连接为每种内容类型各建立一个逻辑子通道，标识符为 1–4 的小整数。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Command,
    Image,
    State,
    Collaboration,
}

impl ContentType {
    /// 所有内容类型，按标识符升序排列。
    pub const ALL: [ContentType; 4] = [
        ContentType::Command,
        ContentType::Image,
        ContentType::State,
        ContentType::Collaboration,
    ];

    /// 子通道在线路上的标识符。
    pub fn id(self) -> u8 {
        match self {
            ContentType::Command => 1,
            ContentType::Image => 2,
            ContentType::State => 3,
            ContentType::Collaboration => 4,
        }
    }

    /// 根据线路标识符解析内容类型，未知标识符返回 `None`。
    pub fn from_id(id: u8) -> Option<ContentType> {
        match id {
            1 => Some(ContentType::Command),
            2 => Some(ContentType::Image),
            3 => Some(ContentType::State),
            4 => Some(ContentType::Collaboration),
            _ => None,
        }
    }

    /// 该类型的负载是否为结构化（JSON）编码；其余类型为原始字节透传。
    pub fn is_structured(self) -> bool {
        matches!(self, ContentType::Command | ContentType::State)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 设备的整体通道状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    /// 作为中枢服务端，至少有一个客户端连入。
    Server,
    /// 作为消费端，已连接到中枢。
    Consumer,
}

/// AR 点对点协作会话的连接状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerSessionStatus {
    #[default]
    Unknown,
    NotConnected,
    Connecting,
    Connected,
}

/// AR 世界建图进度。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorldMappingStatus {
    #[default]
    NotAvailable,
    Limited,
    Extending,
    Mapped,
}

/// 设备热状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThermalState {
    #[default]
    Unknown,
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// 电池充电状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryState {
    #[default]
    Unknown,
    Unplugged,
    Charging,
    Full,
}
