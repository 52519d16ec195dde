//! `arena_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了 RoverArena 各个 Rust 组件（传输库 `arena_transport`、
//! 协调节点 `arena_node`）之间共享的核心数据结构和枚举类型。
//!
//! 主要包含以下类型的模型：
//! - **通用枚举 (`enums`)**: 设备标识 `SourceDevice`、设备角色 `DeviceRole`、子通道内容类型 `ContentType` 等。
//! - **拓扑 (`topology`)**: 编译期确定的设备注册表，回答“谁是中枢”“服务名是什么”等问题。
//! - **命令 (`command`)**: 设备间点对点指令 `Command`。
//! - **设备状态 (`device_state`)**: 经由中枢复制的状态快照 `DeviceState`。
//!
//! 所有模型都派生 `serde::Serialize` 和 `serde::Deserialize`，线路上以 JSON 编码。

pub mod command;
pub mod device_state;
pub mod enums;
pub mod topology;

pub use command::{Command, CommandKind, Point2};
pub use device_state::DeviceState;
pub use enums::{
    BatteryState, ChannelStatus, ContentType, DeviceRole, PeerSessionStatus, SourceDevice,
    ThermalState, WorldMappingStatus,
};
