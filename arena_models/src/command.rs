//! 设备间命令消息。
//!
//! `Command` 是固定结构的点对点指令消息：每条消息只有一个有效的 `kind`，
//! 未使用的字段保持零值，不需要它们的接收方直接忽略。

use serde::{Deserialize, Serialize};

/// 命令种类。
///
/// 反序列化时，未知的种类字符串会落入 `CommandKind::Unknown`，
/// 保证运行旧逻辑的接收方不会因为新增的命令种类而失败。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    ScanWorld,
    BuildArena,
    RoverReturnHome,
    RoverRotateDegrees,
    BeginTransitToPoint,
    CancelTransitToPoint,
    #[serde(rename = "broadcastSessionID")]
    BroadcastSessionId,
    WorldStatusUpdate,
    /// 本版本无法识别的命令种类。
    #[serde(other)]
    Unknown,
}

/// 平面上的一个点（竞技场坐标，单位：米）。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

/// 设备间的命令消息。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub float_value: f32,
    #[serde(default)]
    pub point: Point2,
    #[serde(default)]
    pub string_value: String,
    #[serde(default)]
    pub bool_value: bool,
    #[serde(default)]
    pub binary_payload: Vec<u8>,
}

impl Command {
    /// 创建一个只设置了种类、其余字段均为零值的命令。
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            float_value: 0.0,
            point: Point2::default(),
            string_value: String::new(),
            bool_value: false,
            binary_payload: Vec::new(),
        }
    }

    pub fn scan_world() -> Self {
        Self::new(CommandKind::ScanWorld)
    }

    pub fn build_arena() -> Self {
        Self::new(CommandKind::BuildArena)
    }

    pub fn rover_return_home() -> Self {
        Self::new(CommandKind::RoverReturnHome)
    }

    pub fn rover_rotate_degrees(degrees: f32) -> Self {
        Self {
            float_value: degrees,
            ..Self::new(CommandKind::RoverRotateDegrees)
        }
    }

    pub fn begin_transit_to_point(x: f32, y: f32) -> Self {
        Self {
            point: Point2 { x, y },
            ..Self::new(CommandKind::BeginTransitToPoint)
        }
    }

    pub fn cancel_transit_to_point() -> Self {
        Self::new(CommandKind::CancelTransitToPoint)
    }

    /// 宣告发送方的 AR 会话标识。
    pub fn broadcast_session_id(session_id: impl Into<String>) -> Self {
        Self {
            string_value: session_id.into(),
            ..Self::new(CommandKind::BroadcastSessionId)
        }
    }

    /// 世界状态更新，`mapped` 表示发送方是否已完成建图，`payload` 为可选的附加数据。
    pub fn world_status_update(mapped: bool, payload: Vec<u8>) -> Self {
        Self {
            bool_value: mapped,
            binary_payload: payload,
            ..Self::new(CommandKind::WorldStatusUpdate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 测试命令的 JSON 字段命名与种类编码。
    fn test_command_wire_format() {
        let command = Command::begin_transit_to_point(1.5, -2.0);
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], "beginTransitToPoint");
        assert_eq!(json["point"]["x"], 1.5);
        assert_eq!(json["floatValue"], 0.0);

        let session = serde_json::to_value(Command::broadcast_session_id("abc")).unwrap();
        assert_eq!(session["type"], "broadcastSessionID");
        assert_eq!(session["stringValue"], "abc");
    }

    #[test]
    /// 未知的命令种类不能导致反序列化失败，缺失字段取零值。
    fn test_unknown_kind_is_forward_compatible() {
        let json = r#"{"type":"launchFireworks","floatValue":3.0}"#;
        let command: Command = serde_json::from_str(json).expect("未知种类应当能被解析");
        assert_eq!(command.kind, CommandKind::Unknown);
        assert_eq!(command.float_value, 3.0);
        assert!(command.string_value.is_empty());
        assert!(command.binary_payload.is_empty());
    }

    #[test]
    fn test_constructors_only_set_their_fields() {
        let rotate = Command::rover_rotate_degrees(90.0);
        assert_eq!(rotate.kind, CommandKind::RoverRotateDegrees);
        assert_eq!(rotate.float_value, 90.0);
        assert_eq!(rotate.point, Point2::default());
        assert!(!rotate.bool_value);

        let status = Command::world_status_update(true, vec![1, 2, 3]);
        assert!(status.bool_value);
        assert_eq!(status.binary_payload, vec![1, 2, 3]);
    }
}
