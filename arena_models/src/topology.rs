//! 设备注册表 / 拓扑。
//!
//! 竞技场的拓扑是编译期确定的静态配置：哪台设备是中枢、哪些设备是相机来源、
//! 每台设备发布的服务名以及默认需要连接的服务。

use crate::enums::{DeviceRole, SourceDevice};

/// 服务名后缀，服务名格式为 `"<显示名称>Channel"`。
pub const SERVICE_SUFFIX: &str = "Channel";

/// 返回拓扑中唯一的中枢设备。
pub fn hub() -> SourceDevice {
    SourceDevice::ALL
        .into_iter()
        .find(|device| device.role() == DeviceRole::Hub)
        .unwrap_or(SourceDevice::ArenaPad)
}

/// 设备是否为中枢。
pub fn is_hub(device: SourceDevice) -> bool {
    device == hub()
}

/// 所有相机来源设备（车载与三脚架）。
pub fn camera_sources() -> Vec<SourceDevice> {
    SourceDevice::ALL
        .into_iter()
        .filter(|device| device.role().is_camera_source())
        .collect()
}

/// 设备是否需要发布自己的服务（中枢与相机来源）。
pub fn publishes_service(device: SourceDevice) -> bool {
    is_hub(device) || device.role().is_camera_source()
}

/// 设备发布或被浏览时使用的确定性服务名。
pub fn service_name(device: SourceDevice) -> String {
    format!("{}{}", device.display_name(), SERVICE_SUFFIX)
}

/// 根据服务名反查设备。
pub fn device_for_service(name: &str) -> Option<SourceDevice> {
    let display = name.strip_suffix(SERVICE_SUFFIX)?;
    SourceDevice::ALL
        .into_iter()
        .find(|device| device.display_name() == display)
}

/// 设备启动时默认连接的服务：中枢连接所有相机来源，其余设备只连接中枢。
pub fn default_consumed_services(device: SourceDevice) -> Vec<SourceDevice> {
    if is_hub(device) {
        camera_sources()
    } else {
        vec![hub()]
    }
}

/// 除自身以外的所有设备。
pub fn peers_of(device: SourceDevice) -> Vec<SourceDevice> {
    SourceDevice::ALL
        .into_iter()
        .filter(|other| *other != device)
        .collect()
}
