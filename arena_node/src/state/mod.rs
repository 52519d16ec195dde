//! 设备状态表与星型传播协议。

pub mod propagation;
pub mod store;

pub use store::DeviceStateStore;
