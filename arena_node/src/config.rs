use arena_models::SourceDevice;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

/// 配置文件的默认文件名
pub const CONFIG_FILE_NAME: &str = "app_settings.json";
/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "ARENA_CONFIG";
/// 服务端默认监听的主机地址
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
/// 服务端默认监听端口，0 表示由系统分配
pub const DEFAULT_LISTEN_PORT: u16 = 0;

/// 本机设备身份配置
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// 覆盖主机名推断出的设备名，例如 "ArenaPad"
    pub device_name: Option<String>,
}

/// 网络配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// 服务端绑定的主机地址
    pub listen_host: String,
    /// 服务端监听端口
    pub listen_port: u16,
    /// 静态服务条目：服务名 -> "host:port"，启动时预置到服务目录中
    pub static_services: BTreeMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            static_services: BTreeMap::new(),
        }
    }
}

impl NetworkConfig {
    /// 服务端绑定地址字符串，例如 "0.0.0.0:7070"
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// 解析静态服务条目。无法解析的条目记录警告后跳过，不影响其余条目。
    pub fn resolve_static_services(&self) -> Vec<(String, SocketAddr)> {
        let mut resolved = Vec::with_capacity(self.static_services.len());
        for (name, target) in &self.static_services {
            match target.to_socket_addrs().map(|mut addrs| addrs.next()) {
                Ok(Some(addr)) => resolved.push((name.clone(), addr)),
                Ok(None) => warn!("[配置模块] 静态服务 {} 的地址 '{}' 没有解析出任何结果，已忽略。", name, target),
                Err(e) => warn!("[配置模块] 静态服务 {} 的地址 '{}' 解析失败: {}，已忽略。", name, target, e),
            }
        }
        resolved
    }
}

/// 会话管理配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// 服务端等待对端宣告身份的最长时间（毫秒）
    pub handshake_timeout_ms: u64,
    /// 消费端断线后等待旧服务发布撤回的最长时间（毫秒）
    pub reconnect_settle_ms: u64,
    /// 消费端连接失败后的重试间隔（毫秒）
    pub reconnect_retry_ms: u64,
    /// 消费端发送 Ping 的间隔（秒）
    pub heartbeat_interval_seconds: u64,
    /// 服务端心跳检查的间隔（秒）
    pub heartbeat_check_interval_seconds: u64,
    /// 服务端判定对端超时的静默时长（秒）
    pub client_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            reconnect_settle_ms: 1_000,
            reconnect_retry_ms: 2_000,
            heartbeat_interval_seconds: 5,
            heartbeat_check_interval_seconds: 15,
            client_timeout_seconds: 60,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn reconnect_retry(&self) -> Duration {
        Duration::from_millis(self.reconnect_retry_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_check_interval_seconds.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_seconds)
    }
}

/// 出站队列配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// 命令/状态/协作子通道共用的有序队列容量
    pub ordered_queue_capacity: usize,
    /// 图像子通道最多缓存的帧数，满时丢弃最旧帧
    pub image_queue_frames: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ordered_queue_capacity: 256,
            image_queue_frames: 3,
        }
    }
}

/// 图像推送配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ImageFeedConfig {
    /// 目标发送帧率，0 表示不限速
    pub target_fps: u32,
}

impl Default for ImageFeedConfig {
    fn default() -> Self {
        Self { target_fps: 15 }
    }
}

/// 应用的主配置结构体
///
/// 每个分区都带 `#[serde(default)]`，缺失的分区或字段使用默认值，
/// 因此只写了部分字段的配置文件也能正常加载。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub channel: ChannelConfig,
    pub image_feed: ImageFeedConfig,
}

/// 获取配置文件路径：优先使用 `ARENA_CONFIG` 环境变量，否则使用当前目录下的 `app_settings.json`
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    current_dir.join(CONFIG_FILE_NAME)
}

/// 加载或创建应用配置文件
pub fn load_or_create_config() -> AppConfig {
    load_or_create_config_at(&config_file_path())
}

/// 从指定路径加载配置；文件不存在或内容损坏时写入默认配置并返回默认值
pub fn load_or_create_config_at(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 警告：从 {:?} 反序列化配置失败: {}. 文件可能已损坏。将使用默认配置并尝试覆盖。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, config_file_path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件或读取时发生错误 (错误: {}). 将使用默认配置并尝试创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, config_file_path);
            default_config
        }
    }
}

/// 保存配置到文件，失败只记录警告
fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("[配置模块] 错误：创建配置目录 {:?} 失败: {}", parent, e);
                return;
            }
        }
    }

    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 错误：将配置写入文件 {:?} 时失败: {}", path, e);
            } else {
                info!("[配置模块] 已成功将当前配置（可能是默认配置）保存到 {:?}.", path);
            }
        }
        Err(e) => {
            warn!("[配置模块] 错误：序列化配置信息以便保存时失败: {}", e);
        }
    }
}

/// 读取本机主机名：`HOSTNAME` 环境变量，其次是 `/etc/hostname`
pub fn host_name() -> Option<String> {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return Some(name.trim().to_string());
        }
    }
    match fs::read_to_string("/etc/hostname") {
        Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
        _ => None,
    }
}

/// 确定本机设备身份：配置中的 `device_name` 优先，否则使用主机名
pub fn resolve_own_device(config: &AppConfig) -> Result<SourceDevice, AppError> {
    let name = match &config.device.device_name {
        Some(name) => {
            debug!("[配置模块] 使用配置中指定的设备名: {}", name);
            name.clone()
        }
        None => host_name().ok_or_else(|| {
            AppError::ConfigError("未配置 device.device_name，且无法读取主机名".to_string())
        })?,
    };
    SourceDevice::from_display_name(&name).ok_or(AppError::UnknownDevice(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("arena-node-config-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "device": { "device_name": "RoverPhone" }, "session": { "reconnect_settle_ms": 250 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device.device_name.as_deref(), Some("RoverPhone"));
        assert_eq!(config.session.reconnect_settle_ms, 250);
        assert_eq!(config.session.client_timeout_seconds, 60);
        assert_eq!(config.channel, ChannelConfig::default());
        assert_eq!(config.network.listen_addr(), "0.0.0.0:0");
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let path = temp_config_path();
        let config = load_or_create_config_at(&path);
        assert_eq!(config, AppConfig::default());
        let written = fs::read_to_string(&path).expect("默认配置应当被写入");
        let reloaded: AppConfig = serde_json::from_str(&written).unwrap();
        assert_eq!(reloaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupted_file_is_replaced_with_defaults() {
        let path = temp_config_path();
        fs::write(&path, "{ not json").unwrap();
        let config = load_or_create_config_at(&path);
        assert_eq!(config, AppConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_resolve_static_services_skips_invalid_entries() {
        let mut network = NetworkConfig::default();
        network
            .static_services
            .insert("ArenaPadChannel".to_string(), "127.0.0.1:7070".to_string());
        network
            .static_services
            .insert("RoverPhoneChannel".to_string(), "not-an-address".to_string());
        let resolved = network.resolve_static_services();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "ArenaPadChannel");
        assert_eq!(resolved[0].1, "127.0.0.1:7070".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_resolve_own_device_from_config_override() {
        let mut config = AppConfig::default();
        config.device.device_name = Some("tripodphone.local".to_string());
        assert_eq!(resolve_own_device(&config).unwrap(), SourceDevice::TripodPhone);

        config.device.device_name = Some("Toaster".to_string());
        assert!(matches!(resolve_own_device(&config), Err(AppError::UnknownDevice(_))));
    }
}
