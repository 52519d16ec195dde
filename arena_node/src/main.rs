use anyhow::Context;
use arena_node::config;
use arena_node::{ArenaNode, NoopArenaActions};
use arena_transport::ServiceDirectory;
use log::{info, warn, LevelFilter};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志记录器，RUST_LOG 可覆盖默认级别
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已成功初始化 (env_logger)，默认级别: Info。");

    let app_config = config::load_or_create_config();
    let own = config::resolve_own_device(&app_config).context("无法确定本机设备身份")?;
    info!("[主程序] 本机设备: {} (角色: {:?})", own, own.role());

    // 静态服务条目来自配置，其余条目由本进程的服务端发布
    let directory = Arc::new(ServiceDirectory::with_static_entries(
        app_config.network.resolve_static_services(),
    ));

    let node = ArenaNode::new(own, app_config, directory, Arc::new(NoopArenaActions));
    match node.start().await.context("启动协调节点失败")? {
        Some(addr) => info!("[主程序] 本机服务已发布在 {}", addr),
        None => info!("[主程序] 本机不发布服务，仅作为消费端运行。"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[主程序] 监听 Ctrl-C 信号失败: {}，立即关闭。", e);
    }
    info!("[主程序] 收到退出信号，正在关闭...");
    node.shutdown().await;
    info!("[主程序] 已退出。");
    Ok(())
}
