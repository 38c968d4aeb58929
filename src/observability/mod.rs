//! 可观测性：tracing 订阅器初始化（RUST_LOG 优先，默认 info）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局 tracing 订阅器；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
