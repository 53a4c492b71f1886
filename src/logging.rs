// ==========================================
// 住院医师排班系统 - 日志初始化
// ==========================================
// 基于 tracing-subscriber + EnvFilter
// - RUST_LOG: 过滤器（默认 info）
// - SCHEDULER_LOG_FORMAT=json: 结构化 JSON 输出（默认文本）
// 日志写 stderr，stdout 留给命令行结果
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 日志格式环境变量
pub const LOG_FORMAT_ENV: &str = "SCHEDULER_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// 初始化日志系统（重复调用时保持首次设置）
///
/// # 示例
/// ```no_run
/// use residency_scheduler::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true);

    let result = match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("日志系统已初始化，忽略重复设置: {}", e);
    }
}

/// 初始化测试环境的日志系统
///
/// 使用 debug 级别，输出交给测试框架捕获
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("residency_scheduler=debug"))
        .with_test_writer()
        .try_init();
}
