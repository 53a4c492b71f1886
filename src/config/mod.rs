// ==========================================
// 住院医师排班系统 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod config_reader;
pub mod scheduler_config;

// 重导出核心配置管理器
pub use config_manager::{ConfigError, ConfigManager, ConfigResult};
pub use config_reader::SchedulerConfigReader;
pub use scheduler_config::{config_keys, SchedulerConfig};
