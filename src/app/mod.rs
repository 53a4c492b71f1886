// ==========================================
// 住院医师排班系统 - 应用层
// ==========================================
// 职责: 装配数据库连接、配置、约束注册表与各 API 实例
// ==========================================

pub mod state;

// 重导出
pub use state::{AppState, DEFAULT_DB_PATH};
