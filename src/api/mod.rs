// ==========================================
// 住院医师排班系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口，供 CLI / 上层服务调用
// ==========================================

pub mod error;
pub mod schedule_api;
pub mod swap_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use schedule_api::{ComplianceQuery, ScheduleApi};
pub use swap_api::SwapApi;
