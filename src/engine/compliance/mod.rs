// ==========================================
// 住院医师排班系统 - 合规校验
// ==========================================

pub mod rules;
pub mod validator;

pub use validator::ComplianceValidator;
