// ==========================================
// 住院医师排班系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod absence;
pub mod assignment;
pub mod block;
pub mod compliance;
pub mod person;
pub mod rotation;
pub mod run;
pub mod swap;
pub mod types;

// 重导出核心类型
pub use absence::Absence;
pub use assignment::Assignment;
pub use block::Block;
pub use compliance::{ComplianceReport, ComplianceViolation, ConstraintViolation};
pub use person::Person;
pub use rotation::RotationTemplate;
pub use run::{GenerationRun, InvalidRunTransition, StatusTransition};
pub use swap::{InvalidSwapTransition, SwapOperation, SwapRecord, SwapRequest};
pub use types::{
    AssignmentSource, ConstraintKind, PersonRole, RunStatus, SeniorityTier, Session, Severity,
    SwapStatus, SwapType,
};
