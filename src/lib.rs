// ==========================================
// 住院医师排班系统 - 核心库
// ==========================================
// 系统定位: ACGME 合规约束排班引擎 + 并发安全换班子系统
// 技术栈: Rust + SQLite + tokio
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 约束、求解、编排、换班
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentSource, PersonRole, RunStatus, SeniorityTier, Session, Severity, SwapStatus,
    SwapType,
};

// 领域实体
pub use domain::{
    Absence, Assignment, Block, ComplianceReport, ComplianceViolation, ConstraintViolation,
    GenerationRun, Person, RotationTemplate, SwapRecord, SwapRequest,
};

// 引擎
pub use engine::{
    ComplianceValidator, ConstraintManager, GenerateOutcome, GenerateRequest, ScheduleEngine,
    SolverKind, SwapService,
};

// API
pub use api::{ApiError, ApiResult, ComplianceQuery, ScheduleApi, SwapApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "住院医师排班系统";
