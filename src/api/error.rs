// ==========================================
// 住院医师排班系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换仓储/求解/约束/配置错误为用户可理解的错误
// 红线: 所有错误信息必须包含显式原因（可解释性）
// ==========================================

use crate::config::ConfigError;
use crate::domain::types::Severity;
use crate::domain::{ComplianceReport, ConstraintViolation, InvalidRunTransition, InvalidSwapTransition};
use crate::engine::constraints::ConstraintError;
use crate::engine::solver::SolverError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 排班生成错误
    // ==========================================
    /// 需求超过供给，或精确搜索穷尽无解
    #[error("排班不可行: {diagnostic}")]
    InfeasibleSchedule {
        diagnostic: String,
        binding_constraint: Option<String>,
    },

    /// 警告: 超时返回的非最优解（记录在诊断中，不作为失败）
    #[error("求解超时，返回非最优解: solver={solver_name}, elapsed={elapsed_seconds:.3}s")]
    SolverTimeoutNonOptimal {
        solver_name: String,
        elapsed_seconds: f64,
    },

    #[error("求解失败: {0}")]
    SolverFailure(String),

    #[error("合规违规: severity={severity}, count={violation_count}")]
    ComplianceViolation {
        severity: Severity,
        violation_count: usize,
        report: Box<ComplianceReport>,
    },

    // ==========================================
    // 换班错误
    // ==========================================
    #[error("换班校验失败: {} 项违规", .violations.len())]
    SwapValidation { violations: Vec<ConstraintViolation> },

    #[error("回滚窗口已过: swap_id={swap_id}, window_hours={window_hours}")]
    RollbackWindowExpired { swap_id: String, window_hours: i64 },

    #[error("换班已回滚: swap_id={0}")]
    AlreadyRolledBack(String),

    #[error("换班冲突: {0}")]
    SwapConflict(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    /// 可重试（配合幂等键）
    #[error("锁获取超时: owner={owner_id}, waited_ms={waited_ms}")]
    LockAcquisitionTimeout { owner_id: String, waited_ms: u64 },

    // ==========================================
    // 约束/配置错误
    // ==========================================
    #[error("约束ID重复: {0}")]
    DuplicateConstraint(String),

    #[error("配置错误: {0}")]
    Config(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    /// 提交失败，自上次成功持久化以来的变更均未生效
    #[error("持久化失败: {0}")]
    PersistenceFailure(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 调用方可安全重试（换班需携带幂等键）
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::LockAcquisitionTimeout { .. })
    }

    /// 由合规报告构造阻断错误（取最高严重度）
    pub fn compliance(report: ComplianceReport) -> Self {
        let severity = report
            .violations
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::Low);
        ApiError::ComplianceViolation {
            severity,
            violation_count: report.violations.len(),
            report: Box::new(report),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::OptimisticLockFailure {
                entity_id,
                expected,
                actual,
            } => ApiError::SwapConflict(format!(
                "排班{}已被其他操作修改（期望revision={}，实际revision={}）",
                entity_id, expected, actual
            )),
            RepositoryError::LeaseTimeout { owner_id, waited_ms } => {
                ApiError::LockAcquisitionTimeout { owner_id, waited_ms }
            }
            RepositoryError::LeaseLost { owner_id } => ApiError::SwapConflict(format!(
                "{}的租约已过期或被回收，提交已放弃",
                owner_id
            )),

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::PersistenceFailure(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::PersistenceFailure(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::PersistenceFailure(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::InvalidInput(format!("引用的实体不存在: {}", msg))
            }

            // 数据质量错误
            RepositoryError::FieldValueError { field, message } => {
                ApiError::PersistenceFailure(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::Serialization(e) => ApiError::PersistenceFailure(e.to_string()),

            // 通用错误
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<SolverError> for ApiError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Infeasible {
                binding_constraint,
                detail,
            } => ApiError::InfeasibleSchedule {
                diagnostic: detail,
                binding_constraint,
            },
            SolverError::UnknownSolver(name) => ApiError::InvalidInput(format!("未知求解器: {}", name)),
            other @ (SolverError::Timeout { .. } | SolverError::Internal(_)) => {
                ApiError::SolverFailure(other.to_string())
            }
        }
    }
}

impl From<ConstraintError> for ApiError {
    fn from(err: ConstraintError) -> Self {
        match err {
            ConstraintError::DuplicateConstraint(id) => ApiError::DuplicateConstraint(id),
            other => ApiError::InvalidInput(other.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation(msg) => ApiError::InvalidInput(msg),
            other => ApiError::Config(other.to_string()),
        }
    }
}

impl From<InvalidRunTransition> for ApiError {
    fn from(err: InvalidRunTransition) -> Self {
        ApiError::InvalidStateTransition {
            from: err.from.to_string(),
            to: err.to.to_string(),
        }
    }
}

impl From<InvalidSwapTransition> for ApiError {
    fn from(err: InvalidSwapTransition) -> Self {
        ApiError::InvalidStateTransition {
            from: err.from.to_string(),
            to: err.to.to_string(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RunStatus, SwapStatus};
    use crate::domain::ComplianceViolation;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "SwapRecord".to_string(),
            id: "S001".to_string(),
        };
        match ApiError::from(repo_err) {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("SwapRecord"));
                assert!(msg.contains("S001"));
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let repo_err = RepositoryError::OptimisticLockFailure {
            entity_id: "A001".to_string(),
            expected: 1,
            actual: 2,
        };
        match ApiError::from(repo_err) {
            ApiError::SwapConflict(msg) => assert!(msg.contains("A001")),
            other => panic!("Expected SwapConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_only_lock_timeout_is_retryable() {
        let err: ApiError = RepositoryError::LeaseTimeout {
            owner_id: "swap-1".to_string(),
            waited_ms: 5000,
        }
        .into();
        assert!(err.is_retryable());
        assert!(!ApiError::SwapConflict("x".to_string()).is_retryable());
        assert!(!ApiError::PersistenceFailure("x".to_string()).is_retryable());
    }

    #[test]
    fn test_lost_lease_is_conflict_not_retryable() {
        let err: ApiError = RepositoryError::LeaseLost {
            owner_id: "generation:run-1".to_string(),
        }
        .into();
        match &err {
            ApiError::SwapConflict(msg) => assert!(msg.contains("generation:run-1")),
            other => panic!("Expected SwapConflict, got {:?}", other),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_compliance_error_takes_highest_severity() {
        let mut report = ComplianceReport::empty();
        for severity in [Severity::Medium, Severity::Critical, Severity::High] {
            report.violations.push(ComplianceViolation {
                rule_id: "work_hours".to_string(),
                severity,
                person_ids: vec!["R1".to_string()],
                date: None,
                message: String::new(),
            });
        }
        match ApiError::compliance(report) {
            ApiError::ComplianceViolation {
                severity,
                violation_count,
                ..
            } => {
                assert_eq!(severity, Severity::Critical);
                assert_eq!(violation_count, 3);
            }
            other => panic!("Expected ComplianceViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_solver_and_transition_conversions() {
        let err: ApiError = SolverError::UnknownSolver("annealing".to_string()).into();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err: ApiError = InvalidRunTransition {
            from: RunStatus::Completed,
            to: RunStatus::Solving,
        }
        .into();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        let err: ApiError = InvalidSwapTransition {
            from: SwapStatus::RolledBack,
            to: SwapStatus::Executed,
        }
        .into();
        match err {
            ApiError::InvalidStateTransition { from, to } => {
                assert_eq!(from, "ROLLED_BACK");
                assert_eq!(to, "EXECUTED");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
