// ==========================================
// 住院医师排班系统 - 约束库
// ==========================================
// 硬约束: 求解器剪枝规则（admits 增量检查 + closes 实例完成检查）
// 软约束: 目标函数惩罚（marginal_penalty 单调非减，可作为分支定界下界）
// ==========================================

pub mod hard;
pub mod manager;
pub mod soft;

use crate::domain::types::ConstraintKind;
use crate::domain::{Assignment, ConstraintViolation};
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use hard::{
    AvailabilityConstraint, CapacityConstraint, CoverageConstraint, EligibilityConstraint,
    MaxConsecutiveDaysConstraint, OnePerBlockConstraint, RestPeriodConstraint,
    SupervisionRatioConstraint, WorkHoursConstraint,
};
pub use manager::{ConstraintManager, ConstraintPreset, ConstraintSnapshot};
pub use soft::{RotationContinuityConstraint, WeekendEquityConstraint, WorkloadEquityConstraint};

/// 约束ID常量
pub mod ids {
    pub const AVAILABILITY: &str = "availability";
    pub const ONE_PER_BLOCK: &str = "one_per_block";
    pub const CAPACITY: &str = "capacity";
    pub const ELIGIBILITY: &str = "eligibility";
    pub const WORK_HOURS: &str = "work_hours";
    pub const REST_PERIOD: &str = "rest_period";
    pub const SUPERVISION_RATIO: &str = "supervision_ratio";
    pub const COVERAGE: &str = "coverage";
    pub const WORKLOAD_EQUITY: &str = "workload_equity";
    pub const ROTATION_CONTINUITY: &str = "rotation_continuity";
    pub const MAX_CONSECUTIVE_DAYS: &str = "max_consecutive_days";
    pub const WEEKEND_EQUITY: &str = "weekend_equity";
}

// ==========================================
// 约束分类
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintCategory {
    Availability,
    Capacity,
    Compliance,
    Coverage,
    Supervision,
    Fairness,
    Continuity,
    Eligibility,
}

impl fmt::Display for ConstraintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintCategory::Availability => "AVAILABILITY",
            ConstraintCategory::Capacity => "CAPACITY",
            ConstraintCategory::Compliance => "COMPLIANCE",
            ConstraintCategory::Coverage => "COVERAGE",
            ConstraintCategory::Supervision => "SUPERVISION",
            ConstraintCategory::Fairness => "FAIRNESS",
            ConstraintCategory::Continuity => "CONTINUITY",
            ConstraintCategory::Eligibility => "ELIGIBILITY",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// 约束评估结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEvaluation {
    pub satisfied: bool,
    pub penalty: f64,
    pub violations: Vec<ConstraintViolation>,
}

impl ConstraintEvaluation {
    pub fn ok() -> Self {
        Self {
            satisfied: true,
            penalty: 0.0,
            violations: Vec::new(),
        }
    }

    /// 硬约束: 有违规即不满足
    pub fn from_violations(violations: Vec<ConstraintViolation>) -> Self {
        Self {
            satisfied: violations.is_empty(),
            penalty: 0.0,
            violations,
        }
    }

    /// 软约束: 始终满足，仅计惩罚
    pub fn penalty(penalty: f64) -> Self {
        Self {
            satisfied: true,
            penalty,
            violations: Vec::new(),
        }
    }
}

/// 约束注册/启停错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    #[error("约束ID重复: {0}")]
    DuplicateConstraint(String),

    #[error("未知约束: {0}")]
    UnknownConstraint(String),

    #[error("未知约束预设: {0}")]
    UnknownPreset(String),
}

// ==========================================
// Constraint Trait
// ==========================================
pub trait Constraint: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn kind(&self) -> ConstraintKind;

    fn category(&self) -> ConstraintCategory;

    /// 软约束惩罚系数
    fn weight(&self) -> f64 {
        1.0
    }

    /// 对完整排班集合求值
    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation;

    /// 增量检查: 在部分排班上追加 candidate 是否仍可行（单调）
    fn admits(&self, _candidate: &Placement, _partial: &PartialSchedule, _ctx: &SchedulingContext) -> bool {
        true
    }

    /// 实例完成检查: 该 (块, 模板) 不再追加人员时是否满足
    fn closes(&self, _instance: &SlotInstance, _partial: &PartialSchedule, _ctx: &SchedulingContext) -> bool {
        true
    }

    /// 增量惩罚（未加权）
    fn marginal_penalty(
        &self,
        _candidate: &Placement,
        _partial: &PartialSchedule,
        _ctx: &SchedulingContext,
    ) -> f64 {
        0.0
    }

    /// 再填 resident_seats 个住院医师席位时惩罚增量的下界（未加权）
    ///
    /// 不得高于任何补全方式的实际增量
    fn completion_bound(
        &self,
        _resident_seats: u32,
        _partial: &PartialSchedule,
        _ctx: &SchedulingContext,
    ) -> f64 {
        0.0
    }
}

/// 把排班集合解析为上下文下标；引用未知实体的记录被忽略
pub(crate) fn resolve_placements(
    assignments: &[Assignment],
    ctx: &SchedulingContext,
) -> Vec<(Placement, usize)> {
    assignments
        .iter()
        .enumerate()
        .filter_map(|(i, a)| ctx.placement_of(a).map(|p| (p, i)))
        .collect()
}

/// 以排班集合构造部分排班（evaluate 复用增量结构）
pub(crate) fn partial_from_assignments(
    assignments: &[Assignment],
    ctx: &SchedulingContext,
) -> PartialSchedule {
    let placements: Vec<Placement> = resolve_placements(assignments, ctx)
        .into_iter()
        .map(|(p, _)| p)
        .collect();
    PartialSchedule::from_placements(ctx, &placements)
}
