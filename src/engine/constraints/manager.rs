// ==========================================
// 住院医师排班系统 - 约束管理器
// ==========================================
// 职责: 注册、启停、预设；对外提供不可变快照供求解/校验使用
// 红线: 求解过程中只读取快照，管理器的变更不影响进行中的运行
// ==========================================

use crate::domain::types::ConstraintKind;
use crate::domain::{Assignment, ConstraintViolation};
use crate::engine::constraints::hard::{
    AvailabilityConstraint, CapacityConstraint, CoverageConstraint, EligibilityConstraint,
    MaxConsecutiveDaysConstraint, OnePerBlockConstraint, RestPeriodConstraint,
    SupervisionRatioConstraint, WorkHoursConstraint,
};
use crate::engine::constraints::soft::{
    RotationContinuityConstraint, WeekendEquityConstraint, WorkloadEquityConstraint,
};
use crate::engine::constraints::{ids, Constraint, ConstraintError};
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ==========================================
// 约束预设
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintPreset {
    /// 8 条核心硬约束 + 工作量均衡 + 轮转连续性
    Baseline,
    /// 全部约束
    Strict,
    /// 仅可用性、唯一性、容量
    Minimal,
}

impl ConstraintPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintPreset::Baseline => "baseline",
            ConstraintPreset::Strict => "strict",
            ConstraintPreset::Minimal => "minimal",
        }
    }

    /// 预设启用的约束ID；None 表示全部
    fn enabled_ids(&self) -> Option<&'static [&'static str]> {
        match self {
            ConstraintPreset::Baseline => Some(&[
                ids::AVAILABILITY,
                ids::ONE_PER_BLOCK,
                ids::CAPACITY,
                ids::ELIGIBILITY,
                ids::WORK_HOURS,
                ids::REST_PERIOD,
                ids::SUPERVISION_RATIO,
                ids::COVERAGE,
                ids::WORKLOAD_EQUITY,
                ids::ROTATION_CONTINUITY,
            ]),
            ConstraintPreset::Strict => None,
            ConstraintPreset::Minimal => {
                Some(&[ids::AVAILABILITY, ids::ONE_PER_BLOCK, ids::CAPACITY])
            }
        }
    }
}

impl fmt::Display for ConstraintPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConstraintPreset {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(ConstraintPreset::Baseline),
            "strict" => Ok(ConstraintPreset::Strict),
            "minimal" => Ok(ConstraintPreset::Minimal),
            other => Err(ConstraintError::UnknownPreset(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredConstraint {
    constraint: Arc<dyn Constraint>,
    enabled: bool,
}

// ==========================================
// ConstraintManager
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ConstraintManager {
    entries: Vec<RegisteredConstraint>,
}

impl ConstraintManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置约束并应用 baseline 预设
    pub fn with_defaults() -> Self {
        let builtin: Vec<Arc<dyn Constraint>> = vec![
            Arc::new(AvailabilityConstraint),
            Arc::new(OnePerBlockConstraint),
            Arc::new(CapacityConstraint),
            Arc::new(EligibilityConstraint),
            Arc::new(WorkHoursConstraint),
            Arc::new(RestPeriodConstraint),
            Arc::new(SupervisionRatioConstraint),
            Arc::new(CoverageConstraint),
            Arc::new(MaxConsecutiveDaysConstraint),
            Arc::new(WorkloadEquityConstraint::default()),
            Arc::new(RotationContinuityConstraint::default()),
            Arc::new(WeekendEquityConstraint::default()),
        ];

        let mut manager = Self::new();
        for constraint in builtin {
            manager.entries.push(RegisteredConstraint {
                constraint,
                enabled: false,
            });
        }
        manager.apply_preset(ConstraintPreset::Baseline);
        manager
    }

    /// 注册约束（ID 唯一）
    pub fn register(&mut self, constraint: Arc<dyn Constraint>, enabled: bool) -> Result<(), ConstraintError> {
        if self.find(constraint.id()).is_some() {
            return Err(ConstraintError::DuplicateConstraint(constraint.id().to_string()));
        }
        tracing::debug!(constraint_id = constraint.id(), enabled, "注册约束");
        self.entries.push(RegisteredConstraint { constraint, enabled });
        Ok(())
    }

    pub fn enable(&mut self, id: &str) -> Result<(), ConstraintError> {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: &str) -> Result<(), ConstraintError> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), ConstraintError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.constraint.id() == id)
            .ok_or_else(|| ConstraintError::UnknownConstraint(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    fn find(&self, id: &str) -> Option<&RegisteredConstraint> {
        self.entries.iter().find(|e| e.constraint.id() == id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.find(id).map(|e| e.enabled).unwrap_or(false)
    }

    /// 应用预设: 预设内启用，其余停用
    pub fn apply_preset(&mut self, preset: ConstraintPreset) {
        let allowed = preset.enabled_ids();
        for entry in &mut self.entries {
            entry.enabled = match allowed {
                Some(allowed_ids) => allowed_ids.iter().any(|id| *id == entry.constraint.id()),
                None => true,
            };
        }
        tracing::info!(preset = %preset, enabled = ?self.enabled_ids(), "应用约束预设");
    }

    pub fn hard_constraints(&self) -> Vec<Arc<dyn Constraint>> {
        self.by_kind(ConstraintKind::Hard)
    }

    pub fn soft_constraints(&self) -> Vec<Arc<dyn Constraint>> {
        self.by_kind(ConstraintKind::Soft)
    }

    fn by_kind(&self, kind: ConstraintKind) -> Vec<Arc<dyn Constraint>> {
        self.entries
            .iter()
            .filter(|e| e.constraint.kind() == kind)
            .map(|e| Arc::clone(&e.constraint))
            .collect()
    }

    /// 已启用的约束（注册顺序）
    pub fn enabled(&self) -> Vec<Arc<dyn Constraint>> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| Arc::clone(&e.constraint))
            .collect()
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.constraint.id().to_string())
            .collect()
    }

    /// 当前启用集合的不可变快照
    pub fn snapshot(&self) -> ConstraintSnapshot {
        ConstraintSnapshot::from_constraints(self.enabled())
    }

    /// 在当前启用集合上叠加单次运行的启停覆盖（不修改管理器）
    pub fn snapshot_with_overrides(
        &self,
        overrides: &HashMap<String, bool>,
    ) -> Result<ConstraintSnapshot, ConstraintError> {
        if let Some(unknown) = overrides.keys().find(|id| self.find(id).is_none()) {
            return Err(ConstraintError::UnknownConstraint(unknown.clone()));
        }

        let constraints = self
            .entries
            .iter()
            .filter(|e| {
                overrides
                    .get(e.constraint.id())
                    .copied()
                    .unwrap_or(e.enabled)
            })
            .map(|e| Arc::clone(&e.constraint))
            .collect();
        Ok(ConstraintSnapshot::from_constraints(constraints))
    }
}

// ==========================================
// ConstraintSnapshot - 单次运行使用的启用约束集合
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ConstraintSnapshot {
    hard: Vec<Arc<dyn Constraint>>,
    soft: Vec<Arc<dyn Constraint>>,
}

impl ConstraintSnapshot {
    fn from_constraints(constraints: Vec<Arc<dyn Constraint>>) -> Self {
        let (hard, soft): (Vec<_>, Vec<_>) = constraints
            .into_iter()
            .partition(|c| c.kind() == ConstraintKind::Hard);
        Self { hard, soft }
    }

    pub fn hard(&self) -> &[Arc<dyn Constraint>] {
        &self.hard
    }

    pub fn soft(&self) -> &[Arc<dyn Constraint>] {
        &self.soft
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.hard.iter().chain(self.soft.iter()).any(|c| c.id() == id)
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.hard
            .iter()
            .chain(self.soft.iter())
            .map(|c| c.id().to_string())
            .collect()
    }

    /// 全部硬约束的增量检查；返回第一个拒绝的约束ID
    pub fn first_rejection(
        &self,
        candidate: &Placement,
        partial: &PartialSchedule,
        ctx: &SchedulingContext,
    ) -> Option<&str> {
        self.hard
            .iter()
            .find(|c| !c.admits(candidate, partial, ctx))
            .map(|c| c.id())
    }

    /// 全部硬约束的实例完成检查；返回第一个未满足的约束ID
    pub fn first_unclosed(
        &self,
        instance: &SlotInstance,
        partial: &PartialSchedule,
        ctx: &SchedulingContext,
    ) -> Option<&str> {
        self.hard
            .iter()
            .find(|c| !c.closes(instance, partial, ctx))
            .map(|c| c.id())
    }

    /// 加权增量惩罚
    pub fn marginal_cost(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        self.soft
            .iter()
            .map(|c| c.weight() * c.marginal_penalty(candidate, partial, ctx))
            .sum()
    }

    /// 再填 resident_seats 个住院医师席位的加权惩罚下界
    pub fn completion_bound(&self, resident_seats: u32, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        self.soft
            .iter()
            .map(|c| c.weight() * c.completion_bound(resident_seats, partial, ctx))
            .sum()
    }

    /// 完整排班的加权目标值
    pub fn objective(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> f64 {
        self.soft
            .iter()
            .map(|c| c.weight() * c.evaluate(assignments, ctx).penalty)
            .sum()
    }

    /// 完整排班的全部硬约束违规
    pub fn hard_violations(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> Vec<ConstraintViolation> {
        self.hard
            .iter()
            .flat_map(|c| c.evaluate(assignments, ctx).violations)
            .collect()
    }
}
