// ==========================================
// 住院医师排班系统 - 求解器
// ==========================================
// 约定: solve(ctx, deadline) 只读上下文，返回新生成的排班（不含保留排班）
// - greedy: 稀缺优先的确定性贪心，不回溯
// - exact:  分支定界，硬约束剪枝、软约束加权目标
// - hybrid: 贪心结果作为精确搜索的初始上界与取值顺序
// ==========================================

pub mod exact;
pub mod factory;
pub mod greedy;
pub mod hybrid;

use crate::domain::{Assignment, ConstraintViolation, Session};
use crate::engine::constraints::ids;
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

pub use exact::ExactSolver;
pub use factory::{SolverFactory, SolverFailure, SolverOutcome};
pub use greedy::GreedySolver;
pub use hybrid::HybridSolver;

// ==========================================
// 求解结果
// ==========================================

/// 求解状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    /// 搜索完成，已证明最优
    Optimal,
    /// 可行解（贪心，或未证明最优）
    Feasible,
    /// 截止时间到达，返回当前最优
    TimedOut,
    /// 搜索穷尽，无可行解
    Infeasible,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::TimedOut => "TIMED_OUT",
            SolveStatus::Infeasible => "INFEASIBLE",
        };
        write!(f, "{}", s)
    }
}

/// 贪心未能填满的住院医师席位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfilledSlot {
    pub block_id: String,
    pub template_id: String,
    pub date: NaiveDate,
    pub session: Session,
    pub missing: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResult {
    pub assignments: Vec<Assignment>,
    pub objective_value: f64,
    pub feasible: bool,
    pub optimal: bool,
    pub solver_name: String,
    pub elapsed_seconds: f64,
    pub unfilled_slots: Vec<UnfilledSlot>,
    pub flagged: Vec<ConstraintViolation>,
    pub nodes_explored: u64,
    pub status: SolveStatus,
    /// 无解时剪枝次数最多的约束
    pub binding_constraint: Option<String>,
}

impl SolverResult {
    pub fn is_timed_out(&self) -> bool {
        self.status == SolveStatus::TimedOut
    }

    /// 诊断摘要（写入运行记录）
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "solver_name": self.solver_name,
            "status": self.status,
            "feasible": self.feasible,
            "optimal": self.optimal,
            "objective_value": self.objective_value,
            "elapsed_seconds": self.elapsed_seconds,
            "nodes_explored": self.nodes_explored,
            "new_assignments": self.assignments.len(),
            "unfilled_slots": self.unfilled_slots,
            "flagged": self.flagged,
            "binding_constraint": self.binding_constraint,
        })
    }
}

// ==========================================
// 求解错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("无可行解: binding_constraint={binding_constraint:?}, {detail}")]
    Infeasible {
        binding_constraint: Option<String>,
        detail: String,
    },

    #[error("求解超时且无可用解: solver={solver_name}, elapsed={elapsed_seconds:.3}s")]
    Timeout {
        solver_name: String,
        elapsed_seconds: f64,
    },

    #[error("未知求解器: {0}")]
    UnknownSolver(String),

    #[error("求解器内部错误: {0}")]
    Internal(String),
}

// ==========================================
// 求解器选择
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Greedy,
    Exact,
    Hybrid,
}

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Greedy => "greedy",
            SolverKind::Exact => "exact",
            SolverKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SolverKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "greedy" => Ok(SolverKind::Greedy),
            "exact" => Ok(SolverKind::Exact),
            "hybrid" => Ok(SolverKind::Hybrid),
            other => Err(SolverError::UnknownSolver(other.to_string())),
        }
    }
}

/// 求解器分派
#[derive(Debug, Clone)]
pub enum Solver {
    Greedy(GreedySolver),
    Exact(ExactSolver),
    Hybrid(HybridSolver),
}

impl Solver {
    pub fn for_kind(kind: SolverKind) -> Self {
        match kind {
            SolverKind::Greedy => Solver::Greedy(GreedySolver::new()),
            SolverKind::Exact => Solver::Exact(ExactSolver::new()),
            SolverKind::Hybrid => Solver::Hybrid(HybridSolver::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Solver::Greedy(_) => SolverKind::Greedy.as_str(),
            Solver::Exact(_) => SolverKind::Exact.as_str(),
            Solver::Hybrid(_) => SolverKind::Hybrid.as_str(),
        }
    }

    pub fn solve(&self, ctx: &SchedulingContext, deadline: Instant) -> Result<SolverResult, SolverError> {
        match self {
            Solver::Greedy(s) => s.solve(ctx, deadline),
            Solver::Exact(s) => s.solve(ctx, deadline),
            Solver::Hybrid(s) => s.solve(ctx, deadline),
        }
    }
}

// ==========================================
// 求解器共用
// ==========================================

/// 以区间外排班与保留排班初始化部分排班，返回 (部分排班, 保留排班的目标值)
///
/// 区间外排班只计入工时/休息统计，不计目标值
pub(crate) fn seed_partial(ctx: &SchedulingContext) -> (PartialSchedule, f64) {
    let mut partial = PartialSchedule::new(ctx);
    for placement in ctx.surrounding.iter().filter_map(|a| ctx.placement_of(a)) {
        partial.push(placement, ctx);
    }

    let mut cost = 0.0;
    for placement in ctx.preserved.iter().filter_map(|a| ctx.placement_of(a)) {
        cost += ctx.constraints.marginal_cost(&placement, &partial, ctx);
        partial.push(placement, ctx);
    }
    (partial, cost)
}

/// 实例仍需的住院医师人数（扣除已有人员）
pub(crate) fn residents_needed(instance: &SlotInstance, partial: &PartialSchedule, ctx: &SchedulingContext) -> u32 {
    let tally = partial.tally(instance.block, instance.template);
    ctx.templates[instance.template]
        .min_coverage
        .saturating_sub(tally.residents)
}

/// 实例仍需的带教人数（按当前住院医师构成）；监督约束停用时为 0
pub(crate) fn faculty_needed(instance: &SlotInstance, partial: &PartialSchedule, ctx: &SchedulingContext) -> u32 {
    if !ctx.constraints.is_enabled(ids::SUPERVISION_RATIO) {
        return 0;
    }
    let tally = partial.tally(instance.block, instance.template);
    ctx.templates[instance.template]
        .required_supervisors(tally.pgy1, tally.seniors)
        .saturating_sub(tally.faculty)
}

/// 新决策 → 排班记录
pub(crate) fn to_assignments(placements: &[Placement], ctx: &SchedulingContext) -> Vec<Assignment> {
    placements.iter().map(|p| ctx.to_assignment(p)).collect()
}
