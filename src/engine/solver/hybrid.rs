// ==========================================
// 住院医师排班系统 - 混合求解器
// ==========================================
// 1. 贪心求解
// 2. 贪心完整且无标记 → 其目标值作为精确搜索的初始上界
// 3. 贪心决策始终作为精确搜索的取值顺序提示
// ==========================================

use crate::engine::context::SchedulingContext;
use crate::engine::solver::exact::ExactSolver;
use crate::engine::solver::greedy::GreedySolver;
use crate::engine::solver::{SolverError, SolverKind, SolverResult};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct HybridSolver;

impl HybridSolver {
    pub fn new() -> Self {
        Self
    }

    pub fn solve(&self, ctx: &SchedulingContext, deadline: Instant) -> Result<SolverResult, SolverError> {
        let exact = match GreedySolver::new().run(ctx, deadline) {
            Ok(seed) if seed.is_complete() => {
                tracing::debug!(
                    objective = seed.objective,
                    placements = seed.placements.len(),
                    "贪心结果作为初始上界"
                );
                ExactSolver::new()
                    .with_hint(&seed.placements)
                    .with_incumbent(seed.placements, seed.objective)
            }
            Ok(seed) => {
                tracing::debug!(
                    unfilled = seed.unfilled.len(),
                    flagged = seed.flagged.len(),
                    "贪心结果不完整，仅作为取值顺序提示"
                );
                ExactSolver::new().with_hint(&seed.placements)
            }
            Err(e) => {
                tracing::warn!(error = %e, "贪心阶段失败，直接进行精确搜索");
                ExactSolver::new()
            }
        };

        exact.solve_as(SolverKind::Hybrid, ctx, deadline)
    }
}
