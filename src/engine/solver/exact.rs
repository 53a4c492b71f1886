// ==========================================
// 住院医师排班系统 - 精确求解器（分支定界）
// ==========================================
// 决策变量: (人员, 块, 模板) 0/1，仅限可用且资质匹配的三元组
// 分支: 逐实例枚举住院医师组合（规模 = 剩余覆盖需求），
//       再枚举带教组合（规模 = 监督需求）
// 剪枝: 硬约束 admits / closes；部分目标值 + 剩余下界 ≥ 当前上界
// 截止: 每 1024 个节点检查一次；到期返回当前最优（非最优证明）
// ==========================================

use crate::engine::constraints::ids;
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use crate::engine::solver::{
    faculty_needed, residents_needed, seed_partial, to_assignments, SolveStatus, SolverError,
    SolverKind, SolverResult,
};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// 截止时间检查间隔（节点数）
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Default)]
pub struct ExactSolver {
    incumbent: Option<(Vec<Placement>, f64)>,
    hint: HashSet<Placement>,
}

impl ExactSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已知可行解作为初始上界
    pub fn with_incumbent(mut self, placements: Vec<Placement>, objective: f64) -> Self {
        self.incumbent = Some((placements, objective));
        self
    }

    /// 取值顺序提示: 提示中的决策优先尝试
    pub fn with_hint(mut self, placements: &[Placement]) -> Self {
        self.hint = placements.iter().copied().collect();
        self
    }

    pub fn solve(&self, ctx: &SchedulingContext, deadline: Instant) -> Result<SolverResult, SolverError> {
        self.solve_as(SolverKind::Exact, ctx, deadline)
    }

    pub(crate) fn solve_as(
        &self,
        kind: SolverKind,
        ctx: &SchedulingContext,
        deadline: Instant,
    ) -> Result<SolverResult, SolverError> {
        let started = Instant::now();
        let (partial, base_cost) = seed_partial(ctx);
        let instances = ctx.instances();

        // 各位置之后（含）尚需的住院医师席位数
        let mut seats_after = vec![0u32; instances.len() + 1];
        for (i, instance) in instances.iter().enumerate().rev() {
            seats_after[i] = seats_after[i + 1] + residents_needed(instance, &partial, ctx);
        }

        let mut search = Search {
            ctx,
            deadline,
            hint: &self.hint,
            instances,
            seats_after,
            preserved_len: partial.len(),
            partial,
            best: self.incumbent.clone(),
            best_cost: self
                .incumbent
                .as_ref()
                .map(|(_, cost)| *cost)
                .unwrap_or(f64::INFINITY),
            nodes: 0,
            prunes: BTreeMap::new(),
            timed_out: false,
        };
        search.dfs(0, base_cost);

        let elapsed_seconds = started.elapsed().as_secs_f64();
        let solver_name = kind.as_str().to_string();

        tracing::info!(
            solver = %solver_name,
            nodes = search.nodes,
            timed_out = search.timed_out,
            found = search.best.is_some(),
            elapsed_seconds,
            "分支定界搜索结束"
        );

        match (search.best.take(), search.timed_out) {
            (Some((placements, cost)), timed_out) => Ok(SolverResult {
                assignments: to_assignments(&placements, ctx),
                objective_value: cost,
                feasible: true,
                optimal: !timed_out,
                solver_name,
                elapsed_seconds,
                unfilled_slots: Vec::new(),
                flagged: Vec::new(),
                nodes_explored: search.nodes,
                status: if timed_out {
                    SolveStatus::TimedOut
                } else {
                    SolveStatus::Optimal
                },
                binding_constraint: None,
            }),
            (None, true) => Err(SolverError::Timeout {
                solver_name,
                elapsed_seconds,
            }),
            (None, false) => {
                let binding = search.binding_constraint();
                tracing::warn!(binding_constraint = ?binding, prunes = ?search.prunes, "搜索穷尽，无可行解");
                Ok(SolverResult {
                    assignments: Vec::new(),
                    objective_value: 0.0,
                    feasible: false,
                    optimal: false,
                    solver_name,
                    elapsed_seconds,
                    unfilled_slots: Vec::new(),
                    flagged: Vec::new(),
                    nodes_explored: search.nodes,
                    status: SolveStatus::Infeasible,
                    binding_constraint: binding,
                })
            }
        }
    }
}

// ==========================================
// 搜索状态
// ==========================================
struct Search<'a> {
    ctx: &'a SchedulingContext,
    deadline: Instant,
    hint: &'a HashSet<Placement>,
    instances: Vec<SlotInstance>,
    seats_after: Vec<u32>,
    preserved_len: usize,
    partial: PartialSchedule,
    best: Option<(Vec<Placement>, f64)>,
    best_cost: f64,
    nodes: u64,
    prunes: BTreeMap<String, u64>,
    timed_out: bool,
}

/// 当前实例所处的分支阶段
#[derive(Clone, Copy)]
enum Seat {
    Resident,
    Faculty,
}

impl<'a> Search<'a> {
    fn tick(&mut self) -> bool {
        self.nodes += 1;
        if self.nodes % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            self.timed_out = true;
        }
        !self.timed_out
    }

    fn record_prune(&mut self, constraint_id: &str) {
        *self.prunes.entry(constraint_id.to_string()).or_insert(0) += 1;
    }

    /// 剪枝次数最多的约束；并列取ID较小者
    fn binding_constraint(&self) -> Option<String> {
        self.prunes
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, _)| id.clone())
    }

    /// 部分目标值 + 剩余席位下界 ≥ 上界时剪枝
    fn bounded_out(&self, cost: f64, resident_seats: u32) -> bool {
        cost + self
            .ctx
            .constraints
            .completion_bound(resident_seats, &self.partial, self.ctx)
            >= self.best_cost
    }

    fn dfs(&mut self, index: usize, cost: f64) {
        if !self.tick() || self.bounded_out(cost, self.seats_after[index]) {
            return;
        }

        if index == self.instances.len() {
            let placements = self.partial.placements()[self.preserved_len..].to_vec();
            tracing::debug!(cost, nodes = self.nodes, "找到更优解");
            self.best_cost = cost;
            self.best = Some((placements, cost));
            return;
        }

        let instance = self.instances[index];
        let (residents, _) = self.ctx.candidates(&instance);
        let need = residents_needed(&instance, &self.partial, self.ctx);
        let ordered = self.value_order(&instance, residents);
        self.choose(index, instance, Seat::Resident, &ordered, 0, need, cost);
    }

    /// 组合枚举: 从 candidates[from..] 中再选 remaining 人
    #[allow(clippy::too_many_arguments)]
    fn choose(
        &mut self,
        index: usize,
        instance: SlotInstance,
        seat: Seat,
        candidates: &[usize],
        from: usize,
        remaining: u32,
        cost: f64,
    ) {
        if self.timed_out {
            return;
        }

        if remaining == 0 {
            match seat {
                Seat::Resident => {
                    let (_, faculty) = self.ctx.candidates(&instance);
                    let need = faculty_needed(&instance, &self.partial, self.ctx);
                    let ordered = self.value_order(&instance, faculty);
                    self.choose(index, instance, Seat::Faculty, &ordered, 0, need, cost);
                }
                Seat::Faculty => {
                    if let Some(id) = self
                        .ctx
                        .constraints
                        .first_unclosed(&instance, &self.partial, self.ctx)
                        .map(str::to_string)
                    {
                        self.record_prune(&id);
                        return;
                    }
                    self.dfs(index + 1, cost);
                }
            }
            return;
        }

        if candidates.len().saturating_sub(from) < remaining as usize {
            self.record_prune(match seat {
                Seat::Resident => ids::COVERAGE,
                Seat::Faculty => ids::SUPERVISION_RATIO,
            });
            return;
        }

        for i in from..candidates.len() {
            if candidates.len() - i < remaining as usize || !self.tick() {
                return;
            }

            let placement = Placement {
                person: candidates[i],
                block: instance.block,
                template: instance.template,
            };
            if let Some(id) = self
                .ctx
                .constraints
                .first_rejection(&placement, &self.partial, self.ctx)
                .map(str::to_string)
            {
                self.record_prune(&id);
                continue;
            }

            let next_cost = cost + self.ctx.constraints.marginal_cost(&placement, &self.partial, self.ctx);
            let seats_left = self.seats_after[index + 1]
                + match seat {
                    Seat::Resident => remaining - 1,
                    Seat::Faculty => 0,
                };

            self.partial.push(placement, self.ctx);
            if !self.bounded_out(next_cost, seats_left) {
                self.choose(index, instance, seat, candidates, i + 1, remaining - 1, next_cost);
            }
            self.partial.pop(self.ctx);
        }
    }

    /// 取值顺序: 提示优先，其次当前增量惩罚，最后人员ID
    fn value_order(&self, instance: &SlotInstance, mut people: Vec<usize>) -> Vec<usize> {
        let key = |person: &usize| {
            let placement = Placement {
                person: *person,
                block: instance.block,
                template: instance.template,
            };
            (
                !self.hint.contains(&placement),
                self.ctx.constraints.marginal_cost(&placement, &self.partial, self.ctx),
            )
        };
        people.sort_by(|a, b| {
            let (ha, ca) = key(a);
            let (hb, cb) = key(b);
            ha.cmp(&hb)
                .then(ca.total_cmp(&cb))
                .then_with(|| self.ctx.people[*a].person_id.cmp(&self.ctx.people[*b].person_id))
        });
        people
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Person, RotationTemplate, SeniorityTier, Severity};
    use crate::engine::compliance::ComplianceValidator;
    use crate::engine::context::test_support::*;
    use crate::engine::solver::GreedySolver;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_exact_week_with_supervision_is_optimal_and_compliant() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(7),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        let result = ExactSolver::new().solve(&ctx, far_deadline()).unwrap();

        assert!(result.feasible);
        assert!(result.optimal);
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!(ctx.constraints.hard_violations(&result.assignments, &ctx).is_empty());

        let report = ComplianceValidator::new().validate(&result.assignments, &ctx);
        assert_eq!(report.count_by_severity(Severity::Critical), 0);
        assert!(report.is_compliant());
    }

    #[test]
    fn test_exact_never_worse_than_greedy() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(7),
            vec![
                RotationTemplate::new("T1", "Clinic", 1, 3),
                RotationTemplate::new("T2", "Ward", 1, 3),
            ],
            Vec::new(),
            Vec::new(),
        );
        let greedy = GreedySolver::new().solve(&ctx, far_deadline()).unwrap();
        let exact = ExactSolver::new().solve(&ctx, far_deadline()).unwrap();
        assert!(exact.feasible);
        if greedy.unfilled_slots.is_empty() && greedy.flagged.is_empty() {
            assert!(exact.objective_value <= greedy.objective_value + 1e-9);
        }
    }

    #[test]
    fn test_exact_reports_binding_constraint_when_infeasible() {
        // 仅有 PGY1，无带教: 监督比例无法满足
        let people = vec![
            Person::resident("R1", "Resident One", SeniorityTier::Pgy1),
            Person::resident("R2", "Resident Two", SeniorityTier::Pgy1),
        ];
        let ctx = context_with(
            people,
            daily_blocks(2),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        let result = ExactSolver::new().solve(&ctx, far_deadline()).unwrap();

        assert!(!result.feasible);
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert_eq!(result.binding_constraint.as_deref(), Some(ids::SUPERVISION_RATIO));
    }

    #[test]
    fn test_exact_times_out_without_incumbent() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(28),
            vec![
                RotationTemplate::new("T1", "Clinic", 2, 4),
                RotationTemplate::new("T2", "Ward", 1, 3),
            ],
            Vec::new(),
            Vec::new(),
        );
        let err = ExactSolver::new().solve(&ctx, Instant::now()).unwrap_err();
        assert!(matches!(err, SolverError::Timeout { .. }));
    }

    #[test]
    fn test_incumbent_returned_on_timeout() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(3),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        let greedy = GreedySolver::new().run(&ctx, far_deadline()).unwrap();
        let result = ExactSolver::new()
            .with_incumbent(greedy.placements.clone(), greedy.objective)
            .solve(&ctx, Instant::now())
            .unwrap();
        assert!(result.feasible);
        assert!(result.objective_value <= greedy.objective + 1e-9);
    }
}
