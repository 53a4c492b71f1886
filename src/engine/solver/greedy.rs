// ==========================================
// 住院医师排班系统 - 贪心求解器
// ==========================================
// 顺序: 稀缺实例优先（可用住院医师 - 需求人数 越小越先），
//       同等稀缺按 (日期, 时段, 模板ID)
// 选择: 所有硬约束 admits 的候选中增量惩罚最小者，平局按人员ID
// 不回溯: 填不满的住院医师席位记入 unfilled_slots，
//         带教不足记入 flagged（不作为失败）
// ==========================================

use crate::domain::types::{ConstraintKind, Severity};
use crate::domain::ConstraintViolation;
use crate::engine::constraints::ids;
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use crate::engine::solver::{
    faculty_needed, residents_needed, seed_partial, to_assignments, SolveStatus, SolverError,
    SolverKind, SolverResult, UnfilledSlot,
};
use std::time::Instant;

/// 贪心求解的中间结果（供 hybrid 复用）
#[derive(Debug, Clone)]
pub(crate) struct GreedyRun {
    pub placements: Vec<Placement>,
    pub objective: f64,
    pub unfilled: Vec<UnfilledSlot>,
    pub flagged: Vec<ConstraintViolation>,
}

impl GreedyRun {
    /// 每个实例都已填满且无标记
    pub fn is_complete(&self) -> bool {
        self.unfilled.is_empty() && self.flagged.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GreedySolver;

impl GreedySolver {
    pub fn new() -> Self {
        Self
    }

    pub fn solve(&self, ctx: &SchedulingContext, deadline: Instant) -> Result<SolverResult, SolverError> {
        let started = Instant::now();
        let run = self.run(ctx, deadline)?;

        tracing::info!(
            new_assignments = run.placements.len(),
            unfilled = run.unfilled.len(),
            flagged = run.flagged.len(),
            objective = run.objective,
            "贪心求解完成"
        );

        Ok(SolverResult {
            assignments: to_assignments(&run.placements, ctx),
            objective_value: run.objective,
            feasible: true,
            optimal: false,
            solver_name: SolverKind::Greedy.as_str().to_string(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            nodes_explored: run.placements.len() as u64,
            unfilled_slots: run.unfilled,
            flagged: run.flagged,
            status: SolveStatus::Feasible,
            binding_constraint: None,
        })
    }

    pub(crate) fn run(&self, ctx: &SchedulingContext, deadline: Instant) -> Result<GreedyRun, SolverError> {
        let started = Instant::now();
        let (mut partial, mut objective) = seed_partial(ctx);
        let preserved_len = partial.len();

        let mut unfilled = Vec::new();
        let mut flagged = Vec::new();

        for instance in scarcity_order(ctx, &partial) {
            if Instant::now() >= deadline {
                return Err(SolverError::Timeout {
                    solver_name: SolverKind::Greedy.as_str().to_string(),
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                });
            }

            let (residents, faculty) = ctx.candidates(&instance);

            let need_r = residents_needed(&instance, &partial, ctx);
            let placed = fill_seats(&instance, &residents, need_r, &mut partial, &mut objective, ctx);
            if placed < need_r {
                let block = &ctx.blocks[instance.block];
                unfilled.push(UnfilledSlot {
                    block_id: block.block_id.clone(),
                    template_id: ctx.templates[instance.template].template_id.clone(),
                    date: block.date,
                    session: block.session,
                    missing: need_r - placed,
                });
            }

            let need_f = faculty_needed(&instance, &partial, ctx);
            let placed = fill_seats(&instance, &faculty, need_f, &mut partial, &mut objective, ctx);
            if placed < need_f {
                flagged.push(supervision_flag(&instance, need_f - placed, &partial, ctx));
            }
        }

        Ok(GreedyRun {
            placements: partial.placements()[preserved_len..].to_vec(),
            objective,
            unfilled,
            flagged,
        })
    }
}

/// 稀缺度排序: (候选住院医师数 - 需求, 日期, 时段, 模板ID)
fn scarcity_order(ctx: &SchedulingContext, partial: &PartialSchedule) -> Vec<SlotInstance> {
    let mut instances = ctx.instances();
    instances.sort_by_cached_key(|i| {
        let (residents, _) = ctx.candidates(i);
        let slack = residents.len() as i64 - residents_needed(i, partial, ctx) as i64;
        let block = &ctx.blocks[i.block];
        (
            slack,
            block.date,
            block.session,
            ctx.templates[i.template].template_id.clone(),
        )
    });
    instances
}

/// 逐席位选最低增量惩罚的候选；返回实际填入人数
fn fill_seats(
    instance: &SlotInstance,
    candidates: &[usize],
    seats: u32,
    partial: &mut PartialSchedule,
    objective: &mut f64,
    ctx: &SchedulingContext,
) -> u32 {
    for filled in 0..seats {
        let best = candidates
            .iter()
            .map(|&person| Placement {
                person,
                block: instance.block,
                template: instance.template,
            })
            .filter(|p| ctx.constraints.first_rejection(p, partial, ctx).is_none())
            .map(|p| (p, ctx.constraints.marginal_cost(&p, partial, ctx)))
            .min_by(|(pa, ca), (pb, cb)| {
                ca.total_cmp(cb)
                    .then_with(|| ctx.people[pa.person].person_id.cmp(&ctx.people[pb.person].person_id))
            });

        match best {
            Some((placement, cost)) => {
                *objective += cost;
                partial.push(placement, ctx);
            }
            None => return filled,
        }
    }
    seats
}

fn supervision_flag(
    instance: &SlotInstance,
    missing: u32,
    partial: &PartialSchedule,
    ctx: &SchedulingContext,
) -> ConstraintViolation {
    let mut violation = ConstraintViolation::new(
        ids::SUPERVISION_RATIO,
        ConstraintKind::Hard,
        Severity::Medium,
        format!("{} 缺少 {} 名带教", ctx.describe_instance(instance), missing),
    )
    .with_block(&ctx.blocks[instance.block].block_id);

    for p in partial
        .placements()
        .iter()
        .filter(|p| p.block == instance.block && p.template == instance.template)
    {
        violation = violation.with_person(&ctx.people[p.person].person_id);
    }
    violation
}
