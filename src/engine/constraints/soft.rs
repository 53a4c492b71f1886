// ==========================================
// 住院医师排班系统 - 软约束
// ==========================================
// 惩罚项以平方和/切换次数表达，增量惩罚对追加单调非减
// ==========================================

use crate::domain::types::ConstraintKind;
use crate::domain::Assignment;
use crate::engine::constraints::{
    ids, partial_from_assignments, Constraint, ConstraintCategory, ConstraintEvaluation,
};
use crate::engine::context::{Placement, SchedulingContext};
use crate::engine::partial::PartialSchedule;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

// ==========================================
// 工作量均衡: Σ 住院医师排班数²
// ==========================================
#[derive(Debug)]
pub struct WorkloadEquityConstraint {
    weight: f64,
}

impl WorkloadEquityConstraint {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for WorkloadEquityConstraint {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Constraint for WorkloadEquityConstraint {
    fn id(&self) -> &str {
        ids::WORKLOAD_EQUITY
    }

    fn name(&self) -> &str {
        "工作量均衡"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Fairness
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        let penalty: u32 = (0..ctx.people.len())
            .filter(|p| ctx.people[*p].is_resident())
            .map(|p| partial.assignment_count(p).pow(2))
            .sum();
        ConstraintEvaluation::penalty(penalty as f64)
    }

    fn marginal_penalty(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        if !ctx.people[candidate.person].is_resident() {
            return 0.0;
        }
        // (c+1)² - c²
        (2 * partial.assignment_count(candidate.person) + 1) as f64
    }

    /// 注水下界: 每个席位都给当前排班最少的住院医师
    fn completion_bound(&self, resident_seats: u32, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        let mut counts: BinaryHeap<Reverse<u32>> = (0..ctx.people.len())
            .filter(|p| ctx.people[*p].is_resident())
            .map(|p| Reverse(partial.assignment_count(p)))
            .collect();

        let mut bound = 0u64;
        for _ in 0..resident_seats {
            let Some(Reverse(c)) = counts.pop() else {
                break;
            };
            bound += (2 * c + 1) as u64;
            counts.push(Reverse(c + 1));
        }
        bound as f64
    }
}

// ==========================================
// 周末均衡: Σ 住院医师周末排班数²
// ==========================================
#[derive(Debug)]
pub struct WeekendEquityConstraint {
    weight: f64,
}

impl WeekendEquityConstraint {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for WeekendEquityConstraint {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Constraint for WeekendEquityConstraint {
    fn id(&self) -> &str {
        ids::WEEKEND_EQUITY
    }

    fn name(&self) -> &str {
        "周末均衡"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Fairness
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        let penalty: u32 = (0..ctx.people.len())
            .filter(|p| ctx.people[*p].is_resident())
            .map(|p| partial.weekend_count(p).pow(2))
            .sum();
        ConstraintEvaluation::penalty(penalty as f64)
    }

    fn marginal_penalty(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        if !ctx.people[candidate.person].is_resident() || !ctx.blocks[candidate.block].is_weekend {
            return 0.0;
        }
        (2 * partial.weekend_count(candidate.person) + 1) as f64
    }
}

// ==========================================
// 轮转连续性: 个人时间线上相邻两次排班模板不同计 1 次切换
// ==========================================
#[derive(Debug)]
pub struct RotationContinuityConstraint {
    weight: f64,
}

impl RotationContinuityConstraint {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for RotationContinuityConstraint {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Constraint for RotationContinuityConstraint {
    fn id(&self) -> &str {
        ids::ROTATION_CONTINUITY
    }

    fn name(&self) -> &str {
        "轮转连续性"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Continuity
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        let switches: usize = (0..ctx.people.len())
            .map(|p| {
                let timeline: Vec<usize> = partial.timeline(p).collect();
                timeline.windows(2).filter(|w| w[0] != w[1]).count()
            })
            .sum();
        ConstraintEvaluation::penalty(switches as f64)
    }

    fn marginal_penalty(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> f64 {
        let key = ctx.blocks[candidate.block].time_key();
        let t = candidate.template;
        match partial.neighbors(candidate.person, key) {
            (None, None) => 0.0,
            (Some(before), None) => (before != t) as u8 as f64,
            (None, Some(after)) => (after != t) as u8 as f64,
            // 插入中间: 新增两段，拆掉原来一段；三角不等式保证非负
            (Some(before), Some(after)) => {
                let added = (before != t) as i32 + (after != t) as i32;
                let removed = (before != after) as i32;
                (added - removed) as f64
            }
        }
    }
}
