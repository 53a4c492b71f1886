// ==========================================
// 住院医师排班系统 - 硬约束
// ==========================================
// 被接受的排班绝不允许违反
// - admits: 单调增量检查（一旦不满足，追加更多排班也无法恢复）
// - closes: 实例完成检查（覆盖人数、监督比例）
// ==========================================

use crate::domain::types::{ConstraintKind, Severity};
use crate::domain::{Assignment, ConstraintViolation, Session};
use crate::engine::compliance::rules::{
    rolling_window_end, rolling_window_starts, run_length_through, DAYS_PER_WEEK, HOURS_TOLERANCE,
};
use crate::engine::compliance::validator::{
    consecutive_violations, rest_violations, supervision_violations, work_hour_violations,
};
use crate::engine::constraints::{
    ids, partial_from_assignments, resolve_placements, Constraint, ConstraintCategory,
    ConstraintEvaluation,
};
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use crate::engine::partial::PartialSchedule;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

fn hard_violation(id: &str, severity: Severity, message: String) -> ConstraintViolation {
    ConstraintViolation::new(id, ConstraintKind::Hard, severity, message)
}

// ==========================================
// 可用性: 阻断型缺勤期间不可排；模板在周末不开放时不可排
// ==========================================
#[derive(Debug, Default)]
pub struct AvailabilityConstraint;

impl Constraint for AvailabilityConstraint {
    fn id(&self) -> &str {
        ids::AVAILABILITY
    }

    fn name(&self) -> &str {
        "人员可用性"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Availability
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let violations = resolve_placements(assignments, ctx)
            .into_iter()
            .filter(|(p, _)| {
                !(ctx.is_available(p.person, ctx.blocks[p.block].date)
                    && ctx.template_applies(p.block, p.template))
            })
            .map(|(p, i)| {
                let a = &assignments[i];
                hard_violation(
                    self.id(),
                    Severity::Critical,
                    format!(
                        "{} 在 {} 不可排班（缺勤或模板 {} 不开放）",
                        a.person_id, ctx.blocks[p.block].date, a.template_id
                    ),
                )
                .with_person(&a.person_id)
                .with_block(&a.block_id)
            })
            .collect();
        ConstraintEvaluation::from_violations(violations)
    }

    fn admits(&self, candidate: &Placement, _partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        ctx.is_available(candidate.person, ctx.blocks[candidate.block].date)
            && ctx.template_applies(candidate.block, candidate.template)
    }
}

// ==========================================
// 每人每时段唯一: 同一 (person, block) 或同一 (日期, 时段) 至多一条
// ==========================================
#[derive(Debug, Default)]
pub struct OnePerBlockConstraint;

impl Constraint for OnePerBlockConstraint {
    fn id(&self) -> &str {
        ids::ONE_PER_BLOCK
    }

    fn name(&self) -> &str {
        "每人每时段唯一"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Capacity
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let mut by_slot: HashMap<(&str, NaiveDate, Session), Vec<&Assignment>> = HashMap::new();
        for (p, i) in resolve_placements(assignments, ctx) {
            let a = &assignments[i];
            let block = &ctx.blocks[p.block];
            by_slot
                .entry((a.person_id.as_str(), block.date, block.session))
                .or_default()
                .push(a);
        }

        let mut clashes: Vec<_> = by_slot.into_iter().filter(|(_, v)| v.len() > 1).collect();
        clashes.sort_by(|a, b| a.0.cmp(&b.0));

        let violations = clashes
            .into_iter()
            .map(|((person_id, date, session), group)| {
                let mut v = hard_violation(
                    self.id(),
                    Severity::Critical,
                    format!("{} 在 {} {} 有 {} 条重叠排班", person_id, date, session, group.len()),
                )
                .with_person(person_id);
                for a in group {
                    v = v.with_block(&a.block_id);
                }
                v
            })
            .collect();
        ConstraintEvaluation::from_violations(violations)
    }

    fn admits(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        !partial.is_assigned(candidate.person, candidate.block)
            && !partial.occupies(candidate.person, ctx.blocks[candidate.block].time_key())
    }
}

// ==========================================
// 容量: 实例人数（住院医师 + 带教）≤ 模板容量
// ==========================================
#[derive(Debug, Default)]
pub struct CapacityConstraint;

impl Constraint for CapacityConstraint {
    fn id(&self) -> &str {
        ids::CAPACITY
    }

    fn name(&self) -> &str {
        "实例容量"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Capacity
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        let mut over: Vec<(SlotInstance, u32)> = partial
            .tallies()
            .filter(|(i, t)| ctx.in_range(i.block) && t.headcount() > ctx.templates[i.template].capacity)
            .map(|(i, t)| (i, t.headcount()))
            .collect();
        over.sort();

        let violations = over
            .into_iter()
            .map(|(instance, headcount)| {
                hard_violation(
                    self.id(),
                    Severity::High,
                    format!(
                        "{} 人数 {} 超过容量 {}",
                        ctx.describe_instance(&instance),
                        headcount,
                        ctx.templates[instance.template].capacity
                    ),
                )
                .with_block(&ctx.blocks[instance.block].block_id)
            })
            .collect();
        ConstraintEvaluation::from_violations(violations)
    }

    fn admits(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        partial.tally(candidate.block, candidate.template).headcount() + 1
            <= ctx.templates[candidate.template].capacity
    }
}

// ==========================================
// 资质: 模板要求专科时须具备该专科
// ==========================================
#[derive(Debug, Default)]
pub struct EligibilityConstraint;

impl Constraint for EligibilityConstraint {
    fn id(&self) -> &str {
        ids::ELIGIBILITY
    }

    fn name(&self) -> &str {
        "专科资质"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Eligibility
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let violations = resolve_placements(assignments, ctx)
            .into_iter()
            .filter(|(p, _)| !ctx.is_eligible(p.person, p.template))
            .map(|(p, i)| {
                let a = &assignments[i];
                hard_violation(
                    self.id(),
                    Severity::High,
                    format!(
                        "{} 不具备模板 {} 要求的专科 {}",
                        a.person_id,
                        a.template_id,
                        ctx.templates[p.template]
                            .required_specialty
                            .as_deref()
                            .unwrap_or("-")
                    ),
                )
                .with_person(&a.person_id)
                .with_block(&a.block_id)
            })
            .collect();
        ConstraintEvaluation::from_violations(violations)
    }

    fn admits(&self, candidate: &Placement, _partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        ctx.is_eligible(candidate.person, candidate.template)
    }
}

// ==========================================
// 工时: 4 周滚动平均周工时 ≤ 上限
// ==========================================
#[derive(Debug, Default)]
pub struct WorkHoursConstraint;

impl Constraint for WorkHoursConstraint {
    fn id(&self) -> &str {
        ids::WORK_HOURS
    }

    fn name(&self) -> &str {
        "滚动平均周工时"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Compliance
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        ConstraintEvaluation::from_violations(
            work_hour_violations(&partial, ctx)
                .iter()
                .map(ConstraintViolation::from)
                .collect(),
        )
    }

    fn admits(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        let weeks = ctx.config.rolling_weeks;
        let limit = ctx.config.rolling_window_hour_limit();
        let date = ctx.blocks[candidate.block].date;
        let hours = ctx.templates[candidate.template].hours_per_block;

        rolling_window_starts(date, weeks).into_iter().all(|start| {
            let end = rolling_window_end(start, weeks);
            partial.hours_between(candidate.person, start, end) + hours <= limit + HOURS_TOLERANCE
        })
    }
}

// ==========================================
// 休息: 任意 7 天窗口内至少 N 个无值班日
// ==========================================
#[derive(Debug, Default)]
pub struct RestPeriodConstraint;

impl Constraint for RestPeriodConstraint {
    fn id(&self) -> &str {
        ids::REST_PERIOD
    }

    fn name(&self) -> &str {
        "每周休息"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Compliance
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        ConstraintEvaluation::from_violations(
            rest_violations(&partial, ctx)
                .iter()
                .map(ConstraintViolation::from)
                .collect(),
        )
    }

    fn admits(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        let date = ctx.blocks[candidate.block].date;
        if partial.is_duty_day(candidate.person, date) {
            return true;
        }

        let max_duty = (DAYS_PER_WEEK as u32).saturating_sub(ctx.config.required_rest_days());
        (0..DAYS_PER_WEEK).all(|offset| {
            let start = date - Duration::days(offset);
            let end = start + Duration::days(DAYS_PER_WEEK - 1);
            partial.duty_days_between(candidate.person, start, end) + 1 <= max_duty
        })
    }
}

// ==========================================
// 监督比例: 有初级人员的实例须配足带教
// ==========================================
#[derive(Debug, Default)]
pub struct SupervisionRatioConstraint;

impl Constraint for SupervisionRatioConstraint {
    fn id(&self) -> &str {
        ids::SUPERVISION_RATIO
    }

    fn name(&self) -> &str {
        "带教监督比例"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Supervision
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        ConstraintEvaluation::from_violations(
            supervision_violations(&partial, ctx)
                .iter()
                .map(ConstraintViolation::from)
                .collect(),
        )
    }

    fn closes(&self, instance: &SlotInstance, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        let tally = partial.tally(instance.block, instance.template);
        let required = ctx.templates[instance.template].required_supervisors(tally.pgy1, tally.seniors);
        tally.faculty >= required
    }
}

// ==========================================
// 覆盖: 每个实例住院医师人数 ≥ 最低覆盖
// ==========================================
#[derive(Debug, Default)]
pub struct CoverageConstraint;

impl Constraint for CoverageConstraint {
    fn id(&self) -> &str {
        ids::COVERAGE
    }

    fn name(&self) -> &str {
        "最低覆盖"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Coverage
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        let violations = ctx
            .instances()
            .into_iter()
            .filter(|i| !self.closes(i, &partial, ctx))
            .map(|i| {
                let tally = partial.tally(i.block, i.template);
                hard_violation(
                    self.id(),
                    Severity::High,
                    format!(
                        "{} 住院医师 {} 人，低于最低覆盖 {}",
                        ctx.describe_instance(&i),
                        tally.residents,
                        ctx.templates[i.template].min_coverage
                    ),
                )
                .with_block(&ctx.blocks[i.block].block_id)
            })
            .collect();
        ConstraintEvaluation::from_violations(violations)
    }

    fn closes(&self, instance: &SlotInstance, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        partial.tally(instance.block, instance.template).residents
            >= ctx.templates[instance.template].min_coverage
    }
}

// ==========================================
// 连续值班天数上限（项目级，默认不启用）
// ==========================================
#[derive(Debug, Default)]
pub struct MaxConsecutiveDaysConstraint;

impl Constraint for MaxConsecutiveDaysConstraint {
    fn id(&self) -> &str {
        ids::MAX_CONSECUTIVE_DAYS
    }

    fn name(&self) -> &str {
        "连续值班天数上限"
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn category(&self) -> ConstraintCategory {
        ConstraintCategory::Compliance
    }

    fn evaluate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ConstraintEvaluation {
        let partial = partial_from_assignments(assignments, ctx);
        ConstraintEvaluation::from_violations(
            consecutive_violations(&partial, ctx)
                .iter()
                .map(ConstraintViolation::from)
                .collect(),
        )
    }

    fn admits(&self, candidate: &Placement, partial: &PartialSchedule, ctx: &SchedulingContext) -> bool {
        let date = ctx.blocks[candidate.block].date;
        if partial.is_duty_day(candidate.person, date) {
            return true;
        }
        run_length_through(|d| partial.is_duty_day(candidate.person, d), date)
            <= ctx.config.max_consecutive_days
    }
}
