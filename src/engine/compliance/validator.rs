// ==========================================
// 住院医师排班系统 - 合规校验器
// ==========================================
// 职责: 对一组排班做 ACGME 合规检查，输出带严重度的报告
// - 工时（CRITICAL）: 滚动 4 周平均周工时
// - 休息（HIGH）: 每 7 天窗口休息天数
// - 监督比例（MEDIUM）: 每个实例的带教人数
// - 连续值班（HIGH）: 仅在约束启用时检查
// 范围: 区间外排班参与窗口统计；只报告窗口与 [start_date, end_date] 相交的违规
// ==========================================

use crate::domain::types::Severity;
use crate::domain::{Assignment, ComplianceReport, ComplianceViolation};
use crate::engine::compliance::rules::{consecutive_breaches, rest_breaches, rolling_hour_breaches};
use crate::engine::constraints::{ids, partial_from_assignments};
use crate::engine::context::SchedulingContext;
use crate::engine::partial::PartialSchedule;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceValidator;

impl ComplianceValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验排班集合
    ///
    /// # 参数
    /// - assignments: 待校验排班（区间外上下文 + 保留 + 新生成，或换班后的快照）
    /// - ctx: 人员/块/模板与阈值
    ///
    /// # 返回
    /// 违规按严重度降序、日期升序排列
    pub fn validate(&self, assignments: &[Assignment], ctx: &SchedulingContext) -> ComplianceReport {
        let partial = partial_from_assignments(assignments, ctx);

        let mut violations = work_hour_violations(&partial, ctx);
        violations.extend(rest_violations(&partial, ctx));
        violations.extend(supervision_violations(&partial, ctx));
        if ctx.constraints.is_enabled(ids::MAX_CONSECUTIVE_DAYS) {
            violations.extend(consecutive_violations(&partial, ctx));
        }
        violations.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.date.cmp(&b.date))
                .then(a.rule_id.cmp(&b.rule_id))
        });

        let in_range: Vec<&Assignment> = assignments
            .iter()
            .filter(|a| ctx.assignment_in_range(a))
            .collect();
        let people_checked = in_range
            .iter()
            .map(|a| a.person_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        tracing::debug!(
            assignments = in_range.len(),
            context = assignments.len() - in_range.len(),
            people = people_checked,
            violations = violations.len(),
            "合规校验完成"
        );

        ComplianceReport {
            generated_at: Utc::now(),
            period_start: Some(ctx.start_date),
            period_end: Some(ctx.end_date),
            people_checked,
            assignments_checked: in_range.len(),
            violations,
        }
    }
}

fn scheduled_people(partial: &PartialSchedule) -> BTreeSet<usize> {
    partial.placements().iter().map(|p| p.person).collect()
}

fn duty_days(partial: &PartialSchedule, person: usize) -> BTreeSet<NaiveDate> {
    partial.daily_loads(person).keys().copied().collect()
}

pub(crate) fn work_hour_violations(partial: &PartialSchedule, ctx: &SchedulingContext) -> Vec<ComplianceViolation> {
    let max = ctx.config.max_weekly_hours;
    let weeks = ctx.config.rolling_weeks;

    let mut violations = Vec::new();
    for person in scheduled_people(partial) {
        let hours: BTreeMap<NaiveDate, f64> = partial
            .daily_loads(person)
            .iter()
            .map(|(d, load)| (*d, load.hours))
            .collect();
        let person_id = &ctx.people[person].person_id;

        for breach in rolling_hour_breaches(&hours, max, weeks)
            .into_iter()
            .filter(|b| ctx.touches_range(b.window_start, b.window_end))
        {
            violations.push(ComplianceViolation {
                rule_id: ids::WORK_HOURS.to_string(),
                severity: Severity::Critical,
                person_ids: vec![person_id.clone()],
                date: Some(breach.window_start),
                message: format!(
                    "{} 在 {}~{} 滚动 {} 周平均 {:.1} 小时/周（合计 {:.1}），超过上限 {:.1}",
                    person_id,
                    breach.window_start,
                    breach.window_end,
                    weeks,
                    breach.average_weekly_hours,
                    breach.total_hours,
                    max
                ),
            });
        }
    }
    violations
}

pub(crate) fn rest_violations(partial: &PartialSchedule, ctx: &SchedulingContext) -> Vec<ComplianceViolation> {
    let required = ctx.config.required_rest_days();

    let mut violations = Vec::new();
    for person in scheduled_people(partial) {
        let person_id = &ctx.people[person].person_id;
        for breach in rest_breaches(&duty_days(partial, person), required)
            .into_iter()
            .filter(|b| ctx.touches_range(b.window_start, b.window_end))
        {
            violations.push(ComplianceViolation {
                rule_id: ids::REST_PERIOD.to_string(),
                severity: Severity::High,
                person_ids: vec![person_id.clone()],
                date: Some(breach.window_start),
                message: format!(
                    "{} 在 {}~{} 仅有 {} 天休息，要求至少 {} 天",
                    person_id, breach.window_start, breach.window_end, breach.free_days, required
                ),
            });
        }
    }
    violations
}

pub(crate) fn supervision_violations(partial: &PartialSchedule, ctx: &SchedulingContext) -> Vec<ComplianceViolation> {
    let mut short: Vec<_> = partial
        .tallies()
        .filter(|(instance, _)| ctx.in_range(instance.block))
        .filter_map(|(instance, tally)| {
            let required = ctx.templates[instance.template].required_supervisors(tally.pgy1, tally.seniors);
            (tally.faculty < required).then_some((instance, tally, required))
        })
        .collect();
    short.sort_by_key(|(instance, _, _)| {
        (ctx.blocks[instance.block].time_key(), instance.template)
    });

    short
        .into_iter()
        .map(|(instance, tally, required)| {
            let person_ids = partial
                .placements()
                .iter()
                .filter(|p| p.block == instance.block && p.template == instance.template)
                .map(|p| ctx.people[p.person].person_id.clone())
                .collect();
            ComplianceViolation {
                rule_id: ids::SUPERVISION_RATIO.to_string(),
                severity: Severity::Medium,
                person_ids,
                date: Some(ctx.blocks[instance.block].date),
                message: format!(
                    "{} 有 PGY1 {} 人、高年资 {} 人，需带教 {} 人，实际 {} 人",
                    ctx.describe_instance(&instance),
                    tally.pgy1,
                    tally.seniors,
                    required,
                    tally.faculty
                ),
            }
        })
        .collect()
}

pub(crate) fn consecutive_violations(partial: &PartialSchedule, ctx: &SchedulingContext) -> Vec<ComplianceViolation> {
    let max = ctx.config.max_consecutive_days;

    let mut violations = Vec::new();
    for person in scheduled_people(partial) {
        let person_id = &ctx.people[person].person_id;
        for run in consecutive_breaches(&duty_days(partial, person), max)
            .into_iter()
            .filter(|r| ctx.touches_range(r.start, r.start + Duration::days(r.length as i64 - 1)))
        {
            violations.push(ComplianceViolation {
                rule_id: ids::MAX_CONSECUTIVE_DAYS.to_string(),
                severity: Severity::High,
                person_ids: vec![person_id.clone()],
                date: Some(run.start),
                message: format!(
                    "{} 自 {} 起连续值班 {} 天，超过上限 {} 天",
                    person_id, run.start, run.length, max
                ),
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RotationTemplate;
    use crate::engine::context::test_support::*;

    fn assignments_for(person: &str, blocks: usize, template: &str) -> Vec<Assignment> {
        (1..=blocks)
            .map(|i| Assignment::generated(person, &format!("B{:02}", i), template))
            .collect()
    }

    #[test]
    fn test_clean_schedule_is_compliant() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(5),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        let mut assignments = assignments_for("R3", 5, "T1");
        assignments.extend(assignments_for("F1", 5, "T1"));

        let report = ComplianceValidator::new().validate(&assignments, &ctx);
        assert!(report.is_compliant());
        assert!(report.violations.is_empty());
        assert_eq!(report.people_checked, 2);
        assert_eq!(report.assignments_checked, 10);
    }

    #[test]
    fn test_work_hours_breach_is_critical() {
        let mut template = RotationTemplate::new("T1", "Ward", 1, 3);
        template.hours_per_block = 24.0;
        let ctx = context_with(standard_people(), daily_blocks(28), vec![template], Vec::new(), Vec::new());

        // 28 天中 24 天值班（每 7 天休 1 天）: 576h / 4 = 144h/周
        let assignments: Vec<Assignment> = (1..=28)
            .filter(|i| i % 7 != 0)
            .flat_map(|i| {
                vec![
                    Assignment::generated("R3", &format!("B{:02}", i), "T1"),
                    Assignment::generated("F1", &format!("B{:02}", i), "T1"),
                ]
            })
            .collect();

        let report = ComplianceValidator::new().validate(&assignments, &ctx);
        assert!(!report.is_compliant());
        assert!(report.critical_count() >= 2);
        assert_eq!(report.violations[0].rule_id, ids::WORK_HOURS);
        assert!(report.violations.iter().all(|v| v.rule_id != ids::REST_PERIOD));
    }

    #[test]
    fn test_surrounding_hours_count_but_only_touching_windows_reported() {
        let mut template = RotationTemplate::new("T1", "Ward", 1, 3);
        template.hours_per_block = 64.0;
        template.supervision_required = false;
        let blocks = daily_blocks(14);
        let snapshot = crate::repository::ScheduleSnapshot {
            people: standard_people(),
            blocks,
            templates: vec![template],
            ..Default::default()
        };
        let week_two = monday() + Duration::days(7);
        let ctx = SchedulingContext::from_snapshot(
            week_two,
            week_two + Duration::days(6),
            snapshot,
            Vec::new(),
            crate::engine::constraints::ConstraintManager::with_defaults().snapshot(),
            crate::config::SchedulerConfig::default(),
        );

        // 第一周周一至周五 5 × 64h = 320h（恰好达到 4 周上限），第二周周一再排 1 次
        let mut assignments = assignments_for("R3", 5, "T1");
        assignments.push(Assignment::generated("R3", "B08", "T1"));

        let report = ComplianceValidator::new().validate(&assignments, &ctx);
        assert_eq!(report.assignments_checked, 1);
        assert_eq!(report.people_checked, 1);
        let hours: Vec<_> = report.violations.iter().filter(|v| v.rule_id == ids::WORK_HOURS).collect();
        assert!(!hours.is_empty());
        assert!(hours.iter().all(|v| v.severity == Severity::Critical));

        // 只有第一周的排班时，区间内无违规
        let report = ComplianceValidator::new().validate(&assignments_for("R3", 5, "T1"), &ctx);
        assert!(report.violations.is_empty());
        assert_eq!(report.assignments_checked, 0);
    }

    #[test]
    fn test_rest_and_supervision() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(7),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        // R1 (PGY1) 连续 7 天且无带教
        let report = ComplianceValidator::new().validate(&assignments_for("R1", 7, "T1"), &ctx);

        let rest: Vec<_> = report.violations.iter().filter(|v| v.rule_id == ids::REST_PERIOD).collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].severity, Severity::High);

        let supervision = report
            .violations
            .iter()
            .filter(|v| v.rule_id == ids::SUPERVISION_RATIO)
            .count();
        assert_eq!(supervision, 7);
        assert_eq!(report.advisory().len(), 7);

        // max_consecutive_days 默认未启用
        assert!(report.violations.iter().all(|v| v.rule_id != ids::MAX_CONSECUTIVE_DAYS));
    }
}
