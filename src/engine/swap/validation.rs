// ==========================================
// 住院医师排班系统 - 换班校验
// ==========================================
// 职责: 请求形态检查；按拟换班计划构造换班后的排班集合，
//       在 ±28 天上下文中运行硬约束与合规校验；
//       被改写实例的覆盖/容量单独比较换班前后
// 红线: 纯函数，不读写存储
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::{ConstraintKind, Severity, SwapType};
use crate::domain::{Assignment, Block, ConstraintViolation, SwapOperation, SwapRequest};
use crate::engine::compliance::ComplianceValidator;
use crate::engine::constraints::{ids, partial_from_assignments};
use crate::engine::context::{SchedulingContext, SlotInstance};
use crate::repository::LockScope;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 校验上下文在换班日期两侧各延伸的天数
pub const CONTEXT_WINDOW_DAYS: i64 = 28;

/// 换班校验运行的硬约束（按人员过滤）
const SWAP_CHECKED: [&str; 6] = [
    ids::AVAILABILITY,
    ids::ONE_PER_BLOCK,
    ids::ELIGIBILITY,
    ids::WORK_HOURS,
    ids::REST_PERIOD,
    ids::MAX_CONSECUTIVE_DAYS,
];

/// 按被改写实例检查的硬约束
const SEAT_CHECKED: [&str; 2] = [ids::COVERAGE, ids::CAPACITY];

/// 换班校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapValidation {
    pub is_valid: bool,
    /// 涉及换班双方的违规（含 MEDIUM/LOW 提示）
    pub violations: Vec<ConstraintViolation>,
}

impl SwapValidation {
    pub fn from_violations(violations: Vec<ConstraintViolation>) -> Self {
        Self {
            is_valid: !violations.iter().any(|v| v.severity.is_blocking()),
            violations,
        }
    }

    /// 仅阻断级（CRITICAL/HIGH）违规
    pub fn blocking(&self) -> Vec<ConstraintViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity.is_blocking())
            .cloned()
            .collect()
    }
}

/// 请求形态检查（不访问存储）
pub fn check_request(request: &SwapRequest) -> ApiResult<()> {
    if request.source_person_id == request.target_person_id {
        return Err(ApiError::InvalidInput(format!(
            "换班双方为同一人: {}",
            request.source_person_id
        )));
    }

    match (request.swap_type, request.target_block_id.as_deref()) {
        (SwapType::OneToOne, None) => Err(ApiError::InvalidInput(
            "一对一换班缺少接收人让出的块".to_string(),
        )),
        (SwapType::OneToOne, Some(target_block)) if target_block == request.source_block_id => {
            Err(ApiError::InvalidInput(format!(
                "一对一换班的两个块相同: {}",
                target_block
            )))
        }
        (SwapType::Absorb, Some(target_block)) => Err(ApiError::InvalidInput(format!(
            "承接换班不应指定接收人让出的块: {}",
            target_block
        ))),
        _ => Ok(()),
    }
}

// ==========================================
// SwapLeg / SwapPlan - 已解析的换班计划
// ==========================================

/// 一条被改写的排班及其所在块
#[derive(Debug, Clone)]
pub struct SwapLeg {
    pub assignment: Assignment,
    pub block: Block,
    pub new_person_id: String,
}

#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub legs: Vec<SwapLeg>,
}

impl SwapPlan {
    /// 涉及的人员（换出与换入，去重排序）
    pub fn affected_people(&self) -> Vec<String> {
        self.legs
            .iter()
            .flat_map(|leg| [leg.assignment.person_id.clone(), leg.new_person_id.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let dates = self.legs.iter().map(|leg| leg.block.date);
        let start = dates.clone().min().unwrap_or_default();
        let end = dates.max().unwrap_or_default();
        (start, end)
    }

    /// 校验上下文窗口
    pub fn context_window(&self) -> (NaiveDate, NaiveDate) {
        let (start, end) = self.date_range();
        (
            start - Duration::days(CONTEXT_WINDOW_DAYS),
            end + Duration::days(CONTEXT_WINDOW_DAYS),
        )
    }

    /// 每个受影响 (人员, 块) 的独占租约范围，排序去重
    pub fn lock_scopes(&self) -> Vec<LockScope> {
        self.legs
            .iter()
            .flat_map(|leg| {
                [
                    (leg.assignment.person_id.clone(), leg.block.block_id.clone(), leg.block.date),
                    (leg.new_person_id.clone(), leg.block.block_id.clone(), leg.block.date),
                ]
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|(person, block, date)| LockScope::pair(&person, &block, date))
            .collect()
    }

    /// 提交换班的操作列表（含逆操作所需的原持有人与提交后 revision）
    pub fn operations(&self) -> Vec<SwapOperation> {
        self.legs
            .iter()
            .map(|leg| SwapOperation {
                assignment_id: leg.assignment.assignment_id.clone(),
                block_id: leg.block.block_id.clone(),
                prior_person_id: leg.assignment.person_id.clone(),
                prior_source: leg.assignment.source,
                new_person_id: leg.new_person_id.clone(),
                post_revision: leg.assignment.revision + 1,
            })
            .collect()
    }

    /// 在当前排班上应用计划，得到换班后的排班集合
    pub fn apply(&self, current: &[Assignment]) -> Vec<Assignment> {
        let mut post = current.to_vec();
        for leg in &self.legs {
            match post
                .iter_mut()
                .find(|a| a.assignment_id == leg.assignment.assignment_id)
            {
                Some(existing) => existing.person_id = leg.new_person_id.clone(),
                None => {
                    let mut moved = leg.assignment.clone();
                    moved.person_id = leg.new_person_id.clone();
                    post.push(moved);
                }
            }
        }
        post
    }
}

/// 校验换班后的排班集合
///
/// # 规则
/// - 运行已启用的硬约束（可用性/每块一岗/资质/工时/休息/连续值班），只保留涉及换班双方的违规
/// - 被改写的实例: 换班使住院医师人数低于最低覆盖、或人数超出容量时违规
/// - 合规校验补充上述约束未覆盖的规则（监督比例等）
pub fn evaluate_post_swap(current: &[Assignment], plan: &SwapPlan, ctx: &SchedulingContext) -> SwapValidation {
    let post = plan.apply(current);
    let affected_people = plan.affected_people();
    let involves = |person_ids: &[String]| person_ids.iter().any(|p| affected_people.contains(p));

    let mut covered = BTreeSet::new();
    let mut violations = Vec::new();
    for constraint in ctx
        .constraints
        .hard()
        .iter()
        .filter(|c| SWAP_CHECKED.contains(&c.id()))
    {
        covered.insert(constraint.id().to_string());
        violations.extend(
            constraint
                .evaluate(&post, ctx)
                .violations
                .into_iter()
                .filter(|v| involves(&v.person_ids)),
        );
    }

    violations.extend(seat_violations(current, &post, plan, ctx));

    let report = ComplianceValidator::new().validate(&post, ctx);
    violations.extend(
        report
            .violations
            .iter()
            .filter(|v| !covered.contains(&v.rule_id) && involves(&v.person_ids))
            .map(ConstraintViolation::from),
    );

    violations.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.constraint_id.cmp(&b.constraint_id))
    });
    SwapValidation::from_violations(violations)
}

/// 被改写实例的覆盖与容量；换班前已存在且未被加剧的缺口不计
fn seat_violations(
    current: &[Assignment],
    post: &[Assignment],
    plan: &SwapPlan,
    ctx: &SchedulingContext,
) -> Vec<ConstraintViolation> {
    let checked: Vec<&str> = SEAT_CHECKED
        .into_iter()
        .filter(|id| ctx.constraints.is_enabled(id))
        .collect();
    if checked.is_empty() {
        return Vec::new();
    }

    let instances: BTreeSet<SlotInstance> = plan
        .legs
        .iter()
        .filter_map(|leg| ctx.placement_of(&leg.assignment))
        .map(|p| SlotInstance {
            block: p.block,
            template: p.template,
        })
        .collect();

    let before = partial_from_assignments(current, ctx);
    let after = partial_from_assignments(post, ctx);

    let mut violations = Vec::new();
    for instance in instances {
        let template = &ctx.templates[instance.template];
        let block_id = &ctx.blocks[instance.block].block_id;
        let pre = before.tally(instance.block, instance.template);
        let now = after.tally(instance.block, instance.template);

        if checked.contains(&ids::COVERAGE)
            && now.residents < template.min_coverage
            && now.residents < pre.residents
        {
            violations.push(seat_violation(
                ids::COVERAGE,
                format!(
                    "换班后 {} 住院医师 {} 人，低于最低覆盖 {}",
                    ctx.describe_instance(&instance),
                    now.residents,
                    template.min_coverage
                ),
                block_id,
                plan,
            ));
        }
        if checked.contains(&ids::CAPACITY)
            && now.headcount() > template.capacity
            && now.headcount() > pre.headcount()
        {
            violations.push(seat_violation(
                ids::CAPACITY,
                format!(
                    "换班后 {} 人数 {} 超过容量 {}",
                    ctx.describe_instance(&instance),
                    now.headcount(),
                    template.capacity
                ),
                block_id,
                plan,
            ));
        }
    }
    violations
}

fn seat_violation(
    constraint_id: &str,
    message: String,
    block_id: &str,
    plan: &SwapPlan,
) -> ConstraintViolation {
    let mut v = ConstraintViolation::new(constraint_id, ConstraintKind::Hard, Severity::High, message)
        .with_block(block_id);
    for leg in plan.legs.iter().filter(|leg| leg.block.block_id == block_id) {
        v = v.with_person(&leg.new_person_id);
    }
    v
}
