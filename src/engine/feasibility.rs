// ==========================================
// 住院医师排班系统 - 求解前可行性检查
// ==========================================
// 检测过饱和（覆盖需求 > 可用且有资质的供给），求解前即中止
// - 实例级: 模板在该块仍需的住院医师 > 候选人数
// - 时段级: 同一 (日期, 时段) 内所有块、所有模板需求之和 > 能承担其中任一需求的不同人数
// ==========================================

use crate::domain::Session;
use crate::engine::constraints::ids;
use crate::engine::context::SchedulingContext;
use crate::engine::solver::{residents_needed, seed_partial};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 不可满足的需求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfeasibilityDiagnostic {
    /// 块级检查时为 None
    pub template_id: Option<String>,
    pub block_id: String,
    pub date: NaiveDate,
    pub session: Session,
    pub required: u32,
    pub supply: u32,
    pub message: String,
}

impl InfeasibilityDiagnostic {
    pub fn deficit(&self) -> u32 {
        self.required.saturating_sub(self.supply)
    }
}

/// 检查全部实例与块；返回缺口从大到小排列的诊断
pub fn check_feasibility(ctx: &SchedulingContext) -> Vec<InfeasibilityDiagnostic> {
    if !ctx.constraints.is_enabled(ids::COVERAGE) {
        return Vec::new();
    }

    let (partial, _) = seed_partial(ctx);
    let mut diagnostics = Vec::new();

    // (日期, 时段) → (总需求, 候选人集合, 首个块)
    let mut per_slot: BTreeMap<(NaiveDate, Session), (u32, BTreeSet<usize>, usize)> = BTreeMap::new();

    for instance in ctx.instances() {
        let needed = residents_needed(&instance, &partial, ctx);
        if needed == 0 {
            continue;
        }

        let block = &ctx.blocks[instance.block];
        let (residents, _) = ctx.candidates(&instance);
        let free: Vec<usize> = residents
            .into_iter()
            .filter(|p| !partial.occupies(*p, block.time_key()))
            .collect();

        let template = &ctx.templates[instance.template];
        if (free.len() as u32) < needed {
            diagnostics.push(InfeasibilityDiagnostic {
                template_id: Some(template.template_id.clone()),
                block_id: block.block_id.clone(),
                date: block.date,
                session: block.session,
                required: needed,
                supply: free.len() as u32,
                message: format!(
                    "轮转 {} 在 {} {} 需要 {} 名住院医师，仅有 {} 名可用且具备资质",
                    template.template_id,
                    block.date,
                    block.session,
                    needed,
                    free.len()
                ),
            });
        }

        let entry = per_slot
            .entry(block.time_key())
            .or_insert_with(|| (0, BTreeSet::new(), instance.block));
        entry.0 += needed;
        entry.1.extend(free);
    }

    // 已有实例级诊断的时段不再重复报告
    let reported: BTreeSet<(NaiveDate, Session)> =
        diagnostics.iter().map(|d| (d.date, d.session)).collect();

    for (key, (required, supply, block_idx)) in per_slot {
        let supply = supply.len() as u32;
        if required > supply && !reported.contains(&key) {
            let block = &ctx.blocks[block_idx];
            diagnostics.push(InfeasibilityDiagnostic {
                template_id: None,
                block_id: block.block_id.clone(),
                date: block.date,
                session: block.session,
                required,
                supply,
                message: format!(
                    "{} {} 各块各轮转合计需要 {} 名住院医师，仅有 {} 名可排",
                    block.date, block.session, required, supply
                ),
            });
        }
    }

    diagnostics.sort_by(|a, b| {
        b.deficit()
            .cmp(&a.deficit())
            .then(a.date.cmp(&b.date))
            .then(a.session.cmp(&b.session))
            .then(a.template_id.cmp(&b.template_id))
    });
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Absence, Block, RotationTemplate};
    use crate::engine::context::test_support::*;

    #[test]
    fn test_feasible_week_has_no_diagnostics() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(7),
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            Vec::new(),
            Vec::new(),
        );
        assert!(check_feasibility(&ctx).is_empty());
    }

    #[test]
    fn test_instance_oversaturation_names_template_and_date() {
        let ctx = context_with(
            standard_people(),
            daily_blocks(2),
            vec![RotationTemplate::new("T1", "Clinic", 3, 5)],
            vec![Absence::blocking("A1", "R1", monday(), monday())],
            Vec::new(),
        );
        let diagnostics = check_feasibility(&ctx);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].template_id.as_deref(), Some("T1"));
        assert_eq!(diagnostics[0].date, monday());
        assert_eq!(diagnostics[0].required, 3);
        assert_eq!(diagnostics[0].supply, 2);
    }

    #[test]
    fn test_block_level_demand_exceeds_distinct_supply() {
        // 每个模板单独可满足（各需 2 人，共 3 人），但同一块合计需 4 人
        let ctx = context_with(
            standard_people(),
            daily_blocks(1),
            vec![
                RotationTemplate::new("T1", "Clinic", 2, 4),
                RotationTemplate::new("T2", "Ward", 2, 4),
            ],
            Vec::new(),
            Vec::new(),
        );
        let diagnostics = check_feasibility(&ctx);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].template_id.is_none());
        assert_eq!(diagnostics[0].required, 4);
        assert_eq!(diagnostics[0].supply, 3);
    }

    #[test]
    fn test_overlapping_blocks_share_one_supply() {
        // 同为周一上午的两个块各需 2 人，单块均可满足，但 3 名住院医师无法同时出现在两处
        let mut blocks = daily_blocks(1);
        blocks.push(Block::new("B01W", monday(), Session::Am, 1));
        let ctx = context_with(
            standard_people(),
            blocks,
            vec![RotationTemplate::new("T1", "Clinic", 2, 4)],
            Vec::new(),
            Vec::new(),
        );
        let diagnostics = check_feasibility(&ctx);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].template_id.is_none());
        assert_eq!(diagnostics[0].date, monday());
        assert_eq!(diagnostics[0].session, Session::Am);
        assert_eq!(diagnostics[0].required, 4);
        assert_eq!(diagnostics[0].supply, 3);
    }
}
