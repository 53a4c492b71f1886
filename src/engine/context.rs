// ==========================================
// 住院医师排班系统 - 排班上下文
// ==========================================
// 职责: 求解/校验所需的只读输入（人员、块、模板、可用性矩阵、
//       保留排班、区间外已提交排班、约束快照、合规阈值），以及 ID ↔ 下标索引
// 范围: blocks 可包含区间两侧的上下文块，求解实例只取 [start_date, end_date] 内的块
// 红线: 构建完成后不可变；求解器只读上下文，不写任何状态
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::{Absence, Assignment, Block, Person, RotationTemplate};
use crate::engine::constraints::ConstraintSnapshot;
use crate::repository::ScheduleSnapshot;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// 一次 (人员, 块, 模板) 决策，均为上下文下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placement {
    pub person: usize,
    pub block: usize,
    pub template: usize,
}

/// 轮转实例: 一个 (块, 模板) 组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotInstance {
    pub block: usize,
    pub template: usize,
}

// ==========================================
// SchedulingContext
// ==========================================
#[derive(Debug)]
pub struct SchedulingContext {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub people: Vec<Person>,
    pub blocks: Vec<Block>,
    pub templates: Vec<RotationTemplate>,
    pub preserved: Vec<Assignment>,
    /// 区间外已提交的排班，只参与滚动窗口统计，不求解、不落库
    pub surrounding: Vec<Assignment>,
    pub constraints: ConstraintSnapshot,
    pub config: SchedulerConfig,
    person_index: HashMap<String, usize>,
    block_index: HashMap<String, usize>,
    template_index: HashMap<String, usize>,
    unavailable: HashSet<(usize, NaiveDate)>,
}

impl SchedulingContext {
    /// 由快照构建上下文
    ///
    /// # 参数
    /// - snapshot: 人员/块/模板/缺勤（snapshot.assignments 不参与构建）；
    ///   块可超出 [start_date, end_date]
    /// - preserved: 求解时固定不动的排班
    pub fn from_snapshot(
        start_date: NaiveDate,
        end_date: NaiveDate,
        snapshot: ScheduleSnapshot,
        preserved: Vec<Assignment>,
        constraints: ConstraintSnapshot,
        config: SchedulerConfig,
    ) -> Self {
        let ScheduleSnapshot {
            people,
            mut blocks,
            templates,
            absences,
            ..
        } = snapshot;

        blocks.sort_by(|a, b| {
            (a.date, a.session, &a.block_id).cmp(&(b.date, b.session, &b.block_id))
        });

        let person_index = people
            .iter()
            .enumerate()
            .map(|(i, p)| (p.person_id.clone(), i))
            .collect::<HashMap<_, _>>();
        let block_index = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.block_id.clone(), i))
            .collect();
        let template_index = templates
            .iter()
            .enumerate()
            .map(|(i, t)| (t.template_id.clone(), i))
            .collect();

        let unavailable = build_unavailability(&person_index, &blocks, &absences);

        Self {
            start_date,
            end_date,
            people,
            blocks,
            templates,
            preserved,
            surrounding: Vec::new(),
            constraints,
            config,
            person_index,
            block_index,
            template_index,
            unavailable,
        }
    }

    /// 区间外已提交排班（仅统计用）
    pub fn with_surrounding(mut self, surrounding: Vec<Assignment>) -> Self {
        self.surrounding = surrounding;
        self
    }

    pub fn person_idx(&self, person_id: &str) -> Option<usize> {
        self.person_index.get(person_id).copied()
    }

    pub fn block_idx(&self, block_id: &str) -> Option<usize> {
        self.block_index.get(block_id).copied()
    }

    pub fn template_idx(&self, template_id: &str) -> Option<usize> {
        self.template_index.get(template_id).copied()
    }

    /// 可用性矩阵: 阻断型缺勤覆盖的日期不可排
    pub fn is_available(&self, person: usize, date: NaiveDate) -> bool {
        !self.unavailable.contains(&(person, date))
    }

    /// 资质匹配: 模板要求专科时，人员须具备该专科
    pub fn is_eligible(&self, person: usize, template: usize) -> bool {
        match &self.templates[template].required_specialty {
            Some(specialty) => self.people[person].has_specialty(specialty),
            None => true,
        }
    }

    /// 块是否落在 [start_date, end_date] 内
    pub fn in_range(&self, block: usize) -> bool {
        let date = self.blocks[block].date;
        self.start_date <= date && date <= self.end_date
    }

    /// 排班所在块是否落在区间内（块未知时为 false）
    pub fn assignment_in_range(&self, assignment: &Assignment) -> bool {
        self.block_idx(&assignment.block_id)
            .is_some_and(|block| self.in_range(block))
    }

    /// 窗口 [start, end] 是否与区间相交
    pub fn touches_range(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start <= self.end_date && self.start_date <= end
    }

    /// 模板是否在该块开放
    pub fn template_applies(&self, block: usize, template: usize) -> bool {
        !self.blocks[block].is_weekend || self.templates[template].applies_on_weekends
    }

    /// 区间内全部轮转实例，按 (日期, 时段, 模板ID) 排序
    pub fn instances(&self) -> Vec<SlotInstance> {
        let mut instances = Vec::new();
        for block in (0..self.blocks.len()).filter(|b| self.in_range(*b)) {
            for template in 0..self.templates.len() {
                if self.template_applies(block, template) {
                    instances.push(SlotInstance { block, template });
                }
            }
        }
        instances.sort_by(|a, b| self.instance_order_key(a).cmp(&self.instance_order_key(b)));
        instances
    }

    fn instance_order_key(&self, i: &SlotInstance) -> (NaiveDate, crate::domain::Session, &str) {
        let block = &self.blocks[i.block];
        (block.date, block.session, self.templates[i.template].template_id.as_str())
    }

    /// 实例候选人（可用且资质匹配），分为 (住院医师, 带教)
    pub fn candidates(&self, instance: &SlotInstance) -> (Vec<usize>, Vec<usize>) {
        let date = self.blocks[instance.block].date;
        let mut residents = Vec::new();
        let mut faculty = Vec::new();
        for (idx, person) in self.people.iter().enumerate() {
            if !self.is_available(idx, date) || !self.is_eligible(idx, instance.template) {
                continue;
            }
            if person.is_faculty() {
                faculty.push(idx);
            } else {
                residents.push(idx);
            }
        }
        (residents, faculty)
    }

    /// 排班记录 → 下标决策（引用未知实体时返回 None）
    pub fn placement_of(&self, assignment: &Assignment) -> Option<Placement> {
        Some(Placement {
            person: self.person_idx(&assignment.person_id)?,
            block: self.block_idx(&assignment.block_id)?,
            template: self.template_idx(&assignment.template_id)?,
        })
    }

    /// 下标决策 → 新生成的排班记录
    pub fn to_assignment(&self, placement: &Placement) -> Assignment {
        Assignment::generated(
            &self.people[placement.person].person_id,
            &self.blocks[placement.block].block_id,
            &self.templates[placement.template].template_id,
        )
    }

    /// 实例的可读标识 (template@date session)
    pub fn describe_instance(&self, instance: &SlotInstance) -> String {
        let block = &self.blocks[instance.block];
        format!(
            "{}@{} {}",
            self.templates[instance.template].template_id, block.date, block.session
        )
    }
}

fn build_unavailability(
    person_index: &HashMap<String, usize>,
    blocks: &[Block],
    absences: &[Absence],
) -> HashSet<(usize, NaiveDate)> {
    let dates: HashSet<NaiveDate> = blocks.iter().map(|b| b.date).collect();
    let mut unavailable = HashSet::new();

    for absence in absences.iter().filter(|a| a.is_blocking) {
        let Some(&person) = person_index.get(&absence.person_id) else {
            continue;
        };
        for date in dates.iter().filter(|d| absence.covers(**d)) {
            unavailable.insert((person, *date));
        }
    }
    unavailable
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::engine::constraints::ConstraintManager;

    #[test]
    fn test_absence_folds_into_availability() {
        let blocks = daily_blocks(3);
        let absence = Absence::blocking("A1", "R1", monday(), monday());
        let mut soft = Absence::blocking("A2", "R2", monday(), monday());
        soft.is_blocking = false;

        let ctx = context_with(
            standard_people(),
            blocks,
            vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            vec![absence, soft],
            Vec::new(),
        );

        let r1 = ctx.person_idx("R1").unwrap();
        let r2 = ctx.person_idx("R2").unwrap();
        assert!(!ctx.is_available(r1, monday()));
        assert!(ctx.is_available(r1, monday() + chrono::Duration::days(1)));
        assert!(ctx.is_available(r2, monday()));

        let (residents, faculty) = ctx.candidates(&SlotInstance { block: 0, template: 0 });
        assert_eq!(residents.len(), 2);
        assert_eq!(faculty.len(), 2);
    }

    #[test]
    fn test_weekend_instances_respect_template() {
        // 2026-03-07 为周六
        let blocks = daily_blocks(7);
        let mut weekday_only = RotationTemplate::new("T2", "Weekday Clinic", 1, 3);
        weekday_only.applies_on_weekends = false;

        let ctx = context_with(
            standard_people(),
            blocks,
            vec![RotationTemplate::new("T1", "Clinic", 1, 3), weekday_only],
            Vec::new(),
            Vec::new(),
        );

        let instances = ctx.instances();
        assert_eq!(instances.len(), 7 + 5);
        assert_eq!(ctx.describe_instance(&instances[0]), "T1@2026-03-02 AM");
    }

    #[test]
    fn test_instances_exclude_context_blocks() {
        let blocks = daily_blocks(14);
        let snapshot = ScheduleSnapshot {
            start_date: Some(monday()),
            end_date: Some(monday() + chrono::Duration::days(13)),
            people: standard_people(),
            blocks,
            templates: vec![RotationTemplate::new("T1", "Clinic", 1, 3)],
            absences: Vec::new(),
            assignments: Vec::new(),
        };
        let week_two = monday() + chrono::Duration::days(7);
        let ctx = SchedulingContext::from_snapshot(
            week_two,
            week_two + chrono::Duration::days(6),
            snapshot,
            Vec::new(),
            ConstraintManager::with_defaults().snapshot(),
            SchedulerConfig::default(),
        )
        .with_surrounding(vec![Assignment::generated("R1", "B01", "T1")]);

        let instances = ctx.instances();
        assert_eq!(instances.len(), 7);
        assert!(instances.iter().all(|i| ctx.in_range(i.block)));
        assert!(!ctx.assignment_in_range(&ctx.surrounding[0]));
        assert!(ctx.touches_range(monday(), week_two));
        assert!(!ctx.touches_range(monday(), week_two - chrono::Duration::days(1)));
    }

    #[test]
    fn test_specialty_eligibility() {
        let mut people = standard_people();
        people[0] = people[0].clone().with_specialties(&["cardiology"]);
        let mut template = RotationTemplate::new("T1", "Cardiology", 1, 3);
        template.required_specialty = Some("Cardiology".to_string());

        let ctx = context_with(people, daily_blocks(1), vec![template], Vec::new(), Vec::new());
        assert!(ctx.is_eligible(0, 0));
        assert!(!ctx.is_eligible(1, 0));
    }
}
