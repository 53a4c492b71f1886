// ==========================================
// 住院医师排班系统 - 部分排班状态
// ==========================================
// 职责: 求解过程中的增量状态（push/pop 可逆），
//       为约束的 admits/closes/marginal_penalty 提供 O(log n) 查询
// ==========================================

use crate::domain::Session;
use crate::engine::context::{Placement, SchedulingContext, SlotInstance};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};

/// 单个实例的人数统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceTally {
    pub residents: u32,
    pub pgy1: u32,
    pub seniors: u32,
    pub faculty: u32,
}

impl InstanceTally {
    pub fn headcount(&self) -> u32 {
        self.residents + self.faculty
    }
}

/// 单日工作量
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayLoad {
    pub hours: f64,
    pub count: u32,
}

// ==========================================
// PartialSchedule
// ==========================================
#[derive(Debug, Clone)]
pub struct PartialSchedule {
    placements: Vec<Placement>,
    assigned: HashSet<(usize, usize)>,
    timeline: Vec<BTreeMap<(NaiveDate, Session), Vec<usize>>>,
    daily: Vec<BTreeMap<NaiveDate, DayLoad>>,
    tallies: HashMap<(usize, usize), InstanceTally>,
    assignment_counts: Vec<u32>,
    weekend_counts: Vec<u32>,
}

impl PartialSchedule {
    pub fn new(ctx: &SchedulingContext) -> Self {
        let n = ctx.people.len();
        Self {
            placements: Vec::new(),
            assigned: HashSet::new(),
            timeline: vec![BTreeMap::new(); n],
            daily: vec![BTreeMap::new(); n],
            tallies: HashMap::new(),
            assignment_counts: vec![0; n],
            weekend_counts: vec![0; n],
        }
    }

    /// 以一组决策初始化（保留排班/待校验排班）
    pub fn from_placements(ctx: &SchedulingContext, placements: &[Placement]) -> Self {
        let mut partial = Self::new(ctx);
        for p in placements {
            partial.push(*p, ctx);
        }
        partial
    }

    pub fn push(&mut self, p: Placement, ctx: &SchedulingContext) {
        let block = &ctx.blocks[p.block];
        let person = &ctx.people[p.person];
        let hours = ctx.templates[p.template].hours_per_block;

        self.placements.push(p);
        self.assigned.insert((p.person, p.block));
        self.timeline[p.person]
            .entry(block.time_key())
            .or_default()
            .push(p.template);

        let load = self.daily[p.person].entry(block.date).or_default();
        load.hours += hours;
        load.count += 1;

        let tally = self.tallies.entry((p.block, p.template)).or_default();
        if person.is_faculty() {
            tally.faculty += 1;
        } else {
            tally.residents += 1;
            if person.tier == crate::domain::SeniorityTier::Pgy1 {
                tally.pgy1 += 1;
            } else {
                tally.seniors += 1;
            }
        }

        self.assignment_counts[p.person] += 1;
        if block.is_weekend {
            self.weekend_counts[p.person] += 1;
        }
    }

    /// 撤销最近一次 push
    pub fn pop(&mut self, ctx: &SchedulingContext) -> Option<Placement> {
        let p = self.placements.pop()?;
        let block = &ctx.blocks[p.block];
        let person = &ctx.people[p.person];
        let hours = ctx.templates[p.template].hours_per_block;

        // 同一 (person, block) 只有在不存在其他决策时才移除
        if !self
            .placements
            .iter()
            .any(|q| q.person == p.person && q.block == p.block)
        {
            self.assigned.remove(&(p.person, p.block));
        }

        let key = block.time_key();
        if let Some(templates) = self.timeline[p.person].get_mut(&key) {
            if let Some(pos) = templates.iter().rposition(|t| *t == p.template) {
                templates.remove(pos);
            }
            if templates.is_empty() {
                self.timeline[p.person].remove(&key);
            }
        }

        if let Some(load) = self.daily[p.person].get_mut(&block.date) {
            load.hours -= hours;
            load.count -= 1;
            if load.count == 0 {
                self.daily[p.person].remove(&block.date);
            }
        }

        if let Some(tally) = self.tallies.get_mut(&(p.block, p.template)) {
            if person.is_faculty() {
                tally.faculty -= 1;
            } else {
                tally.residents -= 1;
                if person.tier == crate::domain::SeniorityTier::Pgy1 {
                    tally.pgy1 -= 1;
                } else {
                    tally.seniors -= 1;
                }
            }
        }

        self.assignment_counts[p.person] -= 1;
        if block.is_weekend {
            self.weekend_counts[p.person] -= 1;
        }
        Some(p)
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn is_assigned(&self, person: usize, block: usize) -> bool {
        self.assigned.contains(&(person, block))
    }

    /// 人员在该 (日期, 时段) 是否已有排班
    pub fn occupies(&self, person: usize, key: (NaiveDate, Session)) -> bool {
        self.timeline[person].contains_key(&key)
    }

    pub fn tally(&self, block: usize, template: usize) -> InstanceTally {
        self.tallies
            .get(&(block, template))
            .copied()
            .unwrap_or_default()
    }

    /// 全部已有人员的实例及其统计
    pub fn tallies(&self) -> impl Iterator<Item = (SlotInstance, InstanceTally)> + '_ {
        self.tallies
            .iter()
            .filter(|(_, t)| t.headcount() > 0)
            .map(|((block, template), t)| {
                (
                    SlotInstance {
                        block: *block,
                        template: *template,
                    },
                    *t,
                )
            })
    }

    pub fn is_duty_day(&self, person: usize, date: NaiveDate) -> bool {
        self.daily[person].contains_key(&date)
    }

    /// 人员按日工时
    pub fn daily_loads(&self, person: usize) -> &BTreeMap<NaiveDate, DayLoad> {
        &self.daily[person]
    }

    /// [start, end] 内累计工时
    pub fn hours_between(&self, person: usize, start: NaiveDate, end: NaiveDate) -> f64 {
        self.daily[person]
            .range(start..=end)
            .map(|(_, load)| load.hours)
            .sum()
    }

    /// [start, end] 内值班天数
    pub fn duty_days_between(&self, person: usize, start: NaiveDate, end: NaiveDate) -> u32 {
        self.daily[person].range(start..=end).count() as u32
    }

    pub fn assignment_count(&self, person: usize) -> u32 {
        self.assignment_counts[person]
    }

    pub fn weekend_count(&self, person: usize) -> u32 {
        self.weekend_counts[person]
    }

    /// 时间线上 key 之前/之后最近的模板
    pub fn neighbors(
        &self,
        person: usize,
        key: (NaiveDate, Session),
    ) -> (Option<usize>, Option<usize>) {
        let timeline = &self.timeline[person];
        let before = timeline
            .range(..key)
            .next_back()
            .and_then(|(_, ts)| ts.first().copied());
        let after = timeline
            .range((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
            .next()
            .and_then(|(_, ts)| ts.first().copied());
        (before, after)
    }

    /// 人员时间线（按时间顺序的模板序列）
    pub fn timeline(&self, person: usize) -> impl Iterator<Item = usize> + '_ {
        self.timeline[person].values().flat_map(|ts| ts.iter().copied())
    }
}
