// ==========================================
// 住院医师排班系统 - 合规规则（纯函数）
// ==========================================
// 依据: ACGME 值班规则
// - 工时: 以周一为起点的连续 4 个 ISO 周，总工时 / 4 ≤ 上限
// - 休息: 任意 7 天窗口内至少 N 个完全无值班日
// - 连续值班: 连续值班天数 ≤ 上限（项目级规则）
// 约束评估器与合规校验器共用本模块，保证口径一致
// ==========================================

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

pub const DAYS_PER_WEEK: i64 = 7;

/// 工时比较容差（浮点累加误差）
pub const HOURS_TOLERANCE: f64 = 1e-6;

/// 日期所在 ISO 周的周一
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// 包含该日期的全部滚动窗口起点（周一），共 weeks 个
pub fn rolling_window_starts(date: NaiveDate, weeks: u32) -> Vec<NaiveDate> {
    let monday = monday_of(date);
    (0..weeks as i64)
        .map(|k| monday - Duration::days(DAYS_PER_WEEK * k))
        .collect()
}

/// 滚动窗口最后一天
pub fn rolling_window_end(start: NaiveDate, weeks: u32) -> NaiveDate {
    start + Duration::days(DAYS_PER_WEEK * weeks as i64 - 1)
}

/// 区间校验所需的上下文范围
///
/// 与 [start, end] 相交的任何滚动窗口（含 7 天休息窗口）都落在返回范围内
pub fn context_horizon(start: NaiveDate, end: NaiveDate, weeks: u32) -> (NaiveDate, NaiveDate) {
    let span = Duration::days((DAYS_PER_WEEK * weeks as i64).max(DAYS_PER_WEEK) - 1);
    (monday_of(start) - span, end + span)
}

/// 两个闭区间是否相交
pub fn windows_overlap(a: (NaiveDate, NaiveDate), b: (NaiveDate, NaiveDate)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// 工时超限窗口
#[derive(Debug, Clone, PartialEq)]
pub struct HourBreach {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub total_hours: f64,
    pub average_weekly_hours: f64,
}

/// 逐窗口检查滚动平均周工时
///
/// # 参数
/// - daily_hours: 按日工时
/// - max_weekly_hours: 周工时上限
/// - weeks: 滚动周数
pub fn rolling_hour_breaches(
    daily_hours: &BTreeMap<NaiveDate, f64>,
    max_weekly_hours: f64,
    weeks: u32,
) -> Vec<HourBreach> {
    if weeks == 0 {
        return Vec::new();
    }

    let starts: BTreeSet<NaiveDate> = daily_hours
        .keys()
        .flat_map(|d| rolling_window_starts(*d, weeks))
        .collect();

    let limit = max_weekly_hours * weeks as f64;
    starts
        .into_iter()
        .filter_map(|start| {
            let end = rolling_window_end(start, weeks);
            let total: f64 = daily_hours.range(start..=end).map(|(_, h)| *h).sum();
            if total > limit + HOURS_TOLERANCE {
                Some(HourBreach {
                    window_start: start,
                    window_end: end,
                    total_hours: total,
                    average_weekly_hours: total / weeks as f64,
                })
            } else {
                None
            }
        })
        .collect()
}

/// 休息不足窗口
#[derive(Debug, Clone, PartialEq)]
pub struct RestBreach {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub free_days: u32,
}

/// 7 天窗口 [start, start+6] 内的无值班天数
pub fn free_days_in_window(duty_days: &BTreeSet<NaiveDate>, start: NaiveDate) -> u32 {
    let end = start + Duration::days(DAYS_PER_WEEK - 1);
    DAYS_PER_WEEK as u32 - duty_days.range(start..=end).count() as u32
}

/// 检查每个 7 天窗口的休息天数；同一违规区段只报告互不重叠的窗口
pub fn rest_breaches(duty_days: &BTreeSet<NaiveDate>, required_rest_days: u32) -> Vec<RestBreach> {
    let (Some(first), Some(last)) = (duty_days.first(), duty_days.last()) else {
        return Vec::new();
    };
    if required_rest_days == 0 {
        return Vec::new();
    }

    let mut breaches = Vec::new();
    let mut start = *first - Duration::days(DAYS_PER_WEEK - 1);
    while start <= *last {
        let free = free_days_in_window(duty_days, start);
        if free < required_rest_days {
            breaches.push(RestBreach {
                window_start: start,
                window_end: start + Duration::days(DAYS_PER_WEEK - 1),
                free_days: free,
            });
            start += Duration::days(DAYS_PER_WEEK);
        } else {
            start += Duration::days(1);
        }
    }
    breaches
}

/// 连续值班区段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsecutiveRun {
    pub start: NaiveDate,
    pub length: u32,
}

pub fn consecutive_runs(duty_days: &BTreeSet<NaiveDate>) -> Vec<ConsecutiveRun> {
    let mut runs: Vec<ConsecutiveRun> = Vec::new();
    let mut prev: Option<NaiveDate> = None;

    for day in duty_days {
        match (prev, runs.last_mut()) {
            (Some(p), Some(run)) if *day - p == Duration::days(1) => run.length += 1,
            _ => runs.push(ConsecutiveRun {
                start: *day,
                length: 1,
            }),
        }
        prev = Some(*day);
    }
    runs
}

/// 超过上限的连续值班区段
pub fn consecutive_breaches(duty_days: &BTreeSet<NaiveDate>, max_days: u32) -> Vec<ConsecutiveRun> {
    consecutive_runs(duty_days)
        .into_iter()
        .filter(|r| r.length > max_days)
        .collect()
}

/// 包含 date 的连续值班长度（假设 date 为值班日）
pub fn run_length_through(is_duty: impl Fn(NaiveDate) -> bool, date: NaiveDate) -> u32 {
    let mut length = 1;
    let mut d = date - Duration::days(1);
    while is_duty(d) {
        length += 1;
        d -= Duration::days(1);
    }
    let mut d = date + Duration::days(1);
    while is_duty(d) {
        length += 1;
        d += Duration::days(1);
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn test_monday_and_window_starts() {
        // 2026-03-05 为周四
        assert_eq!(monday_of(d(5)), d(2));
        assert_eq!(monday_of(d(2)), d(2));
        let starts = rolling_window_starts(d(5), 4);
        assert_eq!(starts[0], d(2));
        assert_eq!(starts[3], NaiveDate::from_ymd_opt(2026, 2, 9).unwrap());
        assert_eq!(rolling_window_end(d(2), 4), d(29));
    }

    #[test]
    fn test_context_horizon_covers_touching_windows() {
        // 区间 2026-03-09（周一）~ 03-15
        let (from, to) = context_horizon(d(9), d(15), 4);
        assert_eq!(from, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2026, 4, 11).unwrap());
        for start in rolling_window_starts(d(9), 4) {
            assert!(start >= from);
        }
        assert!(rolling_window_end(monday_of(d(15)), 4) <= to);

        assert!(windows_overlap((d(2), d(29)), (d(9), d(15))));
        assert!(!windows_overlap((d(2), d(8)), (d(9), d(15))));
    }

    #[test]
    fn test_rolling_hours_boundary() {
        let mut hours = BTreeMap::new();
        // 4 周共 320 小时，恰好等于上限
        for day in 2..=29 {
            hours.insert(d(day), 320.0 / 28.0);
        }
        assert!(rolling_hour_breaches(&hours, 80.0, 4).is_empty());

        hours.insert(d(10), 320.0 / 28.0 + 1.0);
        let breaches = rolling_hour_breaches(&hours, 80.0, 4);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].window_start, d(2));
        assert!(breaches[0].average_weekly_hours > 80.0);
    }

    #[test]
    fn test_rest_breaches_non_overlapping() {
        // 连续 14 天值班 → 两个互不重叠的窗口
        let duty: BTreeSet<NaiveDate> = (2..=15).map(d).collect();
        let breaches = rest_breaches(&duty, 1);
        assert_eq!(breaches.len(), 2);
        assert_eq!(breaches[0].window_start, d(2));
        assert_eq!(breaches[1].window_start, d(9));

        // 6 天值班 1 天休息 → 合规
        let duty: BTreeSet<NaiveDate> = (2..=7).chain(9..=14).map(d).collect();
        assert!(rest_breaches(&duty, 1).is_empty());
    }

    #[test]
    fn test_consecutive_runs() {
        let duty: BTreeSet<NaiveDate> = [2, 3, 4, 6, 7].into_iter().map(d).collect();
        let runs = consecutive_runs(&duty);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].length, 3);
        assert_eq!(consecutive_breaches(&duty, 2).len(), 1);
        assert_eq!(run_length_through(|x| duty.contains(&x), d(5)), 6);
    }
}
