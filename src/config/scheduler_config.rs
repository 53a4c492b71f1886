// ==========================================
// 住院医师排班系统 - 排班配置项
// ==========================================
// 依据: ACGME 值班工时规则
// 存储: config_kv 表 (scope_id='global')
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    pub const MAX_WEEKLY_HOURS: &str = "max_weekly_hours";
    pub const ROLLING_WEEKS: &str = "rolling_weeks";
    pub const REST_PERIOD_HOURS: &str = "rest_period_hours";
    pub const MAX_CONSECUTIVE_DAYS: &str = "max_consecutive_days";
    pub const ROLLBACK_WINDOW_HOURS: &str = "rollback_window_hours";
    pub const LOCK_TIMEOUT_MS: &str = "lock_timeout_ms";
    pub const LOCK_LEASE_SECONDS: &str = "lock_lease_seconds";
    pub const DEFAULT_SOLVER: &str = "default_solver";
    pub const FALLBACK_SOLVER: &str = "fallback_solver";
    pub const DEFAULT_TIMEOUT_SECONDS: &str = "default_timeout_seconds";
    pub const CONSTRAINT_PRESET: &str = "constraint_preset";

    /// 全部已知配置键（快照/恢复时使用）
    pub const ALL: [&str; 11] = [
        MAX_WEEKLY_HOURS,
        ROLLING_WEEKS,
        REST_PERIOD_HOURS,
        MAX_CONSECUTIVE_DAYS,
        ROLLBACK_WINDOW_HOURS,
        LOCK_TIMEOUT_MS,
        LOCK_LEASE_SECONDS,
        DEFAULT_SOLVER,
        FALLBACK_SOLVER,
        DEFAULT_TIMEOUT_SECONDS,
        CONSTRAINT_PRESET,
    ];
}

// ==========================================
// SchedulerConfig - 排班系统配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 滚动平均周工时上限（默认 80）
    pub max_weekly_hours: f64,
    /// 滚动平均周数（默认 4）
    pub rolling_weeks: u32,
    /// 每 7 天所需连续休息时长（小时，默认 24）
    pub rest_period_hours: u32,
    /// 最大连续值班天数（仅在 max_consecutive_days 约束启用时生效）
    pub max_consecutive_days: u32,
    /// 换班回滚窗口（小时，默认 24）
    pub rollback_window_hours: i64,
    /// 锁获取超时（毫秒）
    pub lock_timeout_ms: u64,
    /// 锁租约时长（秒），持有者崩溃后自动失效
    pub lock_lease_seconds: i64,
    /// 默认求解器 (greedy/exact/hybrid)
    pub default_solver: String,
    /// 求解失败时的备用求解器（空字符串表示不回退）
    pub fallback_solver: Option<String>,
    /// 默认求解超时（秒）
    pub default_timeout_seconds: u64,
    /// 约束预设 (baseline/strict/minimal)
    pub constraint_preset: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_weekly_hours: 80.0,
            rolling_weeks: 4,
            rest_period_hours: 24,
            max_consecutive_days: 6,
            rollback_window_hours: 24,
            lock_timeout_ms: 5_000,
            lock_lease_seconds: 300,
            default_solver: "hybrid".to_string(),
            fallback_solver: Some("greedy".to_string()),
            default_timeout_seconds: 30,
            constraint_preset: "baseline".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// 滚动窗口内允许的总工时
    pub fn rolling_window_hour_limit(&self) -> f64 {
        self.max_weekly_hours * self.rolling_weeks as f64
    }

    /// 每 7 天窗口内需要的完全休息天数
    pub fn required_rest_days(&self) -> u32 {
        (self.rest_period_hours + 23) / 24
    }

    pub fn rollback_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rollback_window_hours)
    }

    /// 配置合法性校验
    ///
    /// # 返回
    /// - Ok(()): 合法
    /// - Err(String): 第一个不合法项的说明
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_weekly_hours.is_finite() && self.max_weekly_hours > 0.0) {
            return Err(format!("max_weekly_hours 必须为正数: {}", self.max_weekly_hours));
        }
        if self.rolling_weeks == 0 {
            return Err("rolling_weeks 必须大于 0".to_string());
        }
        if self.required_rest_days() > 7 {
            return Err(format!("rest_period_hours 超过 7 天: {}", self.rest_period_hours));
        }
        if self.max_consecutive_days == 0 {
            return Err("max_consecutive_days 必须大于 0".to_string());
        }
        if self.rollback_window_hours < 0 {
            return Err("rollback_window_hours 不能为负".to_string());
        }
        if self.lock_lease_seconds <= 0 {
            return Err("lock_lease_seconds 必须大于 0".to_string());
        }
        if self.default_solver.trim().is_empty() {
            return Err("default_solver 不能为空".to_string());
        }
        Ok(())
    }
}
