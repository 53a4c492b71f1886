// ==========================================
// 住院医师排班系统 - 生成运行记录
// ==========================================
// 状态机: PREPARING → VALIDATING_FEASIBILITY → SOLVING → POST_VALIDATING
//         → PERSISTING → {COMPLETED | FAILED}
// 每次状态转换均带时间戳记录
// ==========================================

use crate::domain::types::RunStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 单次状态转换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: RunStatus,
    pub at: DateTime<Utc>,
}

/// 非法的运行状态转换
#[derive(Error, Debug, Clone, PartialEq)]
#[error("无效的运行状态转换: from={from} to={to}")]
pub struct InvalidRunTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

// ==========================================
// GenerationRun - 一次排班生成运行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRun {
    pub run_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub algorithm: String,
    pub status: RunStatus,
    pub transitions: Vec<StatusTransition>,
    pub diagnostics: Option<serde_json::Value>,
    pub config_snapshot: Option<serde_json::Value>,
    pub assignment_count: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationRun {
    pub fn start(start_date: NaiveDate, end_date: NaiveDate, algorithm: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            start_date,
            end_date,
            algorithm: algorithm.to_string(),
            status: RunStatus::Preparing,
            transitions: vec![StatusTransition {
                status: RunStatus::Preparing,
                at: now,
            }],
            diagnostics: None,
            config_snapshot: None,
            assignment_count: 0,
            created_at: now,
            finished_at: None,
        }
    }

    /// 推进状态；进入终态时记录 finished_at
    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), InvalidRunTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidRunTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.transitions.push(StatusTransition { status: next, at: now });
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// 标记失败（已处于终态时保持不变）
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            let _ = self.transition_to(RunStatus::Failed);
        }
    }
}
