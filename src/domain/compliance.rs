// ==========================================
// 住院医师排班系统 - 合规报告领域模型
// ==========================================
// 说明: 每次校验派生，不是业务记录源
// 红线: CRITICAL/HIGH 阻断自动接受（除非显式豁免）
// ==========================================

use crate::domain::types::{ConstraintKind, Severity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ConstraintViolation - 约束违规（约束评估器输出）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint_id: String,
    pub kind: ConstraintKind,
    pub severity: Severity,
    pub person_ids: Vec<String>,
    pub block_ids: Vec<String>,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(
        constraint_id: &str,
        kind: ConstraintKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            constraint_id: constraint_id.to_string(),
            kind,
            severity,
            person_ids: Vec::new(),
            block_ids: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_person(mut self, person_id: &str) -> Self {
        self.person_ids.push(person_id.to_string());
        self
    }

    pub fn with_block(mut self, block_id: &str) -> Self {
        self.block_ids.push(block_id.to_string());
        self
    }

    pub fn is_hard(&self) -> bool {
        self.kind == ConstraintKind::Hard
    }
}

// ==========================================
// ComplianceViolation - 合规违规
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub rule_id: String,         // 规则ID (work_hours/rest_period/supervision_ratio...)
    pub severity: Severity,      // 严重度
    pub person_ids: Vec<String>, // 受影响人员
    pub date: Option<NaiveDate>, // 违规窗口起始日期 / 块日期
    pub message: String,         // 可解释原因
}

impl From<&ComplianceViolation> for ConstraintViolation {
    fn from(v: &ComplianceViolation) -> Self {
        ConstraintViolation {
            constraint_id: v.rule_id.clone(),
            kind: ConstraintKind::Hard,
            severity: v.severity,
            person_ids: v.person_ids.clone(),
            block_ids: Vec::new(),
            message: v.message.clone(),
        }
    }
}

// ==========================================
// ComplianceReport - 合规报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub people_checked: usize,
    pub assignments_checked: usize,
    pub violations: Vec<ComplianceViolation>,
}

impl ComplianceReport {
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            period_start: None,
            period_end: None,
            people_checked: 0,
            assignments_checked: 0,
            violations: Vec::new(),
        }
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }

    pub fn critical_count(&self) -> usize {
        self.count_by_severity(Severity::Critical)
    }

    pub fn high_count(&self) -> usize {
        self.count_by_severity(Severity::High)
    }

    /// 无 CRITICAL/HIGH 违规即合规
    pub fn is_compliant(&self) -> bool {
        !self.violations.iter().any(|v| v.severity.is_blocking())
    }

    /// 是否阻断自动接受
    ///
    /// # 参数
    /// - allow_override: 调用方是否显式豁免
    pub fn blocks_acceptance(&self, allow_override: bool) -> bool {
        !allow_override && !self.is_compliant()
    }

    /// 仅提示级别（MEDIUM/LOW）的违规
    pub fn advisory(&self) -> Vec<&ComplianceViolation> {
        self.violations
            .iter()
            .filter(|v| !v.severity.is_blocking())
            .collect()
    }

    pub fn for_person(&self, person_id: &str) -> Vec<&ComplianceViolation> {
        self.violations
            .iter()
            .filter(|v| v.person_ids.iter().any(|p| p == person_id))
            .collect()
    }
}
