// ==========================================
// 住院医师排班系统 - 领域类型定义
// ==========================================
// 依据: ACGME 工时/监督规则
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 人员角色 (Person Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonRole {
    Resident, // 住院医师
    Faculty,  // 带教医师
}

impl fmt::Display for PersonRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl PersonRole {
    /// 从字符串解析角色
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "FACULTY" => PersonRole::Faculty,
            _ => PersonRole::Resident, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PersonRole::Resident => "RESIDENT",
            PersonRole::Faculty => "FACULTY",
        }
    }
}

// ==========================================
// 年资层级 (Seniority Tier)
// ==========================================
// 顺序: Pgy1 < Pgy2 < Pgy3 < Faculty
// 监督比例按层级区分: PGY1 1:2, PGY2/3 1:4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeniorityTier {
    Pgy1,    // 第一年住院医师
    Pgy2,    // 第二年住院医师
    Pgy3,    // 第三年住院医师
    Faculty, // 带教医师
}

impl fmt::Display for SeniorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SeniorityTier {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PGY1" | "PGY-1" => SeniorityTier::Pgy1,
            "PGY2" | "PGY-2" => SeniorityTier::Pgy2,
            "PGY3" | "PGY-3" => SeniorityTier::Pgy3,
            "FACULTY" => SeniorityTier::Faculty,
            _ => SeniorityTier::Pgy1,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SeniorityTier::Pgy1 => "PGY1",
            SeniorityTier::Pgy2 => "PGY2",
            SeniorityTier::Pgy3 => "PGY3",
            SeniorityTier::Faculty => "FACULTY",
        }
    }

    /// 是否为需要被监督的初级人员
    pub fn is_junior(&self) -> bool {
        !matches!(self, SeniorityTier::Faculty)
    }

    /// 是否具备监督资格
    pub fn can_supervise(&self) -> bool {
        matches!(self, SeniorityTier::Faculty)
    }
}

// ==========================================
// 时段 (Session)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Session {
    Am, // 上午
    Pm, // 下午
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl Session {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PM" => Session::Pm,
            _ => Session::Am,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Session::Am => "AM",
            Session::Pm => "PM",
        }
    }
}

// ==========================================
// 排班来源 (Assignment Source)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentSource {
    Generated, // 求解器生成
    Preserved, // 保留（生成不得改动）
    Manual,    // 人工录入
    Swap,      // 换班产生
}

impl fmt::Display for AssignmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AssignmentSource {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PRESERVED" => AssignmentSource::Preserved,
            "MANUAL" => AssignmentSource::Manual,
            "SWAP" => AssignmentSource::Swap,
            _ => AssignmentSource::Generated,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentSource::Generated => "GENERATED",
            AssignmentSource::Preserved => "PRESERVED",
            AssignmentSource::Manual => "MANUAL",
            AssignmentSource::Swap => "SWAP",
        }
    }
}

// ==========================================
// 违规严重度 (Severity)
// ==========================================
// 顺序: Low < Medium < High < Critical
// 红线: CRITICAL/HIGH 阻断自动接受, MEDIUM/LOW 仅提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl Severity {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// 是否阻断自动接受
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

// ==========================================
// 换班类型 (Swap Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapType {
    OneToOne, // 双方互换
    Absorb,   // 接收方承接，不回换
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SwapType {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ABSORB" => SwapType::Absorb,
            _ => SwapType::OneToOne,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SwapType::OneToOne => "ONE_TO_ONE",
            SwapType::Absorb => "ABSORB",
        }
    }
}

// ==========================================
// 换班状态 (Swap Status)
// ==========================================
// 状态机: PROPOSED → VALIDATED → EXECUTING → EXECUTED → [ROLLED_BACK]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Proposed,
    Validated,
    Executing,
    Executed,
    RolledBack,
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SwapStatus {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "VALIDATED" => SwapStatus::Validated,
            "EXECUTING" => SwapStatus::Executing,
            "EXECUTED" => SwapStatus::Executed,
            "ROLLED_BACK" => SwapStatus::RolledBack,
            _ => SwapStatus::Proposed,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SwapStatus::Proposed => "PROPOSED",
            SwapStatus::Validated => "VALIDATED",
            SwapStatus::Executing => "EXECUTING",
            SwapStatus::Executed => "EXECUTED",
            SwapStatus::RolledBack => "ROLLED_BACK",
        }
    }

    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        matches!(
            (self, next),
            (SwapStatus::Proposed, SwapStatus::Validated)
                | (SwapStatus::Validated, SwapStatus::Executing)
                | (SwapStatus::Executing, SwapStatus::Executed)
                | (SwapStatus::Executed, SwapStatus::RolledBack)
        )
    }
}

// ==========================================
// 生成运行状态 (Run Status)
// ==========================================
// 状态机: PREPARING → VALIDATING_FEASIBILITY → SOLVING → POST_VALIDATING
//         → PERSISTING → {COMPLETED | FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Preparing,
    ValidatingFeasibility,
    Solving,
    PostValidating,
    Persisting,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl RunStatus {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "VALIDATING_FEASIBILITY" => RunStatus::ValidatingFeasibility,
            "SOLVING" => RunStatus::Solving,
            "POST_VALIDATING" => RunStatus::PostValidating,
            "PERSISTING" => RunStatus::Persisting,
            "COMPLETED" => RunStatus::Completed,
            "FAILED" => RunStatus::Failed,
            _ => RunStatus::Preparing,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            RunStatus::Preparing => "PREPARING",
            RunStatus::ValidatingFeasibility => "VALIDATING_FEASIBILITY",
            RunStatus::Solving => "SOLVING",
            RunStatus::PostValidating => "POST_VALIDATING",
            RunStatus::Persisting => "PERSISTING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// 判断状态转换是否合法（任意非终态均可转入 FAILED）
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == RunStatus::Failed {
            return true;
        }
        matches!(
            (self, next),
            (RunStatus::Preparing, RunStatus::ValidatingFeasibility)
                | (RunStatus::ValidatingFeasibility, RunStatus::Solving)
                | (RunStatus::Solving, RunStatus::PostValidating)
                | (RunStatus::PostValidating, RunStatus::Persisting)
                | (RunStatus::Persisting, RunStatus::Completed)
        )
    }
}

// ==========================================
// 约束类型 (Constraint Kind)
// ==========================================
// 硬约束: 被接受的排班绝不允许违反
// 软约束: 违反计入惩罚，可容忍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Hard,
    Soft,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Hard => write!(f, "HARD"),
            ConstraintKind::Soft => write!(f, "SOFT"),
        }
    }
}
