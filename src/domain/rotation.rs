// ==========================================
// 住院医师排班系统 - 轮转模板领域模型
// ==========================================
// 说明: 模板定义活动、容量与监督比例要求，本系统只读
// ==========================================

use serde::{Deserialize, Serialize};

/// 每个排班块默认计入的值班工时
pub const DEFAULT_HOURS_PER_BLOCK: f64 = 6.0;

/// PGY1 默认监督比例（1 名带教 : 2 名 PGY1）
pub const DEFAULT_PGY1_PER_FACULTY: u32 = 2;

/// PGY2/3 默认监督比例（1 名带教 : 4 名高年资住院医师）
pub const DEFAULT_SENIOR_PER_FACULTY: u32 = 4;

// ==========================================
// RotationTemplate - 轮转模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationTemplate {
    pub template_id: String,                // 模板ID
    pub name: String,                       // 模板名称
    pub activity_type: String,              // 活动类型 (clinic/inpatient/procedure...)
    pub min_coverage: u32,                  // 每个块实例所需住院医师人数
    pub capacity: u32,                      // 每个块实例人数上限（含带教）
    pub hours_per_block: f64,               // 每次排班计入工时
    pub required_specialty: Option<String>, // 专科资质要求
    pub supervision_required: bool,         // 是否需要带教监督
    pub pgy1_per_faculty: u32,              // PGY1 监督比例
    pub senior_per_faculty: u32,            // PGY2/3 监督比例
    pub applies_on_weekends: bool,          // 是否在周末开放
}

impl RotationTemplate {
    pub fn new(template_id: &str, name: &str, min_coverage: u32, capacity: u32) -> Self {
        Self {
            template_id: template_id.to_string(),
            name: name.to_string(),
            activity_type: "clinic".to_string(),
            min_coverage,
            capacity,
            hours_per_block: DEFAULT_HOURS_PER_BLOCK,
            required_specialty: None,
            supervision_required: true,
            pgy1_per_faculty: DEFAULT_PGY1_PER_FACULTY,
            senior_per_faculty: DEFAULT_SENIOR_PER_FACULTY,
            applies_on_weekends: true,
        }
    }

    /// 计算所需带教人数
    ///
    /// # 规则
    /// - required = ceil(pgy1 / pgy1_per_faculty + seniors / senior_per_faculty)
    /// - 无初级人员或模板不要求监督 → 0
    ///
    /// 使用整数运算避免浮点取整误差:
    /// ceil((pgy1 * r2 + seniors * r1) / (r1 * r2))
    pub fn required_supervisors(&self, pgy1_count: u32, senior_count: u32) -> u32 {
        if !self.supervision_required || pgy1_count + senior_count == 0 {
            return 0;
        }
        let r1 = self.pgy1_per_faculty.max(1);
        let r2 = self.senior_per_faculty.max(1);
        let load = pgy1_count * r2 + senior_count * r1;
        let unit = r1 * r2;
        (load + unit - 1) / unit
    }
}
