// ==========================================
// 住院医师排班系统 - 缺勤领域模型
// ==========================================
// 说明: 缺勤只读输入，折叠进可用性矩阵
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Absence - 缺勤区间（含首尾）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub absence_id: String,    // 缺勤ID
    pub person_id: String,     // 人员ID
    pub start_date: NaiveDate, // 起始日期（含）
    pub end_date: NaiveDate,   // 结束日期（含）
    pub absence_type: String,  // 类型 (vacation/sick/conference...)
    pub is_blocking: bool,     // 是否阻断排班
}

impl Absence {
    pub fn blocking(absence_id: &str, person_id: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            absence_id: absence_id.to_string(),
            person_id: person_id.to_string(),
            start_date,
            end_date,
            absence_type: "vacation".to_string(),
            is_blocking: true,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}
