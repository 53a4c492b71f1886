// ==========================================
// 住院医师排班系统 - 命令行入口
// ==========================================
// 用法:
//   residency-scheduler [db_path] generate <start> <end> [algorithm] [timeout_seconds]
//   residency-scheduler [db_path] report <start> <end>
// 输出: JSON（stdout）
// ==========================================

use anyhow::{bail, Context};
use chrono::NaiveDate;
use residency_scheduler::api::ComplianceQuery;
use residency_scheduler::app::{AppState, DEFAULT_DB_PATH};
use std::collections::HashMap;

const USAGE: &str = "用法:
  residency-scheduler [db_path] generate <start> <end> [algorithm] [timeout_seconds]
  residency-scheduler [db_path] report <start> <end>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    residency_scheduler::logging::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = match args.first().map(String::as_str) {
        Some("generate") | Some("report") | None => DEFAULT_DB_PATH.to_string(),
        Some(_) => args.remove(0),
    };

    tracing::info!("==================================================");
    tracing::info!("{} v{}", residency_scheduler::APP_NAME, residency_scheduler::VERSION);
    tracing::info!("使用数据库: {}", db_path);
    tracing::info!("==================================================");

    let state = AppState::new(&db_path).context("无法初始化AppState")?;

    match args.first().map(String::as_str) {
        Some("generate") => {
            let start = parse_date(args.get(1), "start")?;
            let end = parse_date(args.get(2), "end")?;
            let algorithm = args.get(3).map(String::as_str);
            let timeout = args
                .get(4)
                .map(|s| s.parse::<u64>().with_context(|| format!("timeout_seconds 无效: {}", s)))
                .transpose()?;

            let outcome = state
                .schedule_api
                .generate(start, end, algorithm, timeout, HashMap::new(), false)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Some("report") => {
            let start = parse_date(args.get(1), "start")?;
            let end = parse_date(args.get(2), "end")?;
            let report = state
                .schedule_api
                .get_compliance_report(ComplianceQuery::DateRange { start, end })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => bail!("{}", USAGE),
    }

    Ok(())
}

fn parse_date(arg: Option<&String>, name: &str) -> anyhow::Result<NaiveDate> {
    let raw = arg.with_context(|| format!("缺少参数 <{}>\n{}", name, USAGE))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("{} 日期格式无效（YYYY-MM-DD）: {}", name, raw))
}
