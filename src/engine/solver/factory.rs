// ==========================================
// 住院医师排班系统 - 求解器工厂
// ==========================================
// 职责: 按 SolverKind 分派；在阻塞线程上运行；强制超时；
//       错误与 panic 被捕获并记录，随后最多执行一次备用策略
// 红线: 引擎不会因求解器失败而崩溃，失败总是显式的 SolverOutcome::Failure
// ==========================================

use crate::engine::context::SchedulingContext;
use crate::engine::solver::{Solver, SolverError, SolverKind, SolverResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 外层超时相对协作式截止时间的宽限
pub(crate) const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// 求解失败（显式结果，不是 panic）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverFailure {
    pub solver_name: String,
    pub message: String,
    pub timed_out: bool,
    pub fallback_attempted: bool,
}

#[derive(Debug, Clone)]
pub enum SolverOutcome {
    Success(SolverResult),
    /// 主策略失败，备用策略成功
    FallbackSuccess {
        result: SolverResult,
        primary_failure: SolverFailure,
    },
    Failure(SolverFailure),
}

impl SolverOutcome {
    pub fn result(&self) -> Option<&SolverResult> {
        match self {
            SolverOutcome::Success(result) | SolverOutcome::FallbackSuccess { result, .. } => Some(result),
            SolverOutcome::Failure(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverFactory {
    fallback: Option<SolverKind>,
    grace: Duration,
}

impl SolverFactory {
    pub fn new(fallback: Option<SolverKind>) -> Self {
        Self {
            fallback,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn fallback(&self) -> Option<SolverKind> {
        self.fallback
    }

    /// 运行求解器（含备用策略）
    ///
    /// # 参数
    /// - kind: 主策略
    /// - ctx: 只读上下文（跨线程共享）
    /// - timeout: 单次求解时限；备用策略另计一次时限
    pub async fn run(&self, kind: SolverKind, ctx: Arc<SchedulingContext>, timeout: Duration) -> SolverOutcome {
        let primary = match self.run_once(kind, Arc::clone(&ctx), timeout).await {
            Ok(result) => return SolverOutcome::Success(result),
            Err(e) => e,
        };

        tracing::error!(solver = %kind, error = %primary, "求解失败");

        let fallback = match self.fallback {
            Some(fallback) if fallback != kind => fallback,
            _ => return SolverOutcome::Failure(failure(kind, &primary, false)),
        };

        tracing::warn!(primary = %kind, fallback = %fallback, "切换备用求解器");
        match self.run_once(fallback, ctx, timeout).await {
            Ok(result) => SolverOutcome::FallbackSuccess {
                result,
                primary_failure: failure(kind, &primary, true),
            },
            Err(e) => {
                tracing::error!(solver = %fallback, error = %e, "备用求解器同样失败");
                SolverOutcome::Failure(SolverFailure {
                    solver_name: fallback.as_str().to_string(),
                    message: format!("{}; 主策略 {}: {}", e, kind, primary),
                    timed_out: matches!(e, SolverError::Timeout { .. }),
                    fallback_attempted: true,
                })
            }
        }
    }

    async fn run_once(
        &self,
        kind: SolverKind,
        ctx: Arc<SchedulingContext>,
        timeout: Duration,
    ) -> Result<SolverResult, SolverError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let handle = tokio::task::spawn_blocking(move || Solver::for_kind(kind).solve(&ctx, deadline));

        match tokio::time::timeout(timeout + self.grace, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(SolverError::Internal(format!("求解器 panic: {}", panic_message(join_error))))
            }
            Ok(Err(join_error)) => Err(SolverError::Internal(join_error.to_string())),
            Err(_) => Err(SolverError::Timeout {
                solver_name: kind.as_str().to_string(),
                elapsed_seconds: started.elapsed().as_secs_f64(),
            }),
        }
    }
}

fn failure(kind: SolverKind, error: &SolverError, fallback_attempted: bool) -> SolverFailure {
    SolverFailure {
        solver_name: kind.as_str().to_string(),
        message: error.to_string(),
        timed_out: matches!(error, SolverError::Timeout { .. }),
        fallback_attempted,
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    let payload = join_error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
