// ==========================================
// 生成与换班租约互斥测试
// ==========================================
// 场景: 同一数据库上的生成区间锁与换班 (人员, 块) 锁
// - 换班落在进行中生成的区间内: 锁超时，可重试
// - 生成区间覆盖已持有的换班锁: 锁超时，不落库
// - 锁释放后两者均可继续
// ==========================================


#[cfg(test)]
mod lock_interplay_test {
    use crate::test_helpers::*;
    use residency_scheduler::app::AppState;
    use residency_scheduler::domain::{RunStatus, SwapRequest, SwapStatus};
    use residency_scheduler::repository::{
        AssignmentRepository, LockProvider, LockScope, SqliteAssignmentRepository,
        SqliteLockProvider,
    };
    use residency_scheduler::ApiError;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    struct Fixture {
        _temp_file: NamedTempFile,
        conn: Arc<Mutex<Connection>>,
        state: AppState,
        locks: SqliteLockProvider,
    }

    /// 一周日历，R1@B01 / R2@B02，锁等待 200ms
    fn fixture() -> Fixture {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        let template = unsupervised_template("T1", 6.0);
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[template]).unwrap();
        seed_assignment(&conn, "R1", "B01", "T1").unwrap();
        seed_assignment(&conn, "R2", "B02", "T1").unwrap();

        let state = AppState::new(&db_path).unwrap();
        let mut config = state.config_manager.load_config().unwrap();
        config.lock_timeout_ms = 200;
        state.config_manager.save_config(&config).unwrap();

        Fixture {
            _temp_file: temp_file,
            locks: SqliteLockProvider::new(conn.clone()),
            conn,
            state,
        }
    }

    fn lease() -> chrono::Duration {
        chrono::Duration::seconds(60)
    }

    #[tokio::test]
    async fn test_swap_inside_running_generation_range_times_out() {
        let fx = fixture();
        // 另一进程的生成运行持有整周区间
        assert!(fx
            .locks
            .try_acquire("generation:other", &[LockScope::range(day(0), day(6))], lease())
            .unwrap());

        let request = SwapRequest::one_to_one("R1", "B01", "R2", "B02").with_idempotency_key("swap-in-range");
        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::LockAcquisitionTimeout { .. }));
        assert!(err.is_retryable());
        assert!(holding(&fx.conn, "R1", "B01").unwrap().is_some());

        fx.locks.release("generation:other").unwrap();
        let execution = fx.state.swap_api.execute_swap(&request).await.unwrap();
        assert_eq!(execution.status, SwapStatus::Executed);
        assert!(holding(&fx.conn, "R2", "B01").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_swap_outside_generation_range_proceeds() {
        let fx = fixture();
        assert!(fx
            .locks
            .try_acquire("generation:other", &[LockScope::range(day(3), day(6))], lease())
            .unwrap());

        let request = SwapRequest::one_to_one("R1", "B01", "R2", "B02");
        let execution = fx.state.swap_api.execute_swap(&request).await.unwrap();
        assert_eq!(execution.status, SwapStatus::Executed);
    }

    #[tokio::test]
    async fn test_generation_over_held_swap_pair_times_out() {
        let fx = fixture();
        // 进行中的换班持有 R1@B01
        assert!(fx
            .locks
            .try_acquire("swap:other", &[LockScope::pair("R1", "B01", day(0))], lease())
            .unwrap());

        let err = fx
            .state
            .schedule_api
            .generate(day(0), day(6), Some("greedy"), Some(10), HashMap::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::LockAcquisitionTimeout { .. }));
        assert!(err.is_retryable());

        // 原排班未被替换
        let stored = SqliteAssignmentRepository::new(fx.conn.clone())
            .list_in_range(day(0), day(6))
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(holding(&fx.conn, "R1", "B01").unwrap().is_some());

        fx.locks.release("swap:other").unwrap();
        let outcome = fx
            .state
            .schedule_api
            .generate(day(0), day(6), Some("greedy"), Some(10), HashMap::new(), false)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
    }
}
