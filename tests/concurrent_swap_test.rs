// ==========================================
// 并发换班测试
// ==========================================
// 场景: 多个实例（各自独立连接）同时对同一数据库发起换班
// - 不相交的换班互不阻塞，全部成功
// - 相交的换班串行化，后到者冲突且不留部分修改
// - 相同幂等键的并发请求只执行一次
// ==========================================


#[cfg(test)]
mod concurrent_swap_test {
    use crate::test_helpers::*;
    use residency_scheduler::api::SwapApi;
    use residency_scheduler::app::AppState;
    use residency_scheduler::domain::{Person, SeniorityTier, SwapRequest};
    use residency_scheduler::engine::SwapExecution;
    use residency_scheduler::repository::{AssignmentRepository, SqliteAssignmentRepository};
    use residency_scheduler::{ApiError, ApiResult};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    /// 4 名住院医师各持有一个块: R1@B01 ... R4@B04
    fn seeded_db() -> (NamedTempFile, String) {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();

        let mut people = standard_people();
        people.push(Person::resident("R4", "Resident Four", SeniorityTier::Pgy2));
        let template = unsupervised_template("T1", 6.0);
        seed_calendar(&conn, &people, &daily_blocks(7), &[template]).unwrap();
        for (offset, person) in ["R1", "R2", "R3", "R4"].iter().enumerate() {
            seed_assignment(&conn, person, &block_id(offset as i64), "T1").unwrap();
        }
        (temp_file, db_path)
    }

    /// 每个实例独立打开数据库
    fn instance(db_path: &str) -> Arc<SwapApi> {
        AppState::new(db_path).unwrap().swap_api
    }

    fn spawn_swap(
        api: Arc<SwapApi>,
        request: SwapRequest,
    ) -> tokio::task::JoinHandle<ApiResult<SwapExecution>> {
        tokio::spawn(async move { api.execute_swap(&request).await })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disjoint_swaps_both_succeed() {
        let (_temp_file, db_path) = seeded_db();

        let a = spawn_swap(
            instance(&db_path),
            SwapRequest::one_to_one("R1", "B01", "R2", "B02"),
        );
        let b = spawn_swap(
            instance(&db_path),
            SwapRequest::one_to_one("R3", "B03", "R4", "B04"),
        );
        let (a, b) = tokio::join!(a, b);
        a.unwrap().unwrap();
        b.unwrap().unwrap();

        let conn = open_shared(&db_path).unwrap();
        assert!(holding(&conn, "R2", "B01").unwrap().is_some());
        assert!(holding(&conn, "R1", "B02").unwrap().is_some());
        assert!(holding(&conn, "R4", "B03").unwrap().is_some());
        assert!(holding(&conn, "R3", "B04").unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_swaps_serialize() {
        let (_temp_file, db_path) = seeded_db();

        // 两个换班都要让出 R1@B01
        let a = spawn_swap(
            instance(&db_path),
            SwapRequest::one_to_one("R1", "B01", "R2", "B02"),
        );
        let b = spawn_swap(
            instance(&db_path),
            SwapRequest::one_to_one("R1", "B01", "R3", "B03"),
        );
        let (a, b) = tokio::join!(a, b);
        let results = vec![a.unwrap(), b.unwrap()];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "{:?}", results);
        for result in &results {
            if let Err(e) = result {
                assert!(
                    matches!(e, ApiError::SwapConflict(_) | ApiError::NotFound(_)),
                    "意外错误: {:?}",
                    e
                );
            }
        }

        // B01 仍只有一名持有人，各人员无重复
        let conn = open_shared(&db_path).unwrap();
        let stored = SqliteAssignmentRepository::new(conn.clone())
            .list_in_range(day(0), day(6))
            .unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored.iter().filter(|a| a.block_id == "B01").count(), 1);
        let keys: HashSet<(String, String)> = stored
            .iter()
            .map(|a| (a.person_id.clone(), a.block_id.clone()))
            .collect();
        assert_eq!(keys.len(), stored.len());

        let api = instance(&db_path);
        assert_eq!(api.list_swaps_for_person("R1").unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_retries_with_same_key_execute_once() {
        let (_temp_file, db_path) = seeded_db();
        let request = SwapRequest::absorb("R1", "B01", "R3").with_idempotency_key("retry-001");

        let handles: Vec<_> = (0..3)
            .map(|_| spawn_swap(instance(&db_path), request.clone()))
            .collect();
        let mut executions = Vec::new();
        for handle in handles {
            executions.push(handle.await.unwrap().unwrap());
        }

        let ids: HashSet<&str> = executions
            .iter()
            .map(|e| e.swap_record_id.as_str())
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(executions.iter().filter(|e| !e.replayed).count(), 1);

        let conn = open_shared(&db_path).unwrap();
        let moved = holding(&conn, "R3", "B01").unwrap().unwrap();
        assert_eq!(moved.revision, 2);
    }
}
