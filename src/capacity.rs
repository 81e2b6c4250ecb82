//! Capacity monitor
//!
//! Read-only view over the connection pool, the queue, the local worker
//! pool and the integration breakers, plus plain-text recommendations
//! derived from them.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::{BreakerState, IntegrationStatus, Resilience};
use crate::queue::{JobQueue, QueueCounts, QueueError, WorkerPool, WorkerStats};
use crate::storage::{Database, PoolStats};

/// Pool utilization at or above this is reported as saturated
pub const POOL_SATURATION_PERCENT: f64 = 80.0;

/// Waiting jobs per worker slot beyond which the backlog is reported
pub const BACKLOG_PER_SLOT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_pool: Option<PoolStats>,
    pub queue: QueueCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkerStats>,
    pub degraded_integrations: Vec<IntegrationStatus>,
    pub recommendations: Vec<String>,
}

pub struct CapacityMonitor {
    queue: JobQueue,
    resilience: Arc<Resilience>,
    database: Option<Database>,
    workers: Option<WorkerPool>,
}

impl CapacityMonitor {
    pub fn new(queue: JobQueue, resilience: Arc<Resilience>) -> Self {
        Self {
            queue,
            resilience,
            database: None,
            workers: None,
        }
    }

    pub fn with_database(mut self, database: Option<Database>) -> Self {
        self.database = database;
        self
    }

    pub fn with_workers(mut self, workers: WorkerPool) -> Self {
        self.workers = Some(workers);
        self
    }

    pub async fn report(&self) -> Result<CapacityReport, QueueError> {
        let queue = self.queue.counts().await?;
        let db_pool = self.database.as_ref().map(Database::stats);
        let workers = self.workers.as_ref().map(WorkerPool::stats);
        let degraded_integrations: Vec<IntegrationStatus> = self
            .resilience
            .snapshot()
            .into_iter()
            .filter(|s| s.state != BreakerState::Closed)
            .collect();

        let recommendations = recommend(
            db_pool.as_ref(),
            &queue,
            workers.as_ref(),
            &degraded_integrations,
        );

        Ok(CapacityReport {
            db_pool,
            queue,
            workers,
            degraded_integrations,
            recommendations,
        })
    }
}

pub fn recommend(
    db_pool: Option<&PoolStats>,
    queue: &QueueCounts,
    workers: Option<&WorkerStats>,
    degraded: &[IntegrationStatus],
) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(pool) = db_pool {
        if pool.utilization_percent >= POOL_SATURATION_PERCENT {
            out.push(format!(
                "Database pool is {:.0}% utilized ({} of {} connections); raise database.max_connections",
                pool.utilization_percent, pool.in_use, pool.max_connections
            ));
        }
    }

    if let Some(workers) = workers {
        if workers.active >= workers.capacity && queue.waiting > 0 {
            out.push(format!(
                "All {} worker slots are busy with {} jobs waiting; raise workers.concurrency or start more workers",
                workers.capacity, queue.waiting
            ));
        } else if queue.waiting > workers.capacity * BACKLOG_PER_SLOT {
            out.push(format!(
                "{} jobs waiting for {} worker slots; the backlog is growing",
                queue.waiting, workers.capacity
            ));
        }
    }

    if queue.failed > 0 && queue.failed > queue.completed {
        out.push(format!(
            "{} jobs failed against {} completed; check run history for the failing steps",
            queue.failed, queue.completed
        ));
    }

    for status in degraded {
        out.push(format!(
            "Circuit for integration '{}' is {:?} at {:.0}% errors; its steps fail fast until it recovers",
            status.integration, status.state, status.error_rate_percent
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(utilization: f64) -> PoolStats {
        PoolStats {
            max_connections: 5,
            open: 5,
            idle: 0,
            in_use: 5,
            utilization_percent: utilization,
        }
    }

    #[test]
    fn test_healthy_has_no_recommendations() {
        let counts = QueueCounts {
            waiting: 1,
            completed: 10,
            ..Default::default()
        };
        let workers = WorkerStats {
            capacity: 4,
            active: 1,
        };
        assert!(recommend(Some(&pool(20.0)), &counts, Some(&workers), &[]).is_empty());
    }

    #[test]
    fn test_saturation() {
        let counts = QueueCounts {
            waiting: 12,
            failed: 3,
            completed: 1,
            ..Default::default()
        };
        let workers = WorkerStats {
            capacity: 2,
            active: 2,
        };
        let degraded = IntegrationStatus {
            integration: "http".into(),
            state: BreakerState::Open,
            error_rate_percent: 75.0,
            in_flight: 0,
            waiting: 0,
        };

        let out = recommend(Some(&pool(100.0)), &counts, Some(&workers), &[degraded]);
        assert_eq!(out.len(), 4);
        assert!(out[0].contains("max_connections"));
        assert!(out[1].contains("worker slots are busy"));
        assert!(out[2].contains("3 jobs failed"));
        assert!(out[3].contains("'http'"));
    }

    #[test]
    fn test_backlog_without_saturation() {
        let counts = QueueCounts {
            waiting: 50,
            ..Default::default()
        };
        let workers = WorkerStats {
            capacity: 4,
            active: 0,
        };
        let out = recommend(None, &counts, Some(&workers), &[]);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("backlog"));
    }

    #[tokio::test]
    async fn test_report_from_memory_queue() {
        use crate::config::QueueConfig;
        use crate::engine::ResilienceConfig;
        use crate::queue::MemoryQueue;

        let queue = JobQueue::new(Arc::new(MemoryQueue::new()), &QueueConfig::default());
        queue
            .enqueue_workflow("wf", serde_json::Value::Null, None)
            .await
            .unwrap();

        let monitor = CapacityMonitor::new(queue, Arc::new(Resilience::new(ResilienceConfig::default())));
        let report = monitor.report().await.unwrap();
        assert_eq!(report.queue.waiting, 1);
        assert!(report.db_pool.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("degradedIntegrations").is_some());
        assert!(json.get("dbPool").is_none());
    }
}
