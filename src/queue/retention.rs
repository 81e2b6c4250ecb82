//! Retention of settled job records
//!
//! Each job carries its own `removeOnComplete` / `removeOnFail` policy. A
//! settled record is expired when its policy removes immediately, when it is
//! older than the policy's age, or when more than `count` newer records of
//! the same state exist.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{JobRecord, JobState};
use super::options::Retention;

fn policy_for(job: &JobRecord) -> Option<&Retention> {
    match job.state {
        JobState::Completed => Some(&job.options.remove_on_complete),
        JobState::Failed => Some(&job.options.remove_on_fail),
        _ => None,
    }
}

/// Ids of settled jobs that have outlived their retention
pub fn expired(jobs: &[JobRecord], now: DateTime<Utc>) -> Vec<Uuid> {
    let mut expired = Vec::new();

    for state in [JobState::Completed, JobState::Failed] {
        let mut settled: Vec<&JobRecord> = jobs.iter().filter(|j| j.state == state).collect();
        // Newest first
        settled.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));

        for (rank, job) in settled.iter().enumerate() {
            let Some(policy) = policy_for(job) else {
                continue;
            };

            let too_many = policy.max_count().is_some_and(|max| rank >= max);
            let too_old = match (policy.max_age(), job.finished_at) {
                (Some(age), Some(finished)) => {
                    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
                    now.signed_duration_since(finished) > age
                }
                _ => false,
            };

            if policy.removes_immediately() || too_many || too_old {
                expired.push(job.id);
            }
        }
    }

    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{JobPayload, NewJob};
    use crate::queue::options::JobOptions;
    use chrono::Duration;
    use serde_json::Value;

    fn settled(state: JobState, finished_secs_ago: i64, options: JobOptions) -> JobRecord {
        let now = Utc::now();
        let mut job = JobRecord::from_new(
            NewJob {
                queue: "q".into(),
                name: "wf".into(),
                payload: JobPayload {
                    workflow_id: "wf".into(),
                    trigger: Value::Null,
                },
                options,
                run_at: now,
                repeat_count: 0,
            },
            now,
        );
        job.state = state;
        job.finished_at = Some(now - Duration::seconds(finished_secs_ago));
        job
    }

    #[test]
    fn test_keep_forever_by_default() {
        let jobs = vec![
            settled(JobState::Completed, 10_000, JobOptions::default()),
            settled(JobState::Failed, 10_000, JobOptions::default()),
        ];
        assert!(expired(&jobs, Utc::now()).is_empty());
    }

    #[test]
    fn test_count_keeps_latest() {
        let options = JobOptions {
            remove_on_complete: Retention::Count(2),
            ..Default::default()
        };
        let jobs = vec![
            settled(JobState::Completed, 30, options.clone()),
            settled(JobState::Completed, 10, options.clone()),
            settled(JobState::Completed, 20, options.clone()),
            settled(JobState::Failed, 40, options),
        ];
        assert_eq!(expired(&jobs, Utc::now()), vec![jobs[0].id]);
    }

    #[test]
    fn test_age_and_flag() {
        let by_age = JobOptions {
            remove_on_fail: Retention::Policy {
                age: Some(60),
                count: None,
            },
            ..Default::default()
        };
        let immediate = JobOptions {
            remove_on_complete: Retention::Flag(true),
            ..Default::default()
        };
        let jobs = vec![
            settled(JobState::Failed, 120, by_age.clone()),
            settled(JobState::Failed, 30, by_age),
            settled(JobState::Completed, 0, immediate),
        ];

        let mut ids = expired(&jobs, Utc::now());
        ids.sort();
        let mut expected = vec![jobs[0].id, jobs[2].id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
