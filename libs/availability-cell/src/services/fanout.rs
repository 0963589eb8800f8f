use std::future::Future;

use tokio::time::Instant;
use tracing::warn;

/// Outcome of one fan-out branch. Branches that hit the scan deadline are
/// partial results, not failures.
#[derive(Debug)]
pub enum BranchOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
}

/// Run branches concurrently against a shared wall-clock deadline, returning
/// outcomes in submission order so aggregation is deterministic. Concurrency
/// toward the PMS is already bounded by the per-clinic throttle.
pub async fn run_with_deadline<T, F>(
    branches: Vec<F>,
    deadline: Instant,
    label: &str,
) -> Vec<BranchOutcome<T>>
where
    F: Future<Output = Result<T, String>>,
{
    let label = label.to_string();
    let futures: Vec<_> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| {
            let label = label.clone();
            async move {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!("{}: branch {} skipped, deadline exhausted", label, index);
                    return BranchOutcome::TimedOut;
                }
                match tokio::time::timeout(remaining, branch).await {
                    Ok(Ok(value)) => BranchOutcome::Completed(value),
                    Ok(Err(message)) => {
                        warn!("{}: branch {} failed: {}", label, index, message);
                        BranchOutcome::Failed(message)
                    }
                    Err(_) => {
                        warn!("{}: branch {} timed out", label, index);
                        BranchOutcome::TimedOut
                    }
                }
            }
        })
        .collect();

    futures::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn results_come_back_in_submission_order() {
        let branches = vec![
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, String>(1)
            }) as std::pin::Pin<Box<dyn Future<Output = Result<i32, String>> + Send>>,
            Box::pin(async { Ok(2) }),
        ];

        let deadline = Instant::now() + Duration::from_secs(1);
        let outcomes = run_with_deadline(branches, deadline, "test").await;
        assert!(matches!(outcomes[0], BranchOutcome::Completed(1)));
        assert!(matches!(outcomes[1], BranchOutcome::Completed(2)));
    }

    #[tokio::test]
    async fn slow_branches_time_out_without_failing_the_scan() {
        let branches = vec![
            Box::pin(async { Ok::<_, String>(1) })
                as std::pin::Pin<Box<dyn Future<Output = Result<i32, String>> + Send>>,
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(2)
            }),
        ];

        let deadline = Instant::now() + Duration::from_millis(50);
        let outcomes = run_with_deadline(branches, deadline, "test").await;
        assert!(matches!(outcomes[0], BranchOutcome::Completed(1)));
        assert!(matches!(outcomes[1], BranchOutcome::TimedOut));
    }
}
