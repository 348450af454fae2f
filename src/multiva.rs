//! Multi-perspective aggregator (spec §4.6): fans the same validation out to
//! N remote VAs and applies a quorum threshold to the primary's own verdict.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::error::Problem;

/// One remote VA perspective. A trait so tests substitute canned verdicts;
/// the real implementation would be a gRPC client, out of scope here (spec
/// §1's "RPC transport" exclusion).
#[async_trait]
pub trait RemoteVa: Send + Sync {
    fn hostname(&self) -> &str;
    async fn validate(&self) -> Result<(), Problem>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    QuorumEarly,
    FullResults,
}

struct RemoteOutcome {
    hostname: String,
    problem: Option<Problem>,
}

/// Runs the remote fan-out and applies the quorum threshold from spec §4.6.
///
/// `max_failures` is the number of remote perspectives allowed to disagree
/// with the primary before the overall validation fails. Cancelled RPCs
/// (remotes still pending when quorum is reached in `QuorumEarly` mode) are
/// counted as internal failures but never logged individually.
pub async fn run(
    remotes: &[Arc<dyn RemoteVa>],
    mode: AggregationMode,
    max_failures: u32,
    primary_result: &Result<(), Problem>,
) -> Result<(), Problem> {
    if remotes.is_empty() {
        return Ok(());
    }

    let mut order: Vec<usize> = (0..remotes.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    let (tx, mut rx) = tokio::sync::mpsc::channel::<RemoteOutcome>(remotes.len());
    for &i in &order {
        let remote = remotes[i].clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let problem = remote.validate().await.err();
            let _ = tx
                .send(RemoteOutcome {
                    hostname: remote.hostname().to_string(),
                    problem,
                })
                .await;
        });
    }
    drop(tx);

    match mode {
        AggregationMode::QuorumEarly => {
            run_quorum_early(&mut rx, remotes.len(), max_failures).await
        }
        AggregationMode::FullResults => {
            run_full_results(&mut rx, remotes.len(), max_failures, primary_result).await
        }
    }
}

async fn run_quorum_early(
    rx: &mut tokio::sync::mpsc::Receiver<RemoteOutcome>,
    total: usize,
    max_failures: u32,
) -> Result<(), Problem> {
    let mut good = 0u32;
    let mut bad = 0u32;
    let mut first_failure: Option<Problem> = None;
    let required_good = u32::try_from(total).unwrap_or(u32::MAX) - max_failures;

    for _ in 0..total {
        let Some(outcome) = rx.recv().await else {
            break;
        };
        match outcome.problem {
            None => good += 1,
            Some(problem) => {
                bad += 1;
                if first_failure.is_none() {
                    first_failure = Some(problem);
                }
            }
        }
        if good >= required_good {
            // remaining remotes are abandoned: their tasks may still run to
            // completion, but we stop waiting on them.
            return Ok(());
        }
        if bad > max_failures {
            let problem = first_failure.expect("bad > 0 implies a recorded failure");
            return Err(Problem::unauthorized(format!(
                "During secondary validation: {}",
                problem.detail
            )));
        }
    }

    Ok(())
}

async fn run_full_results(
    rx: &mut tokio::sync::mpsc::Receiver<RemoteOutcome>,
    total: usize,
    max_failures: u32,
    primary_result: &Result<(), Problem>,
) -> Result<(), Problem> {
    let mut outcomes = Vec::with_capacity(total);
    for _ in 0..total {
        let Some(outcome) = rx.recv().await else {
            break;
        };
        outcomes.push(outcome);
    }

    let bad: Vec<&RemoteOutcome> = outcomes.iter().filter(|o| o.problem.is_some()).collect();
    for outcome in &outcomes {
        let remote_agrees = outcome.problem.is_none() == primary_result.is_ok();
        if !remote_agrees {
            tracing::warn!(
                remote = %outcome.hostname,
                primary_ok = primary_result.is_ok(),
                remote_ok = outcome.problem.is_none(),
                "multi-perspective validation disagreement"
            );
        }
    }

    if u32::try_from(bad.len()).unwrap_or(u32::MAX) > max_failures {
        let problem = bad[0]
            .problem
            .clone()
            .expect("filtered on problem.is_some()");
        return Err(Problem::unauthorized(format!(
            "During secondary validation: {}",
            problem.detail
        )));
    }
    Ok(())
}
