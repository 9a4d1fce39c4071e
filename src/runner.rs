//! Per-replica workload execution.
//!
//! A [`ReplicaRunner`] owns exactly one replica connection and executes its
//! assigned sub-workload sequentially, timing each statement. Results go
//! back to the orchestrator over a oneshot channel, written once here and
//! read once there; a runner that fails never reports at all, which the
//! orchestrator treats as a run-level failure.

use crate::replica::Replica;
use anyhow::Context;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_postgres::{Client, SimpleQueryMessage};
use tracing::{debug, info};

/// Timing (and optionally plan) results for one replica's sub-workload.
#[derive(Debug, Clone)]
pub struct ReplicaReport {
    /// End-to-start wall time over the whole sub-workload, in seconds.
    pub total: f64,
    /// Per-instance execution times in sub-workload order, in seconds.
    pub times: Vec<f64>,
    /// Per-instance execution plans in sub-workload order, when captured.
    pub plans: Option<Vec<String>>,
}

/// Executes one ordered sub-workload against a single replica.
pub struct ReplicaRunner {
    num: usize,
    replica: Replica,
    queries: Vec<String>,
    templates: Vec<usize>,
    capture_plans: bool,
}

impl ReplicaRunner {
    /// `queries` and `templates` are parallel lists in the order fixed by
    /// the orchestrator's partition; the runner never reorders them.
    pub fn new(
        num: usize,
        replica: Replica,
        queries: Vec<String>,
        templates: Vec<usize>,
        capture_plans: bool,
    ) -> Self {
        Self {
            num,
            replica,
            queries,
            templates,
            capture_plans,
        }
    }

    /// Execute every query in order, timing the `execute` call only, then
    /// report once through `reply`. Any execution error aborts the runner
    /// without reporting; there are no retries and no partial results.
    pub async fn run(self, reply: oneshot::Sender<ReplicaReport>) -> anyhow::Result<()> {
        let client = self.replica.connect().await?;

        let n_queries = self.queries.len();
        let mut times = Vec::with_capacity(n_queries);
        let mut plans = self.capture_plans.then(|| Vec::with_capacity(n_queries));

        let sub_workload_start = Instant::now();

        for (i, query) in self.queries.iter().enumerate() {
            let template = self.templates[i];
            debug!(
                "R{}: execute {}/{}: Q{}",
                self.num,
                i + 1,
                n_queries,
                template + 1
            );

            let start = Instant::now();
            match plans.as_mut() {
                Some(plans) => {
                    let plan = execute_with_plan(&client, query).await.with_context(|| {
                        format!("Q{} failed on replica {}", template + 1, self.num)
                    })?;
                    plans.push(plan);
                }
                None => {
                    client.simple_query(query).await.with_context(|| {
                        format!("Q{} failed on replica {}", template + 1, self.num)
                    })?;
                }
            }
            let elapsed = start.elapsed().as_secs_f64();

            debug!("R{}:Q{}: {:.2}s", self.num, template + 1, elapsed);
            times.push(elapsed);
        }

        let total = sub_workload_start.elapsed().as_secs_f64();
        info!("Replica {} completed in {:.2}s", self.num, total);

        reply
            .send(ReplicaReport {
                total,
                times,
                plans,
            })
            .map_err(|_| {
                anyhow::anyhow!("Result channel for replica {} was dropped", self.num)
            })?;

        Ok(())
    }
}

/// What to do with one `;`-separated sub-statement in plan-capture mode.
#[derive(Debug, PartialEq, Eq)]
enum SubStatement {
    /// View DDL surrounding the measured query; executed as-is.
    ViewDdl,
    /// A SELECT to wrap in EXPLAIN and harvest the plan from.
    Explain,
    /// Whitespace or an empty trailing fragment.
    Skip,
}

fn classify_sub_statement(sub: &str) -> SubStatement {
    let lowered = sub.trim().to_lowercase();
    if lowered.is_empty() {
        SubStatement::Skip
    } else if lowered.contains("create view") || lowered.contains("drop view") {
        SubStatement::ViewDdl
    } else if lowered.contains("select") {
        SubStatement::Explain
    } else {
        SubStatement::Skip
    }
}

/// Execute one (possibly multi-statement) query, capturing the JSON plan of
/// every SELECT sub-statement via `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)`.
/// View DDL is executed directly so the SELECTs it supports still work; it
/// contributes to the statement's measured interval like everything else.
async fn execute_with_plan(client: &Client, statement: &str) -> anyhow::Result<String> {
    let mut plan = String::new();

    for sub in statement.split(';') {
        let sub = sub.trim();
        match classify_sub_statement(sub) {
            SubStatement::Skip => {}
            SubStatement::ViewDdl => {
                client.simple_query(sub).await?;
            }
            SubStatement::Explain => {
                let explain = format!("explain (analyze, buffers, format json) {sub}");
                for message in client.simple_query(&explain).await? {
                    if let SimpleQueryMessage::Row(row) = message {
                        if let Some(fragment) = row.get(0) {
                            plan.push_str(fragment);
                        }
                    }
                }
            }
        }
    }

    Ok(plan)
}
