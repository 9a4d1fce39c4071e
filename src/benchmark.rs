//! Workload orchestration.
//!
//! [`Benchmark`] owns one connection per replica for index DDL, partitions
//! the shuffled query corpus into per-replica sub-workloads via the routing
//! table, runs one [`ReplicaRunner`] per replica concurrently, and
//! aggregates the reported timings into a per-template vector. The only
//! synchronization point is the join barrier after spawning the runners:
//! sub-workloads are disjoint and connections are never shared, so no locks
//! are involved anywhere.

use crate::config::{ConfigError, IndexPlan};
use crate::replica::Replica;
use crate::runner::{ReplicaReport, ReplicaRunner};
use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_postgres::Client;
use tracing::{debug, info, warn};

/// Orchestrator options.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkOptions {
    /// Create the candidate indexes at construction time. Skipping this is
    /// surfaced as a warning, not an error; the run then measures the
    /// cluster as it stands.
    pub create_indexes: bool,
    /// Capture an `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)` plan for every
    /// query instance.
    pub capture_plans: bool,
    /// Seed for the workload shuffle. `None` draws from entropy; passing a
    /// value makes the run order reproducible.
    pub shuffle_seed: Option<u64>,
}

/// The outcome of one benchmark run. Immutable once returned.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// End-to-end wall time across all replicas running concurrently. This
    /// models observed cluster latency, which is less than the sum of the
    /// per-replica runtimes whenever the replicas overlap.
    pub total_elapsed: Duration,
    /// Slot `t` holds the sum of execution times of every instance of
    /// template `t`, in seconds.
    pub per_template_times: Vec<f64>,
    /// Per-instance plans in corpus order, when plan capture was on.
    pub plans: Option<Vec<String>>,
}

/// Benchmarks the performance of a candidate index configuration by timing
/// every query in the workload against the replica that owns its template.
pub struct Benchmark {
    queries: Vec<String>,
    templates: Vec<usize>,
    replicas: Vec<Replica>,
    clients: Vec<Client>,
    routes: Vec<usize>,
    plan: IndexPlan,
    n_templates: usize,
    options: BenchmarkOptions,
}

impl Benchmark {
    /// Validate the corpus against the routing table, connect to every
    /// replica, and (unless skipped) create the candidate indexes.
    ///
    /// Configuration problems are reported before any connection is opened;
    /// connection and DDL failures are fatal with no retry.
    pub async fn new(
        queries: Vec<String>,
        templates: Vec<usize>,
        replicas: Vec<Replica>,
        routes: Vec<usize>,
        plan: IndexPlan,
        options: BenchmarkOptions,
    ) -> anyhow::Result<Self> {
        let n_templates = validate_workload(&queries, &templates, &routes, replicas.len())?;

        let mut clients = Vec::with_capacity(replicas.len());
        for replica in &replicas {
            clients.push(replica.connect().await?);
        }

        let benchmark = Self {
            queries,
            templates,
            replicas,
            clients,
            routes,
            plan,
            n_templates,
            options,
        };

        if benchmark.options.create_indexes {
            benchmark.create_indexes().await?;
        } else {
            warn!("Skipping index creation; benchmarking the cluster as-is");
        }

        Ok(benchmark)
    }

    /// Issue one `CREATE INDEX` per plan entry against the owning replica.
    /// The counter runs across the whole plan so names are globally unique.
    async fn create_indexes(&self) -> anyhow::Result<()> {
        info!("Creating indexes");

        for (name, (replica, spec)) in index_names(&self.plan) {
            let statement = format!(
                "CREATE INDEX {name} ON {} ({})",
                spec.table,
                spec.columns.join(", ")
            );
            debug!("Replica {replica}: {statement}");
            self.clients[replica]
                .simple_query(&statement)
                .await
                .with_context(|| format!("Failed to create {name} on replica {replica}"))?;
        }

        info!("Created {} indexes", self.plan.len());
        Ok(())
    }

    /// Drop every index created from the plan, by the same deterministic
    /// names. Only call this if the indexes were actually created.
    pub async fn destroy_indexes(&self) -> anyhow::Result<()> {
        info!("Dropping indexes");

        for (name, (replica, _)) in index_names(&self.plan) {
            self.clients[replica]
                .simple_query(&format!("DROP INDEX {name}"))
                .await
                .with_context(|| format!("Failed to drop {name} on replica {replica}"))?;
        }

        Ok(())
    }

    /// Run the whole workload once.
    ///
    /// Shuffles the corpus, partitions it per replica, runs all replicas
    /// concurrently, and aggregates per-template times after every runner
    /// has finished. A replica that aborts without reporting fails the run.
    pub async fn run(&mut self) -> anyhow::Result<RunResult> {
        let mut order: Vec<usize> = (0..self.queries.len()).collect();
        match self.options.shuffle_seed {
            Some(seed) => order.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => order.shuffle(&mut rand::rng()),
        }

        let sub_workloads = partition_workload(
            &order,
            &self.templates,
            &self.routes,
            self.replicas.len(),
        );

        let mut handles = Vec::with_capacity(self.replicas.len());
        let mut receivers = Vec::with_capacity(self.replicas.len());

        let start = Instant::now();

        for (num, instances) in sub_workloads.iter().enumerate() {
            debug!("Replica {num}: {} queries assigned", instances.len());

            let runner = ReplicaRunner::new(
                num,
                self.replicas[num].clone(),
                instances.iter().map(|&i| self.queries[i].clone()).collect(),
                instances.iter().map(|&i| self.templates[i]).collect(),
                self.options.capture_plans,
            );

            let (tx, rx) = oneshot::channel();
            handles.push(tokio::spawn(runner.run(tx)));
            receivers.push(rx);
        }

        // Join barrier: every runner must terminate before any result is
        // read or the clock is stopped.
        join_barrier(handles).await?;

        let total_elapsed = start.elapsed();

        let mut per_template_times = vec![0.0; self.n_templates];
        let mut plans = self
            .options
            .capture_plans
            .then(|| vec![String::new(); self.queries.len()]);

        for (num, rx) in receivers.into_iter().enumerate() {
            let report = collect_report(num, rx)?;

            debug!("Replica {num} sub-workload took {:.2}s", report.total);
            accumulate_times(
                &mut per_template_times,
                &sub_workloads[num],
                &self.templates,
                &report.times,
            );

            if let (Some(all_plans), Some(replica_plans)) = (plans.as_mut(), report.plans) {
                for (&instance, plan) in sub_workloads[num].iter().zip(replica_plans) {
                    all_plans[instance] = plan;
                }
            }
        }

        info!(
            "All queries completed in {:.2}s",
            total_elapsed.as_secs_f64()
        );

        Ok(RunResult {
            total_elapsed,
            per_template_times,
            plans,
        })
    }
}

/// Block until every runner task has terminated, surfacing the first
/// failure. A runner that errored or panicked fails the whole run; its
/// missing report is never treated as zero time.
async fn join_barrier(
    handles: Vec<tokio::task::JoinHandle<anyhow::Result<()>>>,
) -> anyhow::Result<()> {
    for (num, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .with_context(|| format!("Replica {num} runner panicked"))??;
    }
    Ok(())
}

/// Read one replica's report off its channel after the barrier. The runner
/// sends exactly once on success; a dropped sender means it aborted without
/// reporting, which fails the run rather than counting as zero time.
fn collect_report(
    num: usize,
    mut rx: oneshot::Receiver<ReplicaReport>,
) -> anyhow::Result<ReplicaReport> {
    rx.try_recv()
        .map_err(|_| anyhow::anyhow!("Replica {num} terminated without reporting results"))
}

/// Check the corpus/routing invariants: parallel corpus lists, dense
/// 0-based template ids, a routing entry for every template, and every
/// route within the replica range. Returns the distinct-template count.
pub fn validate_workload(
    queries: &[String],
    templates: &[usize],
    routes: &[usize],
    n_replicas: usize,
) -> Result<usize, ConfigError> {
    if queries.len() != templates.len() {
        return Err(ConfigError::CorpusShapeMismatch {
            queries: queries.len(),
            templates: templates.len(),
        });
    }

    let n_templates = templates.iter().copied().max().map_or(0, |max| max + 1);

    let mut seen = vec![false; n_templates];
    for &t in templates {
        seen[t] = true;
    }
    if let Some(missing) = seen.iter().position(|&s| !s) {
        return Err(ConfigError::MissingTemplate(missing));
    }

    for template in 0..n_templates {
        match routes.get(template) {
            None => return Err(ConfigError::UnroutedTemplate(template)),
            Some(&replica) if replica >= n_replicas => {
                return Err(ConfigError::RouteOutOfRange {
                    template,
                    replica,
                    n_replicas,
                });
            }
            Some(_) => {}
        }
    }

    Ok(n_templates)
}

/// Stable-partition shuffled instance indices into one ordered sub-workload
/// per replica. Each instance lands on exactly one replica, so the
/// sub-workloads are pairwise disjoint and union back to `order`.
pub fn partition_workload(
    order: &[usize],
    templates: &[usize],
    routes: &[usize],
    n_replicas: usize,
) -> Vec<Vec<usize>> {
    let mut sub_workloads = vec![Vec::new(); n_replicas];
    for &instance in order {
        sub_workloads[routes[templates[instance]]].push(instance);
    }
    sub_workloads
}

/// Add each reported per-instance time into its template's slot. Instances
/// of the same template accumulate; routing is a total function, so only
/// one replica ever contributes to a given slot.
pub fn accumulate_times(
    per_template_times: &mut [f64],
    instances: &[usize],
    templates: &[usize],
    times: &[f64],
) {
    debug_assert_eq!(instances.len(), times.len());
    for (&instance, &time) in instances.iter().zip(times) {
        per_template_times[templates[instance]] += time;
    }
}

/// Deterministic `idx_N` names for every plan entry, in plan order. Both
/// index creation and destruction derive their statements from this, which
/// is what keeps the two in lockstep.
fn index_names(
    plan: &IndexPlan,
) -> impl Iterator<Item = (String, (usize, &crate::config::IndexSpec))> + '_ {
    plan.iter()
        .enumerate()
        .map(|(i, entry)| (format!("idx_{}", i + 1), entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexPlan, IndexSpec};

    #[test]
    fn test_partition_is_stable_and_disjoint() {
        // Templates: q0->t0, q1->t1, q2->t0, q3->t2, q4->t1
        let templates = vec![0, 1, 0, 2, 1];
        // Routing: t0->r0, t1->r1, t2->r0
        let routes = vec![0, 1, 0];
        let order = vec![4, 2, 0, 3, 1];

        let subs = partition_workload(&order, &templates, &routes, 2);

        // Shuffled relative order preserved within each sub-workload.
        assert_eq!(subs[0], vec![2, 0, 3]);
        assert_eq!(subs[1], vec![4, 1]);

        // Union is exactly the instance set.
        let mut all: Vec<usize> = subs.concat();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_accumulate_sums_per_template() {
        let templates = vec![0, 1, 0, 2];
        let mut per_template = vec![0.0; 3];

        accumulate_times(&mut per_template, &[0, 2], &templates, &[1.5, 2.5]);
        accumulate_times(&mut per_template, &[1, 3], &templates, &[0.25, 4.0]);

        assert_eq!(per_template, vec![4.0, 0.25, 4.0]);
    }

    #[test]
    fn test_validate_accepts_dense_routed_corpus() {
        let queries = vec!["q".to_string(); 4];
        let templates = vec![1, 0, 2, 1];
        let routes = vec![0, 1, 0];

        assert_eq!(validate_workload(&queries, &templates, &routes, 2).unwrap(), 3);
    }

    #[test]
    fn test_validate_rejects_routing_gap() {
        let queries = vec!["q".to_string(); 3];
        let templates = vec![0, 1, 2];
        let routes = vec![0, 1];

        assert!(matches!(
            validate_workload(&queries, &templates, &routes, 2),
            Err(ConfigError::UnroutedTemplate(2))
        ));
    }

    #[test]
    fn test_validate_rejects_sparse_template_ids() {
        let queries = vec!["q".to_string(); 2];
        let templates = vec![0, 2];
        let routes = vec![0, 0, 0];

        assert!(matches!(
            validate_workload(&queries, &templates, &routes, 1),
            Err(ConfigError::MissingTemplate(1))
        ));
    }

    #[test]
    fn test_validate_rejects_route_to_unknown_replica() {
        let queries = vec!["q".to_string()];
        let templates = vec![0];
        let routes = vec![7];

        assert!(matches!(
            validate_workload(&queries, &templates, &routes, 2),
            Err(ConfigError::RouteOutOfRange { replica: 7, .. })
        ));
    }

    #[test]
    fn test_index_names_sequential_across_replicas() {
        let mut plan = IndexPlan::new(2);
        plan.push(
            0,
            IndexSpec {
                table: "LINEITEM".to_string(),
                columns: vec!["l_shipdate".to_string()],
            },
        );
        plan.push(
            1,
            IndexSpec {
                table: "ORDERS".to_string(),
                columns: vec!["o_orderdate".to_string()],
            },
        );
        plan.push(
            0,
            IndexSpec {
                table: "PARTSUPP".to_string(),
                columns: vec!["ps_suppkey".to_string()],
            },
        );

        let names: Vec<(String, usize)> = index_names(&plan)
            .map(|(name, (replica, _))| (name, replica))
            .collect();

        assert_eq!(
            names,
            vec![
                ("idx_1".to_string(), 0),
                ("idx_2".to_string(), 0),
                ("idx_3".to_string(), 1),
            ]
        );
    }

    // The join barrier waits for every runner, so elapsed wall time tracks
    // the slowest replica rather than the sum of all of them.
    #[tokio::test]
    async fn test_concurrent_wall_time_is_max_not_sum() {
        async fn pretend_runner(millis: u64) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(())
        }

        let start = Instant::now();
        join_barrier(vec![
            tokio::spawn(pretend_runner(250)),
            tokio::spawn(pretend_runner(150)),
        ])
        .await
        .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250));
        // Generous scheduling tolerance, but well below the 400ms sum.
        assert!(elapsed < Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_failed_runner_fails_the_barrier() {
        let ok = tokio::spawn(async { Ok(()) });
        let failed =
            tokio::spawn(async { Err(anyhow::anyhow!("connection reset by peer")) });

        assert!(join_barrier(vec![ok, failed]).await.is_err());
    }

    #[tokio::test]
    async fn test_collect_report_after_barrier() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        tx.send(ReplicaReport {
            total: 3.5,
            times: vec![1.5, 2.0],
            plans: None,
        })
        .unwrap();

        let report = collect_report(0, rx).unwrap();
        assert_eq!(report.times, vec![1.5, 2.0]);
    }

    // An aborted runner drops its sender without reporting; the receiver
    // side must turn that into an error, not a zero-time report.
    #[tokio::test]
    async fn test_dropped_sender_is_not_a_silent_zero() {
        let (tx, rx) = tokio::sync::oneshot::channel::<ReplicaReport>();
        drop(tx);

        let error = collect_report(1, rx).unwrap_err();
        assert!(error.to_string().contains("Replica 1"));
    }
}
