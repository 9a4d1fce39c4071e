//! Workload-level tests: configuration files in, per-template timings out,
//! with the database boundary replaced by synthetic per-instance timings.

use index_bench::benchmark::{accumulate_times, partition_workload, validate_workload};
use index_bench::config::{load_index_plan, load_replicas, load_routes, BenchmarkKind};
use index_bench::rewrite::rewrite;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;

/// A small corpus: 3 templates, uneven instance counts, 2 replicas.
fn sample_corpus() -> (Vec<String>, Vec<usize>, Vec<usize>) {
    let queries = vec![
        "select * from lineitem".to_string(),
        "select * from orders".to_string(),
        "select * from part".to_string(),
        "select * from lineitem where l_tax > 0".to_string(),
        "select * from orders where o_custkey = 7".to_string(),
        "select * from lineitem limit 3".to_string(),
    ];
    let templates = vec![0, 1, 2, 0, 1, 0];
    let routes = vec![0, 1, 0];
    (queries, templates, routes)
}

#[test]
fn end_to_end_aggregation_with_synthetic_timings() {
    let (queries, templates, routes) = sample_corpus();
    let n_templates = validate_workload(&queries, &templates, &routes, 2).unwrap();
    assert_eq!(n_templates, 3);

    let mut order: Vec<usize> = (0..queries.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(7));

    let subs = partition_workload(&order, &templates, &routes, 2);

    // Disjoint partition whose union is the full instance set.
    let mut all: Vec<usize> = subs.concat();
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);

    // Synthetic timing: instance i took i+1 seconds, whichever replica ran it.
    let mut per_template = vec![0.0; n_templates];
    for sub in &subs {
        let times: Vec<f64> = sub.iter().map(|&i| (i + 1) as f64).collect();
        accumulate_times(&mut per_template, sub, &templates, &times);
    }

    // Template 0 owns instances 0, 3, 5; template 1 owns 1, 4; template 2 owns 2.
    assert_eq!(per_template, vec![1.0 + 4.0 + 6.0, 2.0 + 5.0, 3.0]);
    assert!(per_template.iter().all(|&t| t >= 0.0));
    assert_eq!(per_template.len(), n_templates);
}

#[test]
fn seeded_shuffle_gives_reproducible_partitions() {
    let (queries, templates, routes) = sample_corpus();

    let partition_with_seed = |seed: u64| {
        let mut order: Vec<usize> = (0..queries.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        partition_workload(&order, &templates, &routes, 2)
    };

    assert_eq!(partition_with_seed(42), partition_with_seed(42));
}

#[test]
fn config_files_to_validated_workload() {
    let dir = tempfile::tempdir().unwrap();

    let replicas_path = dir.path().join("replicas.csv");
    fs::write(
        &replicas_path,
        "0,10.0.0.1,5432,tpchdb,bench,pw\n1,10.0.0.2,5432,tpchdb,bench,pw\n",
    )
    .unwrap();

    let routes_path = dir.path().join("routes.csv");
    fs::write(&routes_path, "0,1,0\n").unwrap();

    let config_path = dir.path().join("config.csv");
    fs::write(&config_path, "0,l_shipdate\n1,o_orderdate,o_custkey\n").unwrap();

    let replicas = load_replicas(&replicas_path).unwrap();
    let routes = load_routes(&routes_path).unwrap();
    let plan = load_index_plan(&config_path, BenchmarkKind::H, replicas.len()).unwrap();

    assert_eq!(replicas.len(), 2);
    assert_eq!(plan.len(), 2);

    let (queries, templates, _) = sample_corpus();
    assert_eq!(
        validate_workload(&queries, &templates, &routes, replicas.len()).unwrap(),
        3
    );
}

#[test]
fn rewriter_applies_all_text_fixups_together() {
    // A query that needs all three text fixups at once.
    let raw = "select * from (select l_orderkey, 30 days) as d from lineitem);\nlimit -1";
    let rewritten = rewrite(raw);

    assert!(!rewritten.contains(";\nlimit"));
    assert!(!rewritten.contains("limit -1"));
    assert!(rewritten.contains("interval '30 days')"));
}
