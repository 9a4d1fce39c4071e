//! index-bench library
//!
//! Empirically scores a candidate physical-index configuration against a
//! horizontally-partitioned PostgreSQL cluster by replaying a TPC-H or
//! TPC-DS analytical workload and measuring execution latency.
//!
//! # How a run works
//!
//! - Templates are routed to replicas by a static routing table; the
//!   corpus is shuffled and stable-partitioned into one sub-workload per
//!   replica
//! - One runner per replica executes its sub-workload sequentially over
//!   its own connection, all replicas in parallel
//! - Per-query times are summed per template; total runtime is the
//!   end-to-end wall time across the concurrent replicas
//!
//! # CLI Usage
//!
//! ```bash
//! # Generate TPC-H data, load it, and benchmark an index configuration
//! index-bench h all --scale-factor 10 \
//!   --replicas replicas.csv --routing-table routes.csv \
//!   --index-config config.csv
//!
//! # Re-run the benchmark against pregenerated test-set queries
//! index-bench h run --copy-test-set --copy-source /data/test-set \
//!   --rng-seed 42
//! ```

pub mod benchmark;
pub mod config;
pub mod generator;
pub mod loader;
pub mod replica;
pub mod rewrite;
pub mod runner;

pub use benchmark::{Benchmark, BenchmarkOptions, RunResult};
pub use config::{BenchmarkKind, ConfigError, IndexPlan, IndexSpec};
pub use generator::{Generator, TpcdsGenerator, TpchGenerator};
pub use replica::Replica;
