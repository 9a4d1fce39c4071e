//! Benchmark data generation and bulk loading.
//!
//! Wraps the official TPC generator tools (`dbgen`/`qgen` for TPC-H,
//! `dsdgen`/`dsqgen` for TPC-DS) as opaque external steps. The rest of the
//! system depends only on the three-operation [`Generator`] contract, not
//! on how table or query data is produced.

mod tpcds;
mod tpch;

pub use tpcds::TpcdsGenerator;
pub use tpch::TpchGenerator;

use crate::replica::Replica;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use rand::Rng;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_postgres::Client;
use tracing::{debug, info};

/// Chunk size for streaming table data into COPY.
const TABLE_BLOCK_SIZE: usize = 5_120_000;

/// Producer of benchmark table data and query corpora.
#[async_trait]
pub trait Generator {
    /// Generate table and query data, seeding the tool's RNG with the
    /// provided value. `None` lets the generator pick its own seed.
    async fn generate(&self, rng_seed: Option<u64>) -> anyhow::Result<()>;

    /// Bulk-load the generated table data into every replica and apply the
    /// schema and key constraints.
    async fn load_database(&self) -> anyhow::Result<()>;

    /// Read the generated queries into memory as parallel
    /// `(queries, template_ids)` lists with 0-based template ids.
    async fn read_data(&self) -> anyhow::Result<(Vec<String>, Vec<usize>)>;
}

/// Seed range the TPC tools accept; used when the caller supplies none.
pub(crate) fn random_tool_seed() -> u64 {
    rand::rng().random_range(1_000_000_000..=9_999_999_999)
}

/// Run an external generator tool to completion, inheriting its output.
/// A nonzero exit status is fatal.
pub(crate) async fn run_tool(program: &str, args: &[&str], cwd: &Path) -> anyhow::Result<()> {
    debug!("Running {program} {} in {cwd:?}", args.join(" "));

    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .status()
        .await
        .with_context(|| format!("Failed to spawn {program}"))?;

    anyhow::ensure!(status.success(), "{program} exited with {status}");
    Ok(())
}

/// Run a query-generator tool and write its stdout to `outfile`.
pub(crate) async fn run_tool_to_file(
    program: &str,
    args: &[&str],
    cwd: &Path,
    envs: &[(&str, String)],
    outfile: &Path,
) -> anyhow::Result<()> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .stdout(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to spawn {program}"))?;

    anyhow::ensure!(output.status.success(), "{program} exited with {}", output.status);

    tokio::fs::write(outfile, &output.stdout)
        .await
        .with_context(|| format!("Failed to write query to {outfile:?}"))?;
    Ok(())
}

/// Drop the listed tables on every replica so the load starts clean.
pub(crate) async fn reset_tables(clients: &[Client], tables: &[String]) -> anyhow::Result<()> {
    debug!("Dropping existing tables: {tables:?}");
    for client in clients {
        for table in tables {
            client
                .simple_query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
                .await
                .with_context(|| format!("Failed to drop table {table}"))?;
        }
    }
    Ok(())
}

/// Execute a multi-statement DDL file on every replica.
pub(crate) async fn apply_sql_file(clients: &[Client], path: &Path) -> anyhow::Result<()> {
    let sql = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {path:?}"))?;
    for client in clients {
        client
            .batch_execute(&sql)
            .await
            .with_context(|| format!("Failed to apply {path:?}"))?;
    }
    Ok(())
}

/// Stream one generated table file into a replica via COPY.
pub(crate) async fn copy_table_file(
    client: &Client,
    table: &str,
    path: &Path,
) -> anyhow::Result<()> {
    let statement = format!("COPY {table} FROM STDIN (format csv, delimiter '|')");
    let sink = client
        .copy_in::<_, Bytes>(&statement)
        .await
        .with_context(|| format!("Failed to start COPY into {table}"))?;
    futures::pin_mut!(sink);

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open table data {path:?}"))?;
    let mut buf = vec![0u8; TABLE_BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.send(Bytes::copy_from_slice(&buf[..n])).await?;
    }

    let rows = sink.finish().await?;
    info!("Loaded {rows} rows into {table}");
    Ok(())
}

/// Open one connection per replica, failing fast on the first error.
pub(crate) async fn connect_all(replicas: &[Replica]) -> anyhow::Result<Vec<Client>> {
    let mut clients = Vec::with_capacity(replicas.len());
    for replica in replicas {
        clients.push(replica.connect().await?);
    }
    Ok(clients)
}

/// Collect `(table_name, path)` pairs for every generated table file with
/// the given extension, in deterministic name order.
pub(crate) fn files_with_extension(
    dir: &Path,
    extension: &str,
) -> anyhow::Result<Vec<(String, std::path::PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {dir:?}"))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path));
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_random_tool_seed_in_tool_range() {
        for _ in 0..100 {
            let seed = random_tool_seed();
            assert!((1_000_000_000..=9_999_999_999).contains(&seed));
        }
    }

    #[test]
    fn test_files_with_extension_filters_and_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lineitem.tbl"), "x").unwrap();
        fs::write(dir.path().join("orders.tbl"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = files_with_extension(dir.path(), "tbl").unwrap();
        let names: Vec<&str> = files.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["lineitem", "orders"]);
    }
}
