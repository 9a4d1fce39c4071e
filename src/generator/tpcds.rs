//! TPC-DS data generation via the TPC `dsdgen`/`dsqgen` tools.

use super::{
    apply_sql_file, connect_all, copy_table_file, files_with_extension, random_tool_seed,
    reset_tables, run_tool, run_tool_to_file, Generator,
};
use crate::replica::Replica;
use crate::rewrite::rewrite;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

/// Number of TPC-DS query templates.
const N_TEMPLATES: usize = 99;

/// Interface to `dsdgen` and `dsqgen`. The TPC-DS tools must already be
/// downloaded into `tools_dir` with a Makefile present; generation
/// recompiles them and produces table data (`.dat`) and one query per
/// template under `data_dir`.
pub struct TpcdsGenerator {
    replicas: Vec<Replica>,
    tools_dir: PathBuf,
    data_dir: PathBuf,
    scale_factor: u32,
}

impl TpcdsGenerator {
    pub fn new(
        replicas: Vec<Replica>,
        tools_dir: PathBuf,
        data_dir: PathBuf,
        scale_factor: u32,
    ) -> Self {
        Self {
            replicas,
            tools_dir,
            data_dir,
            scale_factor,
        }
    }

    async fn create_table_data(&self, rng_seed: &str) -> anyhow::Result<()> {
        debug!("Creating table data for scale factor {}", self.scale_factor);

        let tables_dir = self.data_dir.join("tables").display().to_string();
        // -TERMINATE N drops the trailing delimiter dbgen-style output
        // would otherwise need stripped.
        run_tool(
            "./dsdgen",
            &[
                "-DIR",
                &tables_dir,
                "-SCALE",
                &self.scale_factor.to_string(),
                "-TERMINATE",
                "N",
                "-RNGSEED",
                rng_seed,
            ],
            &self.tools_dir,
        )
        .await?;

        tokio::fs::copy(
            self.tools_dir.join("tpcds.sql"),
            self.data_dir.join("schema/dss.ddl"),
        )
        .await
        .context("Failed to copy tpcds.sql")?;
        tokio::fs::copy(
            self.tools_dir.join("tpcds_ri.sql"),
            self.data_dir.join("schema/schema_keys.sql"),
        )
        .await
        .context("Failed to copy tpcds_ri.sql")?;

        Ok(())
    }

    async fn create_queries(&self, rng_seed: &str) -> anyhow::Result<()> {
        debug!("Creating TPC-DS query data");

        let templates_dir = self
            .tools_dir
            .join("../query_templates")
            .display()
            .to_string();
        let scale = self.scale_factor.to_string();

        for template in 1..=N_TEMPLATES {
            run_tool_to_file(
                "./dsqgen",
                &[
                    "-SCALE",
                    &scale,
                    "-RNGSEED",
                    rng_seed,
                    "-TEMPLATE",
                    &format!("query{template}.tpl"),
                    "-DIALECT",
                    "netezza",
                    "-DIRECTORY",
                    &templates_dir,
                    "-FILTER",
                    "Y",
                ],
                &self.tools_dir,
                &[],
                &self.data_dir.join(format!("queries/{template}.sql")),
            )
            .await
            .with_context(|| format!("Failed to generate query {template}"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Generator for TpcdsGenerator {
    async fn generate(&self, rng_seed: Option<u64>) -> anyhow::Result<()> {
        let rng_seed = rng_seed.unwrap_or_else(random_tool_seed).to_string();

        debug!("Creating data directories under {:?}", self.data_dir);
        for dir in ["tables", "queries", "schema"] {
            tokio::fs::create_dir_all(self.data_dir.join(dir)).await?;
        }

        debug!("Compiling TPC-DS dsdgen at {:?}", self.tools_dir);
        run_tool("make", &[], &self.tools_dir).await?;

        self.create_table_data(&rng_seed).await?;
        self.create_queries(&rng_seed).await?;

        Ok(())
    }

    async fn load_database(&self) -> anyhow::Result<()> {
        let clients = connect_all(&self.replicas).await?;
        let files = files_with_extension(&self.data_dir.join("tables"), "dat")?;
        let tables: Vec<String> = files.iter().map(|(t, _)| t.clone()).collect();

        reset_tables(&clients, &tables).await?;

        info!("Creating the schemas for tables");
        apply_sql_file(&clients, &self.data_dir.join("schema/dss.ddl")).await?;

        for (table, path) in &files {
            info!("Loading data into {table}");
            for (num, client) in clients.iter().enumerate() {
                debug!("Loading to replica {num}");
                copy_table_file(client, table, path).await?;
            }
        }

        info!("Creating primary and foreign keys");
        apply_sql_file(&clients, &self.data_dir.join("schema/schema_keys.sql")).await?;

        Ok(())
    }

    async fn read_data(&self) -> anyhow::Result<(Vec<String>, Vec<usize>)> {
        info!("Reading queries");
        let mut queries = Vec::with_capacity(N_TEMPLATES);
        let mut templates = Vec::with_capacity(N_TEMPLATES);

        for template in 1..=N_TEMPLATES {
            let path = self.data_dir.join(format!("queries/{template}.sql"));
            let query = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read query {path:?}"))?;
            queries.push(rewrite(&query));
            templates.push(template - 1);
        }

        Ok((queries, templates))
    }
}
