//! TPC-H data generation via the TPC `dbgen`/`qgen` tools.

use super::{
    apply_sql_file, connect_all, copy_table_file, files_with_extension, random_tool_seed,
    reset_tables, run_tool, run_tool_to_file, Generator,
};
use crate::replica::Replica;
use crate::rewrite::rewrite;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

/// Number of TPC-H query templates.
const N_TEMPLATES: usize = 22;

/// Interface to `dbgen` and `qgen`. The tools must already be downloaded
/// into `dbgen_dir` with a Makefile present; generation recompiles them and
/// produces table data and one query per template under `data_dir`.
pub struct TpchGenerator {
    replicas: Vec<Replica>,
    dbgen_dir: PathBuf,
    data_dir: PathBuf,
    scale_factor: u32,
    query_templates: Option<PathBuf>,
}

impl TpchGenerator {
    pub fn new(
        replicas: Vec<Replica>,
        dbgen_dir: PathBuf,
        data_dir: PathBuf,
        scale_factor: u32,
    ) -> Self {
        Self {
            replicas,
            dbgen_dir,
            data_dir,
            scale_factor,
            query_templates: None,
        }
    }

    /// Replace the stock templates under `dbgen/queries` with a corrected
    /// set before generating queries. The stock TPC-H templates carry
    /// dialect quirks the rewriter cannot fix alone.
    pub fn with_query_templates(mut self, dir: PathBuf) -> Self {
        self.query_templates = Some(dir);
        self
    }

    async fn install_query_templates(&self, templates: &Path) -> anyhow::Result<()> {
        let target = self.dbgen_dir.join("queries");
        debug!("Installing query templates from {templates:?}");

        for (_, existing) in files_with_extension(&target, "sql")? {
            tokio::fs::remove_file(&existing).await?;
        }
        for (_, template) in files_with_extension(templates, "sql")? {
            let name = template.file_name().context("template has no file name")?;
            tokio::fs::copy(&template, target.join(name)).await?;
        }
        Ok(())
    }

    async fn create_table_data(&self) -> anyhow::Result<()> {
        debug!("Creating table data for scale factor {}", self.scale_factor);
        run_tool(
            "./dbgen",
            &["-s", &self.scale_factor.to_string(), "-vf"],
            &self.dbgen_dir,
        )
        .await?;

        // dbgen writes into its own directory; move the output over.
        for (_, path) in files_with_extension(&self.dbgen_dir, "tbl")? {
            let name = path.file_name().context("table file has no name")?;
            tokio::fs::rename(&path, self.data_dir.join("tables").join(name)).await?;
        }

        tokio::fs::copy(
            self.dbgen_dir.join("dss.ddl"),
            self.data_dir.join("schema/dss.ddl"),
        )
        .await
        .context("Failed to copy dss.ddl")?;
        tokio::fs::copy(
            self.dbgen_dir.join("dss.ri"),
            self.data_dir.join("schema/schema_keys.sql"),
        )
        .await
        .context("Failed to copy dss.ri")?;

        Ok(())
    }

    /// dbgen terminates every record with a trailing `|` that COPY in CSV
    /// mode reads as an extra empty column; strip it in place.
    async fn format_table_data(&self) -> anyhow::Result<()> {
        info!("Correcting table data format for COPY");

        for (table, path) in files_with_extension(&self.data_dir.join("tables"), "tbl")? {
            debug!("Formatting {table}");

            let formatted = path.with_extension("tbl.formatted");
            let reader = BufReader::new(tokio::fs::File::open(&path).await?);
            let mut writer = BufWriter::new(tokio::fs::File::create(&formatted).await?);

            let mut lines = reader.lines();
            while let Some(line) = lines.next_line().await? {
                let trimmed = line.strip_suffix('|').unwrap_or(&line);
                writer.write_all(trimmed.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await?;

            tokio::fs::rename(&formatted, &path).await?;
        }

        Ok(())
    }

    async fn create_queries(&self, rng_seed: u64) -> anyhow::Result<()> {
        debug!("Creating TPC-H query data");
        let dss_query = self.dbgen_dir.join("queries").display().to_string();
        let scale = self.scale_factor.to_string();
        let seed = rng_seed.to_string();

        for template in 1..=N_TEMPLATES {
            run_tool_to_file(
                "./qgen",
                &["-s", &scale, "-r", &seed, &template.to_string()],
                &self.dbgen_dir,
                &[("DSS_QUERY", dss_query.clone())],
                &self.data_dir.join(format!("queries/{template}.sql")),
            )
            .await
            .with_context(|| format!("Failed to generate query {template}"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Generator for TpchGenerator {
    async fn generate(&self, rng_seed: Option<u64>) -> anyhow::Result<()> {
        let rng_seed = rng_seed.unwrap_or_else(random_tool_seed);

        debug!("Creating data directories under {:?}", self.data_dir);
        for dir in ["refresh", "tables", "queries", "schema"] {
            tokio::fs::create_dir_all(self.data_dir.join(dir)).await?;
        }

        if let Some(templates) = self.query_templates.clone() {
            self.install_query_templates(&templates).await?;
        }

        debug!("Compiling TPC-H dbgen at {:?}", self.dbgen_dir);
        run_tool("make", &[], &self.dbgen_dir).await?;

        self.create_table_data().await?;
        self.format_table_data().await?;
        self.create_queries(rng_seed).await?;

        Ok(())
    }

    async fn load_database(&self) -> anyhow::Result<()> {
        let clients = connect_all(&self.replicas).await?;
        let files = files_with_extension(&self.data_dir.join("tables"), "tbl")?;
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
