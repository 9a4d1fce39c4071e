//! Benchmark configuration loading.
//!
//! All run inputs are small delimited text files: replica connection
//! details, the template-to-replica routing table, the candidate index
//! plan, and the optional training-partition template list. Everything is
//! parsed into fixed-shape structs and validated here, before any database
//! connection is opened.

use crate::replica::Replica;
use clap::ValueEnum;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed replica record on line {line}: {reason}")]
    MalformedReplica { line: usize, reason: String },

    #[error("Malformed routing table entry '{0}'")]
    MalformedRoute(String),

    #[error("Malformed index plan entry on line {line}: {reason}")]
    MalformedIndex { line: usize, reason: String },

    #[error("No {benchmark} table matches column prefix of '{column}'")]
    UnknownColumnPrefix {
        benchmark: BenchmarkKind,
        column: String,
    },

    #[error("Index plan routes to replica {index} but only {n_replicas} replicas are configured")]
    ReplicaOutOfRange { index: usize, n_replicas: usize },

    #[error("Malformed template number '{0}' in partial template list")]
    MalformedTemplate(String),

    #[error("Corpus contains no instance of template {0}; template ids must be dense")]
    MissingTemplate(usize),

    #[error("Routing table has no entry for template {0}")]
    UnroutedTemplate(usize),

    #[error(
        "Template {template} routes to replica {replica} but only {n_replicas} replicas are configured"
    )]
    RouteOutOfRange {
        template: usize,
        replica: usize,
        n_replicas: usize,
    },

    #[error("Corpus has {queries} queries but {templates} template tags")]
    CorpusShapeMismatch { queries: usize, templates: usize },
}

/// Which TPC benchmark the workload comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BenchmarkKind {
    /// TPC-H (22 query templates)
    H,
    /// TPC-DS (99 query templates)
    Ds,
}

impl BenchmarkKind {
    /// Number of query templates in this benchmark.
    pub fn template_count(&self) -> usize {
        match self {
            BenchmarkKind::H => 22,
            BenchmarkKind::Ds => 99,
        }
    }

    /// Resolve the owning table of a column from the benchmark's column
    /// naming convention (the prefix before the first underscore).
    pub fn table_for_column(&self, column: &str) -> Result<&'static str, ConfigError> {
        let prefix = column.split('_').next().unwrap_or("");

        let table = match self {
            BenchmarkKind::H => match prefix {
                "l" => "LINEITEM",
                "p" => "PART",
                "ps" => "PARTSUPP",
                "o" => "ORDERS",
                "c" => "CUSTOMER",
                "n" => "NATION",
                "r" => "REGION",
                "s" => "SUPPLIER",
                _ => {
                    return Err(ConfigError::UnknownColumnPrefix {
                        benchmark: *self,
                        column: column.to_string(),
                    })
                }
            },
            BenchmarkKind::Ds => match prefix {
                "ss" => "STORE_SALES",
                "sr" => "STORE_RETURNS",
                "cs" => "CATALOG_SALES",
                "cr" => "CATALOG_RETURNS",
                "ws" => "WEB_SALES",
                "wr" => "WEB_RETURNS",
                "inv" => "INVENTORY",
                "s" => "STORE",
                "cc" => "CALL_CENTER",
                "cp" => "CATALOG_PAGE",
                "web" => "WEB_SITE",
                "wp" => "WEB_PAGE",
                "w" => "WAREHOUSE",
                "c" => "CUSTOMER",
                "ca" => "CUSTOMER_ADDRESS",
                "cd" => "CUSTOMER_DEMOGRAPHICS",
                "d" => "DATE_DIM",
                "hd" => "HOUSEHOLD_DEMOGRAPHICS",
                "i" => "ITEM",
                "ib" => "INCOME_BAND",
                "p" => "PROMOTION",
                "r" => "REASON",
                "sm" => "SHIP_MODE",
                "t" => "TIME_DIM",
                "dv" => "DSDGEN_VERSION",
                _ => {
                    return Err(ConfigError::UnknownColumnPrefix {
                        benchmark: *self,
                        column: column.to_string(),
                    })
                }
            },
        };

        Ok(table)
    }
}

impl std::fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchmarkKind::H => write!(f, "TPC-H"),
            BenchmarkKind::Ds => write!(f, "TPC-DS"),
        }
    }
}

/// One candidate index: the table it lives on and its ordered column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub table: String,
    pub columns: Vec<String>,
}

/// Per-replica lists of candidate indexes.
///
/// Iteration order is replica-major and stable, which is what makes the
/// sequential `idx_N` naming deterministic between creation and drop.
#[derive(Debug, Clone, Default)]
pub struct IndexPlan {
    per_replica: Vec<Vec<IndexSpec>>,
}

impl IndexPlan {
    pub fn new(n_replicas: usize) -> Self {
        Self {
            per_replica: vec![Vec::new(); n_replicas],
        }
    }

    pub fn push(&mut self, replica: usize, spec: IndexSpec) {
        self.per_replica[replica].push(spec);
    }

    /// Total number of indexes across all replicas.
    pub fn len(&self) -> usize {
        self.per_replica.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate `(replica_index, spec)` pairs in plan order: all of replica
    /// 0's indexes, then replica 1's, and so on.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &IndexSpec)> {
        self.per_replica
            .iter()
            .enumerate()
            .flat_map(|(replica, specs)| specs.iter().map(move |spec| (replica, spec)))
    }
}

/// Load replica connection descriptors, one
/// `id,hostname,port,dbname,user,password` record per line.
pub fn load_replicas(path: &Path) -> Result<Vec<Replica>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let mut replicas = Vec::new();

    for (num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(ConfigError::MalformedReplica {
                line: num + 1,
                reason: format!("expected 6 fields, found {}", fields.len()),
            });
        }

        let port = fields[2]
            .parse::<u16>()
            .map_err(|_| ConfigError::MalformedReplica {
                line: num + 1,
                reason: format!("invalid port '{}'", fields[2]),
            })?;

        replicas.push(Replica {
            id: fields[0].to_string(),
            hostname: fields[1].to_string(),
            port,
            dbname: fields[3].to_string(),
            user: fields[4].to_string(),
            password: fields[5].to_string(),
        });
    }

    debug!("Loaded {} replicas from {path:?}", replicas.len());
    Ok(replicas)
}

/// Load the routing table: one line of comma-separated replica indices,
/// where position is the 0-based template id.
pub fn load_routes(path: &Path) -> Result<Vec<usize>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let line = contents.lines().next().unwrap_or("").trim();

    line.split(',')
        .map(|entry| {
            let entry = entry.trim();
            entry
                .parse::<usize>()
                .map_err(|_| ConfigError::MalformedRoute(entry.to_string()))
        })
        .collect()
}

/// Load the candidate index plan: one index per line as
/// `replica_index,column_1,column_2,…`. The owning table is derived from
/// the first column's prefix, so it never appears in the file.
pub fn load_index_plan(
    path: &Path,
    benchmark: BenchmarkKind,
    n_replicas: usize,
) -> Result<IndexPlan, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let mut plan = IndexPlan::new(n_replicas);

    for (num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 2 {
            return Err(ConfigError::MalformedIndex {
                line: num + 1,
                reason: "expected a replica index and at least one column".to_string(),
            });
        }

        let replica = fields[0]
            .parse::<usize>()
            .map_err(|_| ConfigError::MalformedIndex {
                line: num + 1,
                reason: format!("invalid replica index '{}'", fields[0]),
            })?;
        if replica >= n_replicas {
            return Err(ConfigError::ReplicaOutOfRange {
                index: replica,
                n_replicas,
            });
        }

        let table = benchmark.table_for_column(fields[1])?.to_string();
        let columns = fields[1..].iter().map(|c| c.to_string()).collect();

        plan.push(replica, IndexSpec { table, columns });
    }

    debug!("Loaded index plan with {} entries from {path:?}", plan.len());
    Ok(plan)
}

/// Load the optional training-partition template list: one line of
/// comma-separated 1-based template numbers. A missing file is an empty
/// set, not an error.
pub fn load_partial_templates(path: &Path) -> Result<Vec<usize>, ConfigError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)?;
    let line = contents.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    line.split(',')
        .map(|entry| {
            let entry = entry.trim();
            entry
                .parse::<usize>()
                .ok()
                .filter(|&t| t >= 1)
                .map(|t| t - 1)
                .ok_or_else(|| ConfigError::MalformedTemplate(entry.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_replicas() {
        let file = write_file(
            "0,10.0.0.1,5432,tpchdb,bench,pw1\n\
             1,10.0.0.2,5433,tpchdb,bench,pw2\n",
        );

        let replicas = load_replicas(file.path()).unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0].hostname, "10.0.0.1");
        assert_eq!(replicas[1].port, 5433);
        assert_eq!(replicas[1].password, "pw2");
    }

    #[test]
    fn test_load_replicas_rejects_bad_port() {
        let file = write_file("0,localhost,notaport,db,user,pw\n");
        assert!(matches!(
            load_replicas(file.path()),
            Err(ConfigError::MalformedReplica { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_replicas_rejects_short_record() {
        let file = write_file("0,localhost,5432,db\n");
        assert!(matches!(
            load_replicas(file.path()),
            Err(ConfigError::MalformedReplica { .. })
        ));
    }

    #[test]
    fn test_load_routes() {
        let file = write_file("0,1,1,0,2\n");
        assert_eq!(load_routes(file.path()).unwrap(), vec![0, 1, 1, 0, 2]);
    }

    #[test]
    fn test_load_routes_rejects_garbage() {
        let file = write_file("0,one,2\n");
        assert!(matches!(
            load_routes(file.path()),
            Err(ConfigError::MalformedRoute(_))
        ));
    }

    #[test]
    fn test_tpch_prefix_lookup() {
        assert_eq!(
            BenchmarkKind::H.table_for_column("ps_suppkey").unwrap(),
            "PARTSUPP"
        );
        assert_eq!(
            BenchmarkKind::H.table_for_column("l_shipdate").unwrap(),
            "LINEITEM"
        );
        assert!(BenchmarkKind::H.table_for_column("zz_nope").is_err());
    }

    #[test]
    fn test_tpcds_prefix_lookup() {
        assert_eq!(
            BenchmarkKind::Ds.table_for_column("ss_sold_date_sk").unwrap(),
            "STORE_SALES"
        );
        assert_eq!(
            BenchmarkKind::Ds.table_for_column("inv_quantity_on_hand").unwrap(),
            "INVENTORY"
        );
        assert!(BenchmarkKind::Ds.table_for_column("xx_unknown").is_err());
    }

    #[test]
    fn test_load_index_plan_groups_by_replica() {
        let file = write_file(
            "0,l_shipdate,l_discount\n\
             1,o_orderdate\n\
             0,ps_suppkey\n",
        );

        let plan = load_index_plan(file.path(), BenchmarkKind::H, 2).unwrap();
        assert_eq!(plan.len(), 3);

        let entries: Vec<_> = plan.iter().collect();
        // Replica-major order: both replica-0 entries first.
        assert_eq!(entries[0].0, 0);
        assert_eq!(entries[0].1.table, "LINEITEM");
        assert_eq!(entries[0].1.columns, vec!["l_shipdate", "l_discount"]);
        assert_eq!(entries[1].0, 0);
        assert_eq!(entries[1].1.table, "PARTSUPP");
        assert_eq!(entries[2].0, 1);
        assert_eq!(entries[2].1.table, "ORDERS");
    }

    #[test]
    fn test_load_index_plan_rejects_out_of_range_replica() {
        let file = write_file("5,l_shipdate\n");
        assert!(matches!(
            load_index_plan(file.path(), BenchmarkKind::H, 2),
            Err(ConfigError::ReplicaOutOfRange {
                index: 5,
                n_replicas: 2
            })
        ));
    }

    #[test]
    fn test_load_partial_templates_one_based() {
        let file = write_file("1,5,22\n");
        assert_eq!(load_partial_templates(file.path()).unwrap(), vec![0, 4, 21]);
    }

    #[test]
    fn test_load_partial_templates_missing_file_is_empty() {
        let path = std::env::temp_dir().join("index-bench-no-such-partial.csv");
        assert_eq!(load_partial_templates(&path).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_load_partial_templates_rejects_zero() {
        let file = write_file("0,3\n");
        assert!(matches!(
            load_partial_templates(file.path()),
            Err(ConfigError::MalformedTemplate(_))
        ));
    }
}
