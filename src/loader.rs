//! Pregenerated test-set loading.
//!
//! A test set is a directory of `<template>_<instance>.sql` files, many
//! instances per template. Each file's first line is generator banner
//! output, not SQL; the rest is flattened to one line and passed through
//! the portability rewriter before it reaches the workload.

use crate::rewrite::rewrite;
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Load every query in the test set at `dir`, returning parallel
/// `(queries, template_ids)` lists with 0-based template ids, ordered by
/// `(template, instance)` so runs over the same test set see the same
/// corpus indices.
pub fn load_test_set(dir: &Path) -> anyhow::Result<(Vec<String>, Vec<usize>)> {
    let mut entries: Vec<(usize, usize)> = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list test set {dir:?}"))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((template, instance)) = parse_query_name(stem) else {
            continue;
        };
        entries.push((template, instance));
    }

    anyhow::ensure!(!entries.is_empty(), "No query files found in {dir:?}");
    entries.sort_unstable();

    let mut queries = Vec::with_capacity(entries.len());
    let mut templates = Vec::with_capacity(entries.len());

    for (template, instance) in entries {
        let path = dir.join(format!("{template}_{instance}.sql"));
        let contents =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {path:?}"))?;

        // Skip the banner line. Rewriting runs before flattening because
        // the inline-LIMIT fixup keys on the statement's own newline.
        let body: String = contents.lines().skip(1).collect::<Vec<_>>().join("\n");
        let query = rewrite(&body).replace(['\n', '\t'], " ");

        queries.push(query);
        templates.push(template - 1);
    }

    Ok((queries, templates))
}

/// Parse a `<template>_<instance>` file stem into 1-based template number
/// and instance number.
fn parse_query_name(stem: &str) -> Option<(usize, usize)> {
    let (template, instance) = stem.split_once('_')?;
    let template = template.parse::<usize>().ok().filter(|&t| t >= 1)?;
    let instance = instance.parse::<usize>().ok()?;
    Some((template, instance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_query_name() {
        assert_eq!(parse_query_name("14_3"), Some((14, 3)));
        assert_eq!(parse_query_name("1_0"), Some((1, 0)));
        assert_eq!(parse_query_name("0_1"), None);
        assert_eq!(parse_query_name("notaquery"), None);
        assert_eq!(parse_query_name("x_1"), None);
    }

    #[test]
    fn test_load_test_set_orders_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("2_0.sql"),
            "-- qgen banner\nselect * from (select a from t)\nwhere a > 1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("1_1.sql"),
            "-- qgen banner\nselect 2;\nlimit 5\n",
        )
        .unwrap();
        fs::write(dir.path().join("1_0.sql"), "-- qgen banner\nselect 1\n").unwrap();
        fs::write(dir.path().join("README.txt"), "not a query").unwrap();

        let (queries, templates) = load_test_set(dir.path()).unwrap();

        assert_eq!(templates, vec![0, 0, 1]);
        assert_eq!(queries[0], "select 1");
        assert_eq!(queries[1], "select 2 limit 5");
        // The derived table picked up a synthetic alias on the way in.
        assert_eq!(
            queries[2],
            "select * from (select a from t) as alias123  where a > 1"
        );
    }

    #[test]
    fn test_load_test_set_empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_test_set(dir.path()).is_err());
    }
}
