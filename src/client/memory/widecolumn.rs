//! In-memory wide-column tables with HBase scan and filter semantics.

use async_trait::async_trait;
use regex::RegexBuilder;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::Health;
use crate::backend::BackendKind;
use crate::client::{Client, RawResult, WideRow};
use crate::error::{EngineError, EngineResult};
use crate::transpiler::widecolumn::{
    cell_bytes, ColumnFilter, CompareOp, Comparator, Scan, WideColumnCommand, WideColumnQuery,
};
use crate::value::Value;

type Cells = BTreeMap<String, Value>;
type Table = BTreeMap<String, Cells>;

#[derive(Debug, Default)]
pub struct MemoryWideColumnStore {
    tables: RwLock<BTreeMap<String, Table>>,
    health: Health,
}

impl MemoryWideColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// `put table, row, column, value` for one cell.
    pub async fn put(&self, table: &str, row_key: &str, column: &str, value: Value) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .entry(row_key.to_string())
            .or_default()
            .insert(column.to_string(), value);
    }

    pub async fn row(&self, table: &str, row_key: &str) -> Option<Cells> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|t| t.get(row_key))
            .cloned()
    }
}

fn comparator_matches(cell: &Value, op: CompareOp, comparator: &Comparator) -> Result<bool, String> {
    Ok(match comparator {
        Comparator::Binary(expected) => {
            let stored = cell_bytes(cell);
            match op {
                CompareOp::Equal => stored == *expected,
                CompareOp::Greater => stored > *expected,
                CompareOp::Less => stored < *expected,
            }
        }
        Comparator::Substring(needle) => cell.to_string().to_lowercase().contains(needle.as_str()),
        Comparator::Regex {
            pattern,
            case_insensitive,
        } => RegexBuilder::new(pattern)
            .case_insensitive(*case_insensitive)
            .build()
            .map_err(|e| format!("invalid regexstring comparator: {}", e))?
            .is_match(&cell.to_string()),
    })
}

/// Rows missing the filtered column are dropped.
fn passes(cells: &Cells, filters: &[ColumnFilter]) -> Result<bool, String> {
    for filter in filters {
        let Some(cell) = cells.get(&filter.column) else {
            return Ok(false);
        };
        let mut any = false;
        for comparator in &filter.comparators {
            if comparator_matches(cell, filter.op, comparator)? {
                any = true;
                break;
            }
        }
        if !any {
            return Ok(false);
        }
    }
    Ok(true)
}

fn project(row_key: &str, cells: &Cells, families: &[String]) -> WideRow {
    let cells = cells
        .iter()
        .filter(|(column, _)| {
            families.is_empty()
                || families
                    .iter()
                    .any(|f| column.split_once(':').is_some_and(|(fam, _)| fam == f))
        })
        .map(|(c, v)| (c.clone(), v.clone()))
        .collect();
    WideRow {
        row_key: row_key.to_string(),
        cells,
    }
}

fn scan_keys(table: &Table, scan: &Scan) -> Result<Vec<String>, String> {
    let mut keys = Vec::new();
    for (key, cells) in table
        .range(scan.row_prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&scan.row_prefix))
    {
        if scan.limit.is_some_and(|n| keys.len() as u64 >= n) {
            break;
        }
        if passes(cells, &scan.filters)? {
            keys.push(key.clone());
        }
    }
    Ok(keys)
}

#[async_trait]
impl Client<WideColumnQuery> for MemoryWideColumnStore {
    async fn run(&self, query: &WideColumnQuery) -> EngineResult<RawResult> {
        self.health.check(BackendKind::WideColumn).await?;
        let fail = |reason: String| EngineError::execution(BackendKind::WideColumn, reason);

        match &query.command {
            WideColumnCommand::Scan(scan) => {
                let tables = self.tables.read().await;
                let Some(table) = tables.get(&query.table) else {
                    return Ok(RawResult::Rows(vec![]));
                };
                let rows = scan_keys(table, scan)
                    .map_err(fail)?
                    .into_iter()
                    .filter_map(|key| table.get(&key).map(|cells| project(&key, cells, &scan.families)))
                    .collect();
                Ok(RawResult::Rows(rows))
            }
            WideColumnCommand::Get {
                row_key,
                families,
                filters,
            } => {
                let tables = self.tables.read().await;
                let mut rows = vec![];
                if let Some(cells) = tables.get(&query.table).and_then(|t| t.get(row_key)) {
                    if passes(cells, filters).map_err(fail)? {
                        rows.push(project(row_key, cells, families));
                    }
                }
                Ok(RawResult::Rows(rows))
            }
            WideColumnCommand::Put { row_key, cells } => {
                let mut tables = self.tables.write().await;
                tables
                    .entry(query.table.clone())
                    .or_default()
                    .entry(row_key.clone())
                    .or_default()
                    .extend(cells.iter().cloned());
                Ok(RawResult::Affected(1))
            }
            WideColumnCommand::PutMatching { scan, cells } => {
                let mut tables = self.tables.write().await;
                let Some(table) = tables.get_mut(&query.table) else {
                    return Ok(RawResult::Affected(0));
                };
                let keys = scan_keys(table, scan).map_err(fail)?;
                for key in &keys {
                    if let Some(row) = table.get_mut(key) {
                        row.extend(cells.iter().cloned());
                    }
                }
                Ok(RawResult::Affected(keys.len() as u64))
            }
            WideColumnCommand::DeleteMatching { scan } => {
                let mut tables = self.tables.write().await;
                let Some(table) = tables.get_mut(&query.table) else {
                    return Ok(RawResult::Affected(0));
                };
                let keys = scan_keys(table, scan).map_err(fail)?;
                for key in &keys {
                    table.remove(key);
                }
                Ok(RawResult::Affected(keys.len() as u64))
            }
            WideColumnCommand::Describe => {
                let tables = self.tables.read().await;
                let columns: BTreeSet<String> = tables
                    .get(&query.table)
                    .into_iter()
                    .flat_map(|t| t.values())
                    .flat_map(|cells| cells.keys().cloned())
                    .collect();
                Ok(RawResult::Fields(columns.into_iter().collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use crate::schema::movie_mapping;
    use crate::transpiler::ToHBase;

    async fn run(store: &MemoryWideColumnStore, intent: Intent) -> RawResult {
        let query = intent.to_hbase(&movie_mapping(BackendKind::WideColumn)).unwrap();
        store.run(&query).await.unwrap()
    }

    #[test]
    fn test_list_regex_matches_whole_elements() {
        let cell = Value::from("Crime, Drama");
        let regex = |pattern: &str| Comparator::Regex {
            pattern: pattern.to_string(),
            case_insensitive: false,
        };
        assert!(comparator_matches(&cell, CompareOp::Equal, &regex("(^|, )Drama(, |$)")).unwrap());
        assert!(!comparator_matches(&cell, CompareOp::Equal, &regex("(^|, )Dram(, |$)")).unwrap());
    }

    #[test]
    fn test_missing_column_drops_row() {
        let cells = Cells::from([("info:title".to_string(), Value::from("Ghost"))]);
        let filter = ColumnFilter {
            column: "info:year".to_string(),
            op: CompareOp::Less,
            comparators: vec![Comparator::Binary(cell_bytes(&Value::Int(2000)))],
        };
        assert!(!passes(&cells, &[filter]).unwrap());
    }

    #[tokio::test]
    async fn test_put_scan_get() {
        let store = MemoryWideColumnStore::new();
        run(
            &store,
            Intent::create("movies")
                .value("title", "Cast Away")
                .value("year", 2000)
                .value("cast", vec!["Tom Hanks", "Helen Hunt"]),
        )
        .await;
        store.put("movies", "movie_zz", "info:title", Value::from("Orphan")).await;

        let cells = store.row("movies", "movie_Cast%20Away!e2000").await.unwrap();
        assert_eq!(cells["people:cast"], Value::from("Tom Hanks, Helen Hunt"));

        let RawResult::Rows(rows) = run(&store, Intent::filter("movies").eq_ci("cast", "helen hunt")).await else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);

        let RawResult::Rows(rows) = run(
            &store,
            Intent::read_by_key("movies").eq("title", "Cast Away").eq("year", 2000),
        )
        .await
        else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].row_key, "movie_Cast%20Away!e2000");
    }

    #[tokio::test]
    async fn test_numeric_ranges_compare_by_value() {
        let store = MemoryWideColumnStore::new();
        for (title, year, rating) in [("Old", 986, 6.5), ("Top", 2001, 10.0), ("Mid", 1995, 8.0)] {
            run(
                &store,
                Intent::create("movies")
                    .value("title", title)
                    .value("year", year)
                    .value("rating", rating),
            )
            .await;
        }

        let titles = |result: RawResult| -> Vec<Value> {
            let RawResult::Rows(rows) = result else {
                panic!("expected rows");
            };
            rows.into_iter().map(|r| r.cells["info:title"].clone()).collect()
        };
        assert_eq!(
            titles(run(&store, Intent::filter("movies").gt("rating", 8.5)).await),
            vec![Value::from("Top")]
        );
        assert_eq!(
            titles(run(&store, Intent::filter("movies").lt("year", 1000)).await),
            vec![Value::from("Old")]
        );
    }

    #[tokio::test]
    async fn test_scan_limit_follows_identity_order() {
        let store = MemoryWideColumnStore::new();
        for (title, year) in [("alpha", 2001), ("Zulu", 2001), ("Alien!", 1979), ("Alien", 1979)] {
            run(&store, Intent::create("movies").value("title", title).value("year", year)).await;
        }
        let RawResult::Rows(rows) = run(&store, Intent::filter("movies").limit(3)).await else {
            panic!("expected rows");
        };
        let titles: Vec<&Value> = rows.iter().map(|r| &r.cells["info:title"]).collect();
        assert_eq!(titles, vec![&Value::from("Alien"), &Value::from("Alien!"), &Value::from("Zulu")]);
    }
}
