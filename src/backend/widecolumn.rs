//! Wide-column adapter (HBase).

use async_trait::async_trait;
use std::sync::Arc;

use super::{decode, normalize_common, wrong_family, Backend, BackendKind, RawResult};
use crate::client::memory::MemoryWideColumnStore;
use crate::client::{Client, WideRow};
use crate::error::EngineResult;
use crate::intent::Intent;
use crate::normalize::{Normalized, Record, RecordBuilder};
use crate::schema::FieldMapping;
use crate::transpiler::widecolumn::LIST_SEPARATOR;
use crate::transpiler::{NativeQuery, ToHBase, WideColumnQuery};
use crate::value::Value;

pub struct WideColumnBackend {
    client: Arc<dyn Client<WideColumnQuery>>,
}

impl WideColumnBackend {
    pub fn new(client: Arc<dyn Client<WideColumnQuery>>) -> Self {
        Self { client }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryWideColumnStore::new()))
    }
}

fn to_record(row: WideRow, mapping: &FieldMapping) -> Result<Record, String> {
    let label = format!("row {}", row.row_key);
    let WideRow { row_key, mut cells } = row;
    let mut builder = RecordBuilder::new();
    for binding in &mapping.fields {
        if let Some(raw) = cells.remove(&binding.native) {
            let value = decode(binding, raw, LIST_SEPARATOR)
                .map_err(|reason| format!("{}: {}", label, reason))?;
            builder.canonical(&binding.canonical, value);
        }
    }
    builder.check_identity(mapping, &label)?;

    for (column, value) in cells {
        builder.extra(&column, value);
    }
    builder.extra("row_key", Value::Text(row_key));
    Ok(builder.build(mapping))
}

#[async_trait]
impl Backend for WideColumnBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WideColumn
    }

    fn translate(&self, intent: &Intent, mapping: &FieldMapping) -> EngineResult<NativeQuery> {
        Ok(NativeQuery::WideColumn(intent.to_hbase(mapping)?))
    }

    async fn execute(&self, query: &NativeQuery) -> EngineResult<RawResult> {
        match query {
            NativeQuery::WideColumn(q) => self.client.run(q).await,
            other => Err(wrong_family(self.kind(), other)),
        }
    }

    fn normalize(&self, raw: RawResult, mapping: &FieldMapping) -> EngineResult<Normalized> {
        match raw {
            RawResult::Rows(rows) => Ok(rows.into_iter().map(|r| to_record(r, mapping)).collect()),
            other => normalize_common(self.kind(), other, mapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_cells_to_record() {
        let backend = WideColumnBackend::in_memory();
        let mapping = movie_mapping(BackendKind::WideColumn);
        let row = WideRow {
            row_key: "movie_Total%20Recall!e1990".to_string(),
            cells: BTreeMap::from([
                ("info:title".to_string(), Value::from("Total Recall")),
                ("info:year".to_string(), Value::Int(1990)),
                ("people:cast".to_string(), Value::from("Arnold Schwarzenegger, Sharon Stone")),
                ("info:budget".to_string(), Value::Int(65_000_000)),
            ]),
        };
        let out = backend.normalize(RawResult::Rows(vec![row]), &mapping).unwrap();
        let record = &out.records[0];
        assert_eq!(
            record.get("cast"),
            Some(&Value::from(vec!["Arnold Schwarzenegger", "Sharon Stone"]))
        );
        let keys: Vec<&str> = record.keys().skip(6).collect();
        assert_eq!(keys, vec!["info:budget", "row_key"]);
    }

    #[test]
    fn test_affected_has_no_records() {
        let backend = WideColumnBackend::in_memory();
        let mapping = movie_mapping(BackendKind::WideColumn);
        let out = backend.normalize(RawResult::Affected(3), &mapping).unwrap();
        assert_eq!(out, Normalized::default());
    }
}
