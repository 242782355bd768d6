//! Wide-column translation (HBase shell dialect).
//!
//! Rows are keyed `<entity>_<identity key>` and fields live in
//! `family:qualifier` columns. Predicates become `SingleColumnValueFilter`s
//! that drop rows missing the column; list fields are stored joined with
//! `", "` and matched with anchored regexes. HBase scans have no offset.
//!
//! HBase compares cells as raw bytes, so numbers are written in a
//! byte-ordered encoding (see [`cell_bytes`]) and range filters compare
//! against the same encoding. Scans return rows in row-key order, which
//! follows the identity order of every other family.

use std::fmt;

use super::{Bound, Plan};
use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator};
use crate::schema::{FieldMapping, FieldType};
use crate::value::Value;

/// Separator for list fields stored in a single cell.
pub const LIST_SEPARATOR: &str = ", ";

pub trait ToHBase {
    fn to_hbase(&self, mapping: &FieldMapping) -> EngineResult<WideColumnQuery>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideColumnQuery {
    pub table: String,
    pub command: WideColumnCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WideColumnCommand {
    Scan(Scan),
    Get {
        row_key: String,
        families: Vec<String>,
        filters: Vec<ColumnFilter>,
    },
    Put {
        row_key: String,
        cells: Vec<(String, Value)>,
    },
    /// Scan, then put the cells into every matching row.
    PutMatching {
        scan: Scan,
        cells: Vec<(String, Value)>,
    },
    /// Scan, then `deleteall` every matching row.
    DeleteMatching { scan: Scan },
    Describe,
}

/// Row-key prefix plus column-family scan spec.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub row_prefix: String,
    pub families: Vec<String>,
    /// AND-combined.
    pub filters: Vec<ColumnFilter>,
    pub limit: Option<u64>,
}

/// `SingleColumnValueFilter`; the comparators are OR-combined.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: String,
    pub op: CompareOp,
    pub comparators: Vec<Comparator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Greater,
    Less,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    /// Cell bytes, compared lexicographically.
    Binary(Vec<u8>),
    /// Case-insensitive substring.
    Substring(String),
    Regex { pattern: String, case_insensitive: bool },
}

impl ToHBase for Intent {
    fn to_hbase(&self, mapping: &FieldMapping) -> EngineResult<WideColumnQuery> {
        let plan = Plan::new(self, mapping)?;
        if plan.pagination.offset.is_some_and(|n| n > 0) {
            return Err(EngineError::unsupported(
                BackendKind::WideColumn,
                "HBase scans cannot skip rows; offset pagination is not available",
            ));
        }

        let row_prefix = format!("{}_", row_entity(mapping));
        let mut families: Vec<String> = mapping
            .fields
            .iter()
            .map(|b| family(&b.native).to_string())
            .collect();
        families.sort();
        families.dedup();

        let scan = |plan: &Plan| -> EngineResult<Scan> {
            Ok(Scan {
                row_prefix: row_prefix.clone(),
                families: families.clone(),
                filters: build_filters(&plan.predicates)?,
                limit: plan.pagination.limit,
            })
        };

        let command = match plan.operation {
            Operation::Filter => WideColumnCommand::Scan(scan(&plan)?),
            // Row keys are case-sensitive; a folded key lookup has to scan.
            Operation::ReadByKey if plan.predicates.iter().any(|p| p.fold) => {
                WideColumnCommand::Scan(scan(&plan)?)
            }
            Operation::ReadByKey => WideColumnCommand::Get {
                row_key: format!("{}{}", row_prefix, plan.key_suffix()?),
                families: families.clone(),
                filters: build_filters(&plan.predicates)?,
            },
            Operation::Create => WideColumnCommand::Put {
                row_key: format!("{}{}", row_prefix, plan.key_suffix()?),
                cells: plan
                    .assignments
                    .iter()
                    .map(|a| (a.native().to_string(), encode(&a.value)))
                    .collect(),
            },
            Operation::Update => WideColumnCommand::PutMatching {
                scan: scan(&plan)?,
                cells: plan
                    .assignments
                    .iter()
                    .map(|a| (a.native().to_string(), encode(&a.value)))
                    .collect(),
            },
            Operation::Delete => WideColumnCommand::DeleteMatching { scan: scan(&plan)? },
            Operation::DescribeSchema => WideColumnCommand::Describe,
        };

        Ok(WideColumnQuery {
            table: mapping.native_entity.clone(),
            command,
        })
    }
}

/// Row-key stem: the singular of the canonical entity (`movies` -> `movie`).
fn row_entity(mapping: &FieldMapping) -> &str {
    mapping.entity.strip_suffix('s').unwrap_or(&mapping.entity)
}

fn family(column: &str) -> &str {
    column.split_once(':').map(|(f, _)| f).unwrap_or(column)
}

/// Cell encoding: lists are joined, scalars kept typed.
pub fn encode(value: &Value) -> Value {
    match value {
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            Value::Text(parts.join(LIST_SEPARATOR))
        }
        other => other.clone(),
    }
}

fn build_filters(predicates: &[Bound]) -> EngineResult<Vec<ColumnFilter>> {
    Ok(predicates.iter().map(filter).collect())
}

fn filter(p: &Bound) -> ColumnFilter {
    let op = match p.operator {
        Operator::GreaterThan => CompareOp::Greater,
        Operator::LessThan => CompareOp::Less,
        _ => CompareOp::Equal,
    };
    let comparators = p
        .operands()
        .into_iter()
        .map(|v| comparator(p, v))
        .collect();
    ColumnFilter {
        column: p.native().to_string(),
        op,
        comparators,
    }
}

fn comparator(p: &Bound, v: &Value) -> Comparator {
    let escaped = || regex::escape(&v.to_string());
    match p.operator {
        Operator::Contains if p.fold => Comparator::Substring(v.to_string().to_lowercase()),
        Operator::Contains => Comparator::Regex {
            pattern: escaped(),
            case_insensitive: false,
        },
        Operator::Equals | Operator::InSet if p.is_list_field() => Comparator::Regex {
            pattern: format!("(^|, ){}(, |$)", escaped()),
            case_insensitive: p.fold,
        },
        Operator::Equals | Operator::InSet if p.fold => Comparator::Regex {
            pattern: format!("^{}$", escaped()),
            case_insensitive: true,
        },
        _ => Comparator::Binary(cell_bytes(&operand(p.binding.field_type, v))),
    }
}

/// The operand as the field stores it, so both sides encode alike.
fn operand(field_type: FieldType, v: &Value) -> Value {
    match (field_type, v) {
        (FieldType::Float, Value::Int(i)) => Value::Float(*i as f64),
        (FieldType::Integer, Value::Float(f)) => Value::Int(*f as i64),
        _ => v.clone(),
    }
}

const SIGN_BIT: u64 = 1 << 63;

/// The bytes HBase holds for a cell.
///
/// Numbers are 8 bytes big-endian with the sign bit flipped; negative
/// floats have every bit flipped. Byte order then matches numeric order.
pub fn cell_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Int(i) => ((*i as u64) ^ SIGN_BIT).to_be_bytes().to_vec(),
        Value::Float(f) => {
            let bits = f.to_bits();
            let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
            ordered.to_be_bytes().to_vec()
        }
        Value::Null => Vec::new(),
        Value::List(_) => cell_bytes(&encode(value)),
        other => other.to_string().into_bytes(),
    }
}

/// Printable form of raw bytes, as `Bytes.toStringBinary` writes it.
pub fn to_string_binary(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_alphanumeric() || " `~!@#$%^&*()-_=+[]{}|;:'\",.<>/?".contains(b as char) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02X}", b));
        }
    }
    out
}

/// Shell literal for a cell value; numbers are written byte by byte in double quotes.
fn render_cell(value: &Value) -> String {
    match value {
        Value::Int(_) | Value::Float(_) => {
            let escaped: String = cell_bytes(value).iter().map(|b| format!("\\x{:02X}", b)).collect();
            format!("\"{}\"", escaped)
        }
        other => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Binary(bytes) => write!(f, "binary:{}", to_string_binary(bytes)),
            Comparator::Substring(s) => write!(f, "substring:{}", s),
            Comparator::Regex {
                pattern,
                case_insensitive,
            } => {
                let flag = if *case_insensitive { "(?i)" } else { "" };
                write!(f, "regexstring:{}{}", flag, pattern)
            }
        }
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fam, qualifier) = self.column.split_once(':').unwrap_or((&self.column, ""));
        let op = match self.op {
            CompareOp::Equal => "=",
            CompareOp::Greater => ">",
            CompareOp::Less => "<",
        };
        let parts: Vec<String> = self
            .comparators
            .iter()
            .map(|c| {
                format!(
                    "SingleColumnValueFilter('{}', '{}', {}, {}, true, true)",
                    fam,
                    qualifier,
                    op,
                    quote(&c.to_string())
                )
            })
            .collect();
        if parts.len() == 1 {
            write!(f, "{}", parts[0])
        } else {
            write!(f, "({})", parts.join(" OR "))
        }
    }
}

fn render_filter(filters: &[ColumnFilter]) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let parts: Vec<String> = filters.iter().map(|f| f.to_string()).collect();
    Some(format!("FILTER => \"{}\"", parts.join(" AND ")))
}

fn render_families(families: &[String]) -> String {
    let quoted: Vec<String> = families.iter().map(|f| quote(f)).collect();
    format!("COLUMNS => [{}]", quoted.join(", "))
}

fn render_scan(table: &str, scan: &Scan) -> String {
    let mut spec = vec![
        format!("ROWPREFIXFILTER => {}", quote(&scan.row_prefix)),
        render_families(&scan.families),
    ];
    spec.extend(render_filter(&scan.filters));
    if let Some(limit) = scan.limit {
        spec.push(format!("LIMIT => {}", limit));
    }
    format!("scan {}, {{{}}}", quote(table), spec.join(", "))
}

impl fmt::Display for WideColumnQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = quote(&self.table);
        match &self.command {
            WideColumnCommand::Scan(scan) => write!(f, "{}", render_scan(&self.table, scan)),
            WideColumnCommand::Get {
                row_key,
                families,
                filters,
            } => {
                let mut spec = vec![render_families(families)];
                spec.extend(render_filter(filters));
                write!(f, "get {}, {}, {{{}}}", table, quote(row_key), spec.join(", "))
            }
            WideColumnCommand::Put { row_key, cells } => {
                let lines: Vec<String> = cells
                    .iter()
                    .map(|(col, v)| format!("put {}, {}, {}, {}", table, quote(row_key), quote(col), render_cell(v)))
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
            WideColumnCommand::PutMatching { scan, cells } => {
                let mut lines = vec![render_scan(&self.table, scan)];
                lines.extend(
                    cells
                        .iter()
                        .map(|(col, v)| format!("put {}, <row>, {}, {}", table, quote(col), render_cell(v))),
                );
                write!(f, "{}", lines.join("\n"))
            }
            WideColumnCommand::DeleteMatching { scan } => {
                write!(f, "{}\ndeleteall {}, <row>", render_scan(&self.table, scan), table)
            }
            WideColumnCommand::Describe => write!(f, "describe {}", table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::movie_mapping;

    fn translate(intent: Intent) -> EngineResult<WideColumnQuery> {
        intent.to_hbase(&movie_mapping(BackendKind::WideColumn))
    }

    #[test]
    fn test_scan() {
        let query = translate(
            Intent::filter("movies")
                .eq("year", 1993)
                .contains_ci("director", "Spielberg")
                .limit(10),
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            concat!(
                "scan 'movies', {ROWPREFIXFILTER => 'movie_', ",
                "COLUMNS => ['info', 'metadata', 'people', 'ratings'], ",
                r#"FILTER => "SingleColumnValueFilter('info', 'year', =, 'binary:\\x80\\x00\\x00\\x00\\x00\\x00\\x07\\xC9', true, true) AND "#,
                r#"SingleColumnValueFilter('people', 'directors', =, 'substring:spielberg', true, true)", "#,
                "LIMIT => 10}"
            )
        );
    }

    #[test]
    fn test_numbers_encode_in_byte_order() {
        assert_eq!(
            to_string_binary(&cell_bytes(&Value::Int(1993))),
            r"\x80\x00\x00\x00\x00\x00\x07\xC9"
        );
        assert_eq!(to_string_binary(&cell_bytes(&Value::from("Hook"))), "Hook");

        let ints = [-2000, -1, 0, 7, 986, 1993, 10_000];
        let encoded: Vec<Vec<u8>> = ints.iter().map(|i| cell_bytes(&Value::Int(*i))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));

        let floats = [-8.5, -0.5, 0.0, 2.25, 8.5, 10.0, 85.0];
        let encoded: Vec<Vec<u8>> = floats.iter().map(|f| cell_bytes(&Value::Float(*f))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_range_operand_takes_field_type() {
        let query = translate(Intent::filter("movies").gt("rating", 8)).unwrap();
        let WideColumnCommand::Scan(scan) = &query.command else {
            panic!("expected a scan");
        };
        assert_eq!(scan.filters[0].op, CompareOp::Greater);
        assert_eq!(
            scan.filters[0].comparators,
            vec![Comparator::Binary(cell_bytes(&Value::Float(8.0)))]
        );
    }

    #[test]
    fn test_offset_unsupported() {
        let err = translate(Intent::filter("movies").offset(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_list_equality_is_anchored_regex() {
        let query = translate(Intent::filter("movies").eq_ci("genre", "drama")).unwrap();
        assert!(query
            .to_string()
            .contains("'regexstring:(?i)(^|, )drama(, |$)'"));
    }

    #[test]
    fn test_in_set_is_or() {
        let query = translate(Intent::filter("movies").in_set("title", vec!["Ghost", "Hook"])).unwrap();
        assert!(query.to_string().contains(
            "(SingleColumnValueFilter('info', 'title', =, 'binary:Ghost', true, true) OR \
             SingleColumnValueFilter('info', 'title', =, 'binary:Hook', true, true))"
        ));
    }

    #[test]
    fn test_get_by_row_key() {
        let query = translate(Intent::read_by_key("movies").eq("title", "Hook").eq("year", 1991)).unwrap();
        assert!(query.to_string().starts_with("get 'movies', 'movie_Hook!e1991', {COLUMNS => "));

        let folded = translate(Intent::read_by_key("movies").eq_ci("title", "hook").eq("year", 1991)).unwrap();
        assert!(matches!(folded.command, WideColumnCommand::Scan(_)));
    }

    #[test]
    fn test_put_cells() {
        let query = translate(
            Intent::create("movies")
                .value("title", "Schindler's List")
                .value("year", 1993)
                .value("genre", vec!["Drama", "History"]),
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            concat!(
                r"put 'movies', 'movie_Schindler%27s%20List!e1993', 'info:title', 'Schindler\'s List'",
                "\n",
                r#"put 'movies', 'movie_Schindler%27s%20List!e1993', 'info:year', "\x80\x00\x00\x00\x00\x00\x07\xC9""#,
                "\n",
                "put 'movies', 'movie_Schindler%27s%20List!e1993', 'metadata:genres', 'Drama, History'"
            )
        );
    }
}
