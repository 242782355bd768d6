//! Triple-store translation (SPARQL 1.1).
//!
//! A native name is a property path of one or two prefixed predicates:
//! `ex:title` is a literal on the entity, `ex:directedBy/ex:name` follows a
//! link to another node and reads its name. Entities are typed with the
//! mapping's class and identified by an IRI built from their identity.

use std::fmt;

use super::{Bound, Plan};
use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator};
use crate::schema::{FieldBinding, FieldMapping, FieldType};
use crate::value::Value;

pub const EX_NAMESPACE: &str = "http://example.org/";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Separator `GROUP_CONCAT` joins multi-valued fields with.
pub const LIST_SEPARATOR: &str = "|";

/// Variable bound to the entity in every pattern.
const SUBJECT: &str = "s";

pub trait ToSparql {
    fn to_sparql(&self, mapping: &FieldMapping) -> EngineResult<TripleQuery>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripleQuery {
    pub prefixes: Vec<(String, String)>,
    pub command: TripleCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripleCommand {
    Select {
        class: String,
        filters: Vec<TripleFilter>,
        projections: Vec<Projection>,
        order_by: Vec<String>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// Replace the assigned paths on one subject, creating it if needed.
    Upsert {
        subject: String,
        class: String,
        assignments: Vec<PathAssignment>,
    },
    Modify {
        class: String,
        filters: Vec<TripleFilter>,
        assignments: Vec<PathAssignment>,
    },
    Delete {
        class: String,
        filters: Vec<TripleFilter>,
    },
    Predicates {
        class: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripleFilter {
    pub path: Vec<String>,
    pub var: String,
    pub operator: Operator,
    pub operands: Vec<Value>,
    pub fold: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Canonical field name, also the result variable.
    pub var: String,
    pub path: Vec<String>,
    /// Multi-valued; aggregated with `GROUP_CONCAT`.
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathAssignment {
    pub path: Vec<String>,
    pub values: Vec<Value>,
}

impl TripleQuery {
    /// Expand a prefixed name to a full IRI. `a` is `rdf:type`.
    pub fn expand(&self, name: &str) -> String {
        if name == "a" {
            return RDF_TYPE.to_string();
        }
        if let Some((prefix, local)) = name.split_once(':') {
            if let Some((_, ns)) = self.prefixes.iter().find(|(p, _)| p == prefix) {
                return format!("{}{}", ns, local);
            }
        }
        name.to_string()
    }

    /// Compact a full IRI with the known prefixes.
    pub fn compact(&self, iri: &str) -> String {
        for (prefix, ns) in &self.prefixes {
            if let Some(local) = iri.strip_prefix(ns.as_str()) {
                return format!("{}:{}", prefix, local);
            }
        }
        iri.to_string()
    }
}

fn path_of(binding: &FieldBinding) -> EngineResult<Vec<String>> {
    let path: Vec<String> = binding.native.split('/').map(str::to_string).collect();
    if path.is_empty() || path.len() > 2 || path.iter().any(|p| p.is_empty()) {
        return Err(EngineError::Config(format!(
            "triple mapping '{}' for '{}' must be one predicate or two joined by '/'",
            binding.native, binding.canonical
        )));
    }
    Ok(path)
}

/// IRI-safe local name: unreserved chars kept, the rest percent-encoded
/// per UTF-8 byte, values joined with `_`. Distinct values give distinct names.
pub fn local_name(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| percent_encode(&v.to_string())).collect();
    parts.join("_")
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        if b.is_ascii_alphanumeric() || b"-.~".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// IRI of a linked node carrying `value` as its name.
pub fn node_iri(value: &Value) -> String {
    format!("{}node/{}", EX_NAMESPACE, local_name(std::slice::from_ref(value)))
}

fn resource(mapping: &FieldMapping) -> &str {
    mapping.entity.strip_suffix('s').unwrap_or(&mapping.entity)
}

impl ToSparql for Intent {
    fn to_sparql(&self, mapping: &FieldMapping) -> EngineResult<TripleQuery> {
        let plan = Plan::new(self, mapping)?;
        let class = mapping.native_entity.clone();

        let command = match plan.operation {
            Operation::Filter | Operation::ReadByKey => {
                let projections = mapping
                    .fields
                    .iter()
                    .map(|b| {
                        Ok(Projection {
                            var: b.canonical.clone(),
                            path: path_of(b)?,
                            multi: b.field_type == FieldType::TextList,
                        })
                    })
                    .collect::<EngineResult<Vec<_>>>()?;
                TripleCommand::Select {
                    class,
                    filters: build_filters(&plan.predicates)?,
                    projections,
                    order_by: mapping.identity.clone(),
                    limit: plan.pagination.limit,
                    offset: plan.pagination.offset,
                }
            }
            Operation::Create => TripleCommand::Upsert {
                subject: format!(
                    "{}{}/{}",
                    EX_NAMESPACE,
                    resource(mapping),
                    local_name(&plan.identity()?)
                ),
                class,
                assignments: build_assignments(&plan)?,
            },
            Operation::Update => TripleCommand::Modify {
                class,
                filters: build_filters(&plan.predicates)?,
                assignments: build_assignments(&plan)?,
            },
            Operation::Delete => TripleCommand::Delete {
                class,
                filters: build_filters(&plan.predicates)?,
            },
            Operation::DescribeSchema => TripleCommand::Predicates { class },
        };

        Ok(TripleQuery {
            prefixes: vec![("ex".to_string(), EX_NAMESPACE.to_string())],
            command,
        })
    }
}

fn build_filters(predicates: &[Bound]) -> EngineResult<Vec<TripleFilter>> {
    predicates
        .iter()
        .enumerate()
        .map(|(i, p)| {
            Ok(TripleFilter {
                path: path_of(p.binding)?,
                var: format!("f{}", i),
                operator: p.operator,
                operands: p.operands().into_iter().cloned().collect(),
                fold: p.fold,
            })
        })
        .collect()
}

fn build_assignments(plan: &Plan) -> EngineResult<Vec<PathAssignment>> {
    plan.assignments
        .iter()
        .map(|a| {
            Ok(PathAssignment {
                path: path_of(a.binding)?,
                values: a.value.elements().into_iter().cloned().collect(),
            })
        })
        .collect()
}

fn literal(v: &Value) -> String {
    match v {
        Value::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Float(f) => format!("{:?}", f),
        other => other.to_string(),
    }
}

impl TripleFilter {
    fn expression(&self) -> String {
        let var = format!("?{}", self.var);
        let (lhs, wrap): (String, fn(String) -> String) = if self.fold {
            (format!("LCASE(STR({}))", var), |s| format!("LCASE({})", s))
        } else if self.operator == Operator::Contains {
            (format!("STR({})", var), |s| s)
        } else {
            (var, |s| s)
        };
        let operand = |v: &Value| wrap(literal(v));
        let first = self.operands.first().map(operand).unwrap_or_default();
        match self.operator {
            Operator::Equals => format!("{} = {}", lhs, first),
            Operator::Contains => format!("CONTAINS({}, {})", lhs, first),
            Operator::GreaterThan => format!("{} > {}", lhs, first),
            Operator::LessThan => format!("{} < {}", lhs, first),
            Operator::InSet => {
                let items: Vec<String> = self.operands.iter().map(operand).collect();
                format!("{} IN ({})", lhs, items.join(", "))
            }
        }
    }
}

fn filter_lines(filters: &[TripleFilter]) -> Vec<String> {
    filters
        .iter()
        .flat_map(|f| {
            [
                format!("  ?{} {} ?{} .", SUBJECT, f.path.join("/"), f.var),
                format!("  FILTER({})", f.expression()),
            ]
        })
        .collect()
}

/// Triples writing `values` along `path` from `subject`.
fn insert_lines(subject: &str, assignment: &PathAssignment) -> Vec<String> {
    let mut lines = Vec::new();
    for value in &assignment.values {
        match assignment.path.as_slice() {
            [predicate] => lines.push(format!("  {} {} {} .", subject, predicate, literal(value))),
            [link, leaf] => {
                let node = format!("<{}>", node_iri(value));
                lines.push(format!("  {} {} {} .", subject, link, node));
                lines.push(format!("  {} {} {} .", node, leaf, literal(value)));
            }
            _ => {}
        }
    }
    lines
}

fn replace_block(subject: &str, assignments: &[PathAssignment], prelude: Option<String>) -> String {
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();
    for (i, a) in assignments.iter().enumerate() {
        let first = &a.path[0];
        deletes.push(format!("  {} {} ?o{} .", subject, first, i));
        inserts.extend(insert_lines(subject, a));
    }
    let mut out = Vec::new();
    out.push(format!("DELETE {{\n{}\n}}", deletes.join("\n")));
    match &prelude {
        Some(typed) => out.push(format!("INSERT {{\n{}\n{}\n}}", typed, inserts.join("\n"))),
        None => out.push(format!("INSERT {{\n{}\n}}", inserts.join("\n"))),
    }
    out.join("\n")
}

impl fmt::Display for TripleQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (prefix, ns) in &self.prefixes {
            writeln!(f, "PREFIX {}: <{}>", prefix, ns)?;
        }
        let s = format!("?{}", SUBJECT);
        match &self.command {
            TripleCommand::Select {
                class,
                filters,
                projections,
                order_by,
                limit,
                offset,
            } => {
                let mut select = vec![s.clone()];
                let mut optionals = Vec::new();
                for p in projections {
                    let inner = format!("?v_{}", p.var);
                    if p.multi {
                        select.push(format!(
                            "(GROUP_CONCAT(DISTINCT STR({}); separator=\"{}\") AS ?{})",
                            inner, LIST_SEPARATOR, p.var
                        ));
                    } else {
                        select.push(format!("(SAMPLE({}) AS ?{})", inner, p.var));
                    }
                    optionals.push(format!("  OPTIONAL {{ {} {} {} }}", s, p.path.join("/"), inner));
                }
                writeln!(f, "SELECT {}", select.join(" "))?;
                writeln!(f, "WHERE {{")?;
                writeln!(f, "  {} a {} .", s, class)?;
                for line in filter_lines(filters).into_iter().chain(optionals) {
                    writeln!(f, "{}", line)?;
                }
                writeln!(f, "}}")?;
                write!(f, "GROUP BY {}", s)?;
                if !order_by.is_empty() {
                    let keys: Vec<String> = order_by.iter().map(|k| format!("?{}", k)).collect();
                    write!(f, "\nORDER BY {}", keys.join(" "))?;
                }
                if let Some(limit) = limit {
                    write!(f, "\nLIMIT {}", limit)?;
                }
                if let Some(offset) = offset {
                    write!(f, "\nOFFSET {}", offset)?;
                }
                Ok(())
            }
            TripleCommand::Upsert {
                subject,
                class,
                assignments,
            } => {
                let subject = format!("<{}>", subject);
                let typed = format!("  {} a {} .", subject, class);
                writeln!(f, "{}", replace_block(&subject, assignments, Some(typed)))?;
                let optionals: Vec<String> = assignments
                    .iter()
                    .enumerate()
                    .map(|(i, a)| format!("  OPTIONAL {{ {} {} ?o{} }}", subject, a.path[0], i))
                    .collect();
                write!(f, "WHERE {{\n{}\n}}", optionals.join("\n"))
            }
            TripleCommand::Modify {
                class,
                filters,
                assignments,
            } => {
                writeln!(f, "{}", replace_block(&s, assignments, None))?;
                let mut lines = vec![format!("  {} a {} .", s, class)];
                lines.extend(filter_lines(filters));
                lines.extend(
                    assignments
                        .iter()
                        .enumerate()
                        .map(|(i, a)| format!("  OPTIONAL {{ {} {} ?o{} }}", s, a.path[0], i)),
                );
                write!(f, "WHERE {{\n{}\n}}", lines.join("\n"))
            }
            TripleCommand::Delete { class, filters } => {
                writeln!(f, "DELETE {{ {} ?p ?o }}", s)?;
                let mut lines = vec![format!("  {} a {} .", s, class)];
                lines.extend(filter_lines(filters));
                lines.push(format!("  {} ?p ?o .", s));
                write!(f, "WHERE {{\n{}\n}}", lines.join("\n"))
            }
            TripleCommand::Predicates { class } => {
                write!(f, "SELECT DISTINCT ?p WHERE {{ {} a {} ; ?p ?o }}", s, class)
            }
        }
    }
}
