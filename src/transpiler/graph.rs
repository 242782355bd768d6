//! Graph translation (Cypher dialect).
//!
//! Scalar fields are node properties. A native name of the form
//! `<-TYPE-Label.property` maps a field onto related nodes instead, e.g.
//! `<-DIRECTED-Person.name` for the people who directed a movie.
//! Every literal travels as a `$param`.

use std::collections::BTreeMap;
use std::fmt;

use super::{Assignment, Bound, Plan};
use crate::backend::BackendKind;
use crate::error::{EngineError, EngineResult};
use crate::intent::{Intent, Operation, Operator};
use crate::schema::{FieldBinding, FieldMapping, FieldType};
use crate::value::Value;

pub trait ToCypher {
    fn to_cypher(&self, mapping: &FieldMapping) -> EngineResult<GraphQuery>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphQuery {
    pub label: String,
    pub statement: Statement,
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Match {
        conditions: Vec<Condition>,
        /// Relationships collected into the result, one column each.
        collect: Vec<Relation>,
        order_by: Vec<String>,
        skip: Option<u64>,
        limit: Option<u64>,
    },
    /// Upsert on the key properties; each pair is (property, param).
    Merge {
        keys: Vec<(String, String)>,
        set: Vec<(Target, String)>,
    },
    Set {
        conditions: Vec<Condition>,
        set: Vec<(Target, String)>,
    },
    DetachDelete {
        conditions: Vec<Condition>,
    },
    NodeProperties,
}

/// Where a field lives on the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Property(String),
    Relation(Relation),
}

/// Incoming relationship from a labelled node, read through one property.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub rel_type: String,
    pub label: String,
    pub property: String,
    /// Column name the collected values are returned under.
    pub alias: String,
}

impl Relation {
    /// The mapping native name this relation was parsed from.
    pub fn native(&self) -> String {
        format!("<-{}-{}.{}", self.rel_type, self.label, self.property)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub target: Target,
    /// The property holds a list; match if any element does.
    pub list: bool,
    pub operator: Operator,
    pub param: String,
    pub fold: bool,
}

impl Target {
    pub fn from_binding(binding: &FieldBinding) -> EngineResult<Self> {
        let Some(rest) = binding.native.strip_prefix("<-") else {
            return Ok(Target::Property(binding.native.clone()));
        };
        let parsed = rest.split_once('-').and_then(|(rel_type, node)| {
            node.split_once('.')
                .map(|(label, property)| (rel_type, label, property))
        });
        match parsed {
            Some((rel_type, label, property))
                if !rel_type.is_empty() && !label.is_empty() && !property.is_empty() =>
            {
                Ok(Target::Relation(Relation {
                    rel_type: rel_type.to_string(),
                    label: label.to_string(),
                    property: property.to_string(),
                    alias: binding.canonical.clone(),
                }))
            }
            _ => Err(EngineError::Config(format!(
                "graph mapping '{}' for '{}' is not of the form <-TYPE-Label.property",
                binding.native, binding.canonical
            ))),
        }
    }
}

impl ToCypher for Intent {
    fn to_cypher(&self, mapping: &FieldMapping) -> EngineResult<GraphQuery> {
        let plan = Plan::new(self, mapping)?;
        let mut params = BTreeMap::new();

        let statement = match plan.operation {
            Operation::Filter | Operation::ReadByKey => {
                let conditions = build_conditions(&plan.predicates, &mut params)?;
                let mut collect = Vec::new();
                for binding in &mapping.fields {
                    if let Target::Relation(rel) = Target::from_binding(binding)? {
                        collect.push(rel);
                    }
                }
                let order_by = identity_properties(&plan)?;
                Statement::Match {
                    conditions,
                    collect,
                    order_by,
                    skip: plan.pagination.offset,
                    limit: plan.pagination.limit,
                }
            }
            Operation::Create => {
                let key_props = identity_properties(&plan)?;
                let mut keys = Vec::new();
                let mut rest = Vec::new();
                for a in &plan.assignments {
                    match Target::from_binding(a.binding)? {
                        Target::Property(prop) if key_props.contains(&prop) => {
                            let param = format!("k{}", keys.len());
                            params.insert(param.clone(), a.value.clone());
                            keys.push((prop, param));
                        }
                        _ => rest.push(a.clone()),
                    }
                }
                let set = build_assignments(&rest, &mut params)?;
                Statement::Merge { keys, set }
            }
            Operation::Update => Statement::Set {
                conditions: build_conditions(&plan.predicates, &mut params)?,
                set: build_assignments(&plan.assignments, &mut params)?,
            },
            Operation::Delete => Statement::DetachDelete {
                conditions: build_conditions(&plan.predicates, &mut params)?,
            },
            Operation::DescribeSchema => Statement::NodeProperties,
        };

        Ok(GraphQuery {
            label: mapping.native_entity.clone(),
            statement,
            params,
        })
    }
}

fn identity_properties(plan: &Plan) -> EngineResult<Vec<String>> {
    plan.mapping
        .identity_bindings()
        .map(|b| match Target::from_binding(b)? {
            Target::Property(prop) => Ok(prop),
            Target::Relation(_) => Err(EngineError::unsupported(
                BackendKind::Graph,
                format!("identity field '{}' must be a node property", b.canonical),
            )),
        })
        .collect()
}

fn build_conditions(
    predicates: &[Bound],
    params: &mut BTreeMap<String, Value>,
) -> EngineResult<Vec<Condition>> {
    predicates
        .iter()
        .map(|p| {
            let param = format!("p{}", params.len());
            params.insert(param.clone(), p.value.clone());
            let target = Target::from_binding(p.binding)?;
            Ok(Condition {
                list: matches!(target, Target::Property(_)) && p.binding.field_type == FieldType::TextList,
                target,
                operator: p.operator,
                param,
                fold: p.fold,
            })
        })
        .collect()
}

fn build_assignments(
    assignments: &[Assignment],
    params: &mut BTreeMap<String, Value>,
) -> EngineResult<Vec<(Target, String)>> {
    assignments
        .iter()
        .map(|a| {
            let param = format!("s{}", params.len());
            params.insert(param.clone(), a.value.clone());
            Ok((Target::from_binding(a.binding)?, param))
        })
        .collect()
}

/// Boolean test of `subject` against `$param`.
fn test(subject: &str, operator: Operator, param: &str, fold: bool) -> String {
    let (lhs, rhs) = if fold {
        (format!("toLower({})", subject), format!("toLower(${})", param))
    } else {
        (subject.to_string(), format!("${}", param))
    };
    match operator {
        Operator::Equals => format!("{} = {}", lhs, rhs),
        Operator::Contains => format!("{} CONTAINS {}", lhs, rhs),
        Operator::GreaterThan => format!("{} > {}", lhs, rhs),
        Operator::LessThan => format!("{} < {}", lhs, rhs),
        Operator::InSet if fold => format!("{} IN [v IN ${} | toLower(v)]", lhs, param),
        Operator::InSet => format!("{} IN ${}", lhs, param),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Property(prop) if self.list => write!(
                f,
                "ANY(item IN m.{} WHERE {})",
                prop,
                test("item", self.operator, &self.param, self.fold)
            ),
            Target::Property(prop) => {
                write!(f, "{}", test(&format!("m.{}", prop), self.operator, &self.param, self.fold))
            }
            Target::Relation(rel) => write!(
                f,
                "EXISTS {{ MATCH (m)<-[:{}]-(r:{}) WHERE {} }}",
                rel.rel_type,
                rel.label,
                test(&format!("r.{}", rel.property), self.operator, &self.param, self.fold)
            ),
        }
    }
}

fn where_clause(conditions: &[Condition]) -> Option<String> {
    if conditions.is_empty() {
        return None;
    }
    let parts: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
    Some(format!("WHERE {}", parts.join(" AND ")))
}

/// SET for properties, then replace-all blocks for relations.
fn set_lines(set: &[(Target, String)]) -> Vec<String> {
    let mut lines = Vec::new();
    let props: Vec<String> = set
        .iter()
        .filter_map(|(t, param)| match t {
            Target::Property(prop) => Some(format!("m.{} = ${}", prop, param)),
            Target::Relation(_) => None,
        })
        .collect();
    if !props.is_empty() {
        lines.push(format!("SET {}", props.join(", ")));
    }
    for (i, (target, param)) in set.iter().enumerate() {
        if let Target::Relation(rel) = target {
            lines.push("WITH m".to_string());
            lines.push(format!(
                "OPTIONAL MATCH (m)<-[old{i}:{}]-(:{})",
                rel.rel_type, rel.label
            ));
            lines.push(format!("DELETE old{i}"));
            lines.push("WITH DISTINCT m".to_string());
            lines.push(format!(
                "FOREACH (value IN ${} | MERGE (n:{} {{{}: value}}) MERGE (m)<-[:{}]-(n))",
                param, rel.label, rel.property, rel.rel_type
            ));
        }
    }
    lines
}

impl fmt::Display for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = Vec::new();
        if !self.params.is_empty() {
            let params: serde_json::Map<String, serde_json::Value> =
                self.params.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
            lines.push(format!(":params {}", serde_json::Value::Object(params)));
        }

        match &self.statement {
            Statement::Match {
                conditions,
                collect,
                order_by,
                skip,
                limit,
            } => {
                lines.push(format!("MATCH (m:{})", self.label));
                lines.extend(where_clause(conditions));
                let mut returns = vec!["m".to_string()];
                for (i, rel) in collect.iter().enumerate() {
                    lines.push(format!(
                        "OPTIONAL MATCH (m)<-[:{}]-(r{i}:{})",
                        rel.rel_type, rel.label
                    ));
                    returns.push(format!("collect(DISTINCT r{i}.{}) AS {}", rel.property, rel.alias));
                }
                lines.push(format!("RETURN {}", returns.join(", ")));
                if !order_by.is_empty() {
                    let keys: Vec<String> = order_by.iter().map(|p| format!("m.{}", p)).collect();
                    lines.push(format!("ORDER BY {}", keys.join(", ")));
                }
                if let Some(skip) = skip {
                    lines.push(format!("SKIP {}", skip));
                }
                if let Some(limit) = limit {
                    lines.push(format!("LIMIT {}", limit));
                }
            }
            Statement::Merge { keys, set } => {
                let keys: Vec<String> = keys.iter().map(|(p, param)| format!("{}: ${}", p, param)).collect();
                lines.push(format!("MERGE (m:{} {{{}}})", self.label, keys.join(", ")));
                lines.extend(set_lines(set));
                lines.push("RETURN count(DISTINCT m) AS affected".to_string());
            }
            Statement::Set { conditions, set } => {
                lines.push(format!("MATCH (m:{})", self.label));
                lines.extend(where_clause(conditions));
                lines.extend(set_lines(set));
                lines.push("RETURN count(DISTINCT m) AS affected".to_string());
            }
            Statement::DetachDelete { conditions } => {
                lines.push(format!("MATCH (m:{})", self.label));
                lines.extend(where_clause(conditions));
                lines.push("DETACH DELETE m".to_string());
            }
            Statement::NodeProperties => {
                lines.push(format!(
                    "CALL db.schema.nodeTypeProperties() YIELD nodeLabels, propertyName \
                     WHERE '{}' IN nodeLabels RETURN DISTINCT propertyName",
                    self.label
                ));
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::movie_mapping;

    fn translate(intent: Intent) -> GraphQuery {
        intent.to_cypher(&movie_mapping(BackendKind::Graph)).unwrap()
    }

    #[test]
    fn test_match_with_relationship_filter() {
        let query = translate(
            Intent::filter("movies")
                .eq("year", 1993)
                .contains_ci("director", "spielberg"),
        );
        let text = query.to_string();
        assert!(text.contains("MATCH (m:Movie)\nWHERE m.year = $p0 AND EXISTS { MATCH (m)<-[:DIRECTED]-(r:Person) WHERE toLower(r.name) CONTAINS toLower($p1) }"));
        assert!(text.contains("collect(DISTINCT r0.name) AS director"));
        assert!(text.contains("ORDER BY m.title, m.year"));
        assert_eq!(query.params["p1"], Value::from("spielberg"));
    }

    #[test]
    fn test_list_property() {
        let query = translate(Intent::filter("movies").eq("genre", "Drama"));
        assert!(query.to_string().contains("WHERE ANY(item IN m.genres WHERE item = $p0)"));
    }

    #[test]
    fn test_skip_before_limit() {
        let text = translate(Intent::filter("movies").limit(5).offset(10)).to_string();
        assert!(text.ends_with("SKIP 10\nLIMIT 5"));
    }

    #[test]
    fn test_merge() {
        let query = translate(
            Intent::create("movies")
                .value("title", "Inception")
                .value("year", 2010)
                .value("director", vec!["Christopher Nolan"]),
        );
        let text = query.to_string();
        assert!(text.contains("MERGE (m:Movie {title: $k0, year: $k1})"));
        assert!(text.contains("FOREACH (value IN $s2 | MERGE (n:Person {name: value}) MERGE (m)<-[:DIRECTED]-(n))"));
        assert_eq!(query.params["s2"], Value::from(vec!["Christopher Nolan"]));
    }

    #[test]
    fn test_detach_delete() {
        let text = translate(Intent::delete("movies").eq("title", "Hook").eq("year", 1991)).to_string();
        assert!(text.ends_with("MATCH (m:Movie)\nWHERE m.title = $p0 AND m.year = $p1\nDETACH DELETE m"));
    }

    #[test]
    fn test_bad_relation_mapping() {
        let mapping = movie_mapping(BackendKind::Graph)
            .with_native("director", "<-DIRECTED")
            .unwrap();
        let err = Intent::filter("movies").eq("director", "x").to_cypher(&mapping).unwrap_err();
        assert!(err.to_string().contains("<-TYPE-Label.property"));
    }
}
