//! In-memory document store for `file://` endpoints.
//!
//! Evaluates the same find/aggregate bodies as the MongoDB client over a JSON
//! array of documents, covering the operators and stages the bundled query
//! sets use.

use async_trait::async_trait;
use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, info};

use super::document::DocumentQuery;
use crate::db::{Backend, BackendKind, QueryResult, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;

type Document = Map<String, JsonValue>;

/// A read-only document collection held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Vec<Document>,
}

impl MemoryDocumentStore {
    /// Creates a store from JSON objects; other values are rejected.
    pub fn new(documents: Vec<JsonValue>) -> Result<Self> {
        let documents = documents
            .into_iter()
            .enumerate()
            .map(|(i, doc)| match doc {
                JsonValue::Object(map) => Ok(map),
                other => Err(HarnessError::config(format!(
                    "Document {i} is not an object: {other}"
                ))),
            })
            .collect::<Result<_>>()?;
        Ok(Self { documents })
    }

    /// Loads a JSON array of documents from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::connection(format!("Cannot read {}: {e}", path.display())))?;
        let documents: Vec<JsonValue> = serde_json::from_str(&content).map_err(|e| {
            HarnessError::config(format!(
                "{} must contain a JSON array of documents: {e}",
                path.display()
            ))
        })?;

        info!("Loaded {} documents from {}", documents.len(), path.display());
        Self::new(documents)
    }

    /// Evaluates a parsed query, honouring an optional row limit.
    pub fn evaluate(&self, query: &DocumentQuery, limit: Option<usize>) -> Result<Vec<Document>> {
        match query {
            DocumentQuery::Find {
                filter,
                projection,
                sort,
            } => {
                let mut docs = Vec::new();
                for doc in &self.documents {
                    if matches_filter(doc, filter)? {
                        docs.push(doc.clone());
                    }
                }
                if let Some(sort) = sort {
                    sort_documents(&mut docs, sort)?;
                }
                if let Some(limit) = limit {
                    docs.truncate(limit);
                }
                match projection {
                    Some(projection) => docs.iter().map(|d| project(d, projection)).collect(),
                    None => Ok(docs),
                }
            }
            DocumentQuery::Aggregate { pipeline } => {
                let mut docs = self.documents.clone();
                for stage in pipeline {
                    docs = apply_stage(docs, stage)?;
                }
                if let Some(limit) = limit {
                    docs.truncate(limit);
                }
                Ok(docs)
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryDocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let query = DocumentQuery::parse(&spec.body)?;
        let docs = self.evaluate(&query, spec.limit)?;
        debug!("'{}' matched {} documents", spec.label, docs.len());

        let records = docs
            .into_iter()
            .map(|doc| {
                doc.into_iter()
                    .map(|(key, value)| (key, Value::from_json(value)))
                    .collect()
            })
            .collect();
        Ok(QueryResult::from_records(records))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Resolves a dotted path; numeric segments index into arrays, and a key
/// that itself contains dots (e.g. `"5.0"`) is matched before splitting.
fn resolve<'a>(doc: &'a Document, path: &str) -> Option<&'a JsonValue> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let segments: Vec<&str> = path.split('.').collect();
    for take in (1..segments.len()).rev() {
        let head = segments[..take].join(".");
        if let Some(value) = doc.get(&head) {
            if let Some(found) = resolve_value(value, &segments[take..].join(".")) {
                return Some(found);
            }
        }
    }
    None
}

fn resolve_value<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    match value {
        JsonValue::Object(map) => resolve(map, path),
        JsonValue::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let item = items.get(head.parse::<usize>().ok()?)?;
            match rest {
                Some(rest) => resolve_value(item, rest),
                None => Some(item),
            }
        }
        _ => None,
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> Result<bool> {
    for (path, condition) in filter {
        if !matches_condition(resolve(doc, path), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_object(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_condition(field: Option<&JsonValue>, condition: &JsonValue) -> Result<bool> {
    let JsonValue::Object(operators) = condition else {
        return Ok(equals(field, condition));
    };
    if !is_operator_object(condition) {
        return Ok(equals(field, condition));
    }

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(field, operand),
            "$ne" => !equals(field, operand),
            "$gt" => compare_any(field, operand, |o| o == Ordering::Greater),
            "$gte" => compare_any(field, operand, |o| o != Ordering::Less),
            "$lt" => compare_any(field, operand, |o| o == Ordering::Less),
            "$lte" => compare_any(field, operand, |o| o != Ordering::Greater),
            "$in" => {
                let JsonValue::Array(candidates) = operand else {
                    return Err(HarnessError::query("$in requires an array"));
                };
                candidates.iter().any(|candidate| equals(field, candidate))
            }
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                field.is_some() == wanted
            }
            other => {
                return Err(HarnessError::query(format!(
                    "Unsupported filter operator '{other}'"
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array-contains semantics: an array field matches a scalar
/// operand when any element equals it.
fn equals(field: Option<&JsonValue>, operand: &JsonValue) -> bool {
    match field {
        None => operand.is_null(),
        Some(value) if values_equal(value, operand) => true,
        Some(JsonValue::Array(items)) => items.iter().any(|item| values_equal(item, operand)),
        Some(_) => false,
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_any(
    field: Option<&JsonValue>,
    operand: &JsonValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match field {
        Some(JsonValue::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, operand).is_some_and(&accept)),
        Some(value) => compare_values(value, operand).is_some_and(accept),
        None => false,
    }
}

/// Orders two values of the same type; mixed types are incomparable.
fn compare_values(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(_), JsonValue::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing/null first, then numbers, strings,
/// booleans, containers.
fn sort_key_order(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Number(_)) => 1,
            Some(JsonValue::String(_)) => 2,
            Some(JsonValue::Bool(_)) => 3,
            Some(JsonValue::Array(_)) => 4,
            Some(JsonValue::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) -> Result<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (path, direction) in sort {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(HarnessError::query(format!(
                    "Sort direction for '{path}' must be 1 or -1"
                )))
            }
        };
        keys.push((path.as_str(), descending));
    }

    // Stable, so ties keep their input order.
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(path, descending)| {
                let ordering = sort_key_order(resolve(a, path), resolve(b, path));
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(())
}

/// Inserts `value` at a dotted path, creating intermediate objects.
fn insert_path(doc: &mut Document, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    if doc.remove(path).is_some() {
        return;
    }
    if let Some((head, rest)) = path.split_once('.') {
        if let Some(JsonValue::Object(inner)) = doc.get_mut(head) {
            remove_path(inner, rest);
        }
    }
}

/// Evaluates a `$field` reference or an expression operator.
fn evaluate_expression(doc: &Document, expr: &JsonValue) -> Result<JsonValue> {
    match expr {
        JsonValue::String(s) if s.starts_with('$') => {
            Ok(resolve(doc, &s[1..]).cloned().unwrap_or(JsonValue::Null))
        }
        JsonValue::Object(map) if is_operator_object(expr) && map.len() == 1 => {
            let (op, operand) = map.iter().next().ok_or_else(|| {
                HarnessError::internal("operator object has no entries")
            })?;
            match op.as_str() {
                "$size" => match evaluate_expression(doc, operand)? {
                    JsonValue::Array(items) => Ok(JsonValue::from(items.len())),
                    other => Err(HarnessError::query(format!(
                        "$size requires an array, got {other}"
                    ))),
                },
                other => Err(HarnessError::query(format!(
                    "Unsupported expression operator '{other}'"
                ))),
            }
        }
        other => Ok(other.clone()),
    }
}

fn is_truthy_flag(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// Applies a projection. Inclusion projections keep `_id` unless it is
/// excluded explicitly; computed fields count as inclusions.
fn project(doc: &Document, projection: &Document) -> Result<Document> {
    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && is_truthy_flag(value) != Some(false));

    if !inclusive {
        let mut out = doc.clone();
        for (path, _) in projection {
            remove_path(&mut out, path);
        }
        return Ok(out);
    }

    let mut out = Map::new();
    let keep_id = projection
        .get("_id")
        .and_then(is_truthy_flag)
        .unwrap_or(true);
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }

    for (path, spec) in projection {
        if path == "_id" {
            continue;
        }
        match is_truthy_flag(spec) {
            Some(true) => {
                if let Some(value) = resolve(doc, path) {
                    insert_path(&mut out, path, value.clone());
                }
            }
            Some(false) => {
                return Err(HarnessError::query(format!(
                    "Cannot exclude '{path}' in an inclusion projection"
                )))
            }
            None => {
                let value = evaluate_expression(doc, spec)?;
                insert_path(&mut out, path, value);
            }
        }
    }
    Ok(out)
}

fn apply_stage(docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    if stage.len() != 1 {
        return Err(HarnessError::query(
            "Each pipeline stage must have exactly one operator",
        ));
    }
    let Some((name, spec)) = stage.iter().next() else {
        return Ok(docs);
    };

    match name.as_str() {
        "$match" => {
            let filter = spec
                .as_object()
                .ok_or_else(|| HarnessError::query("$match requires an object"))?;
            let mut out = Vec::new();
            for doc in docs {
                if matches_filter(&doc, filter)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        "$project" => {
            let projection = spec
                .as_object()
                .ok_or_else(|| HarnessError::query("$project requires an object"))?;
            docs.iter().map(|doc| project(doc, projection)).collect()
        }
        "$unwind" => {
            let path = spec
                .as_str()
                .and_then(|s| s.strip_prefix('$'))
                .ok_or_else(|| HarnessError::query("$unwind requires a '$field' path"))?;
            let mut out = Vec::new();
            for doc in docs {
                match resolve(&doc, path).cloned() {
                    Some(JsonValue::Array(items)) => {
                        for item in items {
                            let mut copy = doc.clone();
                            insert_path(&mut copy, path, item);
                            out.push(copy);
                        }
                    }
                    Some(JsonValue::Null) | None => {}
                    Some(_) => out.push(doc),
                }
            }
            Ok(out)
        }
        "$group" => group(docs, spec),
        "$sort" => {
            let sort = spec
                .as_object()
                .ok_or_else(|| HarnessError::query("$sort requires an object"))?;
            let mut docs = docs;
            sort_documents(&mut docs, sort)?;
            Ok(docs)
        }
        "$limit" => {
            let limit = spec
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or_else(|| HarnessError::query("$limit requires a positive integer"))?;
            let mut docs = docs;
            docs.truncate(limit as usize);
            Ok(docs)
        }
        other => Err(HarnessError::query(format!(
            "Unsupported pipeline stage '{other}'"
        ))),
    }
}

#[derive(Debug)]
enum Accumulator {
    Sum(f64, bool),
    Avg(f64, usize),
    Min(Option<JsonValue>),
    Max(Option<JsonValue>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self> {
        match op {
            "$sum" => Ok(Self::Sum(0.0, true)),
            "$avg" => Ok(Self::Avg(0.0, 0)),
            "$min" => Ok(Self::Min(None)),
            "$max" => Ok(Self::Max(None)),
            other => Err(HarnessError::query(format!(
                "Unsupported accumulator '{other}'"
            ))),
        }
    }

    fn add(&mut self, value: JsonValue) {
        match self {
            Self::Sum(total, integral) => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *integral &= value.is_i64() || value.is_u64();
                }
            }
            Self::Avg(total, count) => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Self::Min(current) => {
                if !value.is_null() {
                    let replace = current.as_ref().map_or(true, |c| {
                        sort_key_order(Some(&value), Some(c)) == Ordering::Less
                    });
                    if replace {
                        *current = Some(value);
                    }
                }
            }
            Self::Max(current) => {
                if !value.is_null() {
                    let replace = current.as_ref().map_or(true, |c| {
                        sort_key_order(Some(&value), Some(c)) == Ordering::Greater
                    });
                    if replace {
                        *current = Some(value);
                    }
                }
            }
        }
    }

    fn finish(self) -> JsonValue {
        match self {
            Self::Sum(total, true) => JsonValue::from(total as i64),
            Self::Sum(total, false) => float(total),
            Self::Avg(_, 0) => JsonValue::Null,
            Self::Avg(total, count) => float(total / count as f64),
            Self::Min(value) | Self::Max(value) => value.unwrap_or(JsonValue::Null),
        }
    }
}

fn float(f: f64) -> JsonValue {
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

/// `$group`: groups appear in first-seen order.
fn group(docs: Vec<Document>, spec: &JsonValue) -> Result<Vec<Document>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| HarnessError::query("$group requires an object"))?;
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| HarnessError::query("$group requires an '_id' expression"))?;

    let mut fields = Vec::new();
    for (name, accumulator) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let (op, operand) = accumulator
            .as_object()
            .filter(|m| m.len() == 1)
            .and_then(|m| m.iter().next())
            .ok_or_else(|| {
                HarnessError::query(format!("'{name}' must be a single accumulator"))
            })?;
        Accumulator::new(op)?;
        fields.push((name.clone(), op.clone(), operand.clone()));
    }

    let mut groups: Vec<(JsonValue, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = evaluate_expression(doc, id_expr)?;
        let index = match groups.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<_>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for ((_, _, operand), accumulator) in fields.iter().zip(groups[index].1.iter_mut()) {
            accumulator.add(evaluate_expression(doc, operand)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Map::new();
            out.insert("_id".to_string(), key);
            for ((name, _, _), accumulator) in fields.iter().zip(accumulators) {
                out.insert(name.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}
