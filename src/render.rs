//! Console rendering of query results.
//!
//! Each row is rendered as one line, either through the query's line template
//! or as a `column: value` listing. Templates substitute `{field}` and
//! `{nested.path}` placeholders, `{#}` for the 1-based rank, and accept the
//! format specs `.N` (fixed decimals) and `join=SEP` (join list items).

use crate::db::{QueryResult, Row, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;
use regex::Regex;
use std::sync::OnceLock;

/// Placeholder pattern: `{path}` or `{path:spec}`.
fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([^{}:]+)(?::([^{}]*))?\}").expect("placeholder pattern is valid")
    })
}

/// How a placeholder's value is formatted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFormat {
    /// The value's display string.
    Plain,
    /// Numeric value with a fixed number of decimals.
    Precision(usize),
    /// List items joined with a separator.
    Join(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { path: String, format: FieldFormat },
}

/// A parsed line template.
#[derive(Debug, Clone, PartialEq)]
pub struct LineTemplate {
    segments: Vec<Segment>,
}

impl LineTemplate {
    /// Parses a template, rejecting stray braces and unknown format specs.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_literal(&mut segments, &template[last..whole.start()])?;

            let path = caps[1].trim().to_string();
            let format = match caps.get(2).map(|m| m.as_str()) {
                None | Some("") => FieldFormat::Plain,
                Some(spec) => parse_format(spec)?,
            };
            segments.push(Segment::Field { path, format });
            last = whole.end();
        }
        push_literal(&mut segments, &template[last..])?;

        Ok(Self { segments })
    }

    /// Renders one row. `rank` is the 1-based position of the row.
    pub fn render(&self, rank: usize, result: &QueryResult, row: &Row) -> String {
        let mut line = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => line.push_str(text),
                Segment::Field { path, format } if path == "#" => {
                    line.push_str(&format_value(&Value::from(rank), format));
                }
                Segment::Field { path, format } => {
                    let value = result.lookup(row, path).unwrap_or(&Value::Null);
                    line.push_str(&format_value(value, format));
                }
            }
        }
        line
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    if text.contains('{') || text.contains('}') {
        return Err(HarnessError::config(format!(
            "Unbalanced brace in line template near '{text}'"
        )));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn parse_format(spec: &str) -> Result<FieldFormat> {
    if let Some(digits) = spec.strip_prefix('.') {
        return digits
            .parse::<usize>()
            .map(FieldFormat::Precision)
            .map_err(|_| HarnessError::config(format!("Invalid precision '{spec}'")));
    }
    if let Some(separator) = spec.strip_prefix("join=") {
        return Ok(FieldFormat::Join(separator.to_string()));
    }
    Err(HarnessError::config(format!(
        "Unknown format spec '{spec}'. Expected '.N' or 'join=SEP'"
    )))
}

fn format_value(value: &Value, format: &FieldFormat) -> String {
    match (format, value) {
        (FieldFormat::Precision(digits), Value::Int(_) | Value::Float(_)) => {
            let number = value.as_f64().unwrap_or_default();
            format!("{number:.digits$}")
        }
        (FieldFormat::Join(separator), Value::List(items)) => items
            .iter()
            .map(Value::to_display_string)
            .collect::<Vec<_>>()
            .join(separator),
        _ => value.to_display_string(),
    }
}

/// Renders a full result for the console: heading, then one line per row,
/// or the query's empty message when there are no rows.
pub fn render_result(spec: &QuerySpec, result: &QueryResult) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(result.rows.len() + 1);

    if let Some(heading) = &spec.heading {
        lines.push(heading.clone());
    }

    if result.is_empty() {
        if let Some(empty) = &spec.empty {
            lines.push(empty.clone());
        }
        return Ok(lines);
    }

    match &spec.line {
        Some(template) => {
            let template = LineTemplate::parse(template)?;
            for (i, row) in result.rows.iter().enumerate() {
                lines.push(template.render(i + 1, result, row));
            }
        }
        None => {
            for row in &result.rows {
                let fields: Vec<String> = result
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, value)| format!("{}: {}", col.name, value))
                    .collect();
                lines.push(fields.join(", "));
            }
        }
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn movies() -> QueryResult {
        QueryResult::from_records(vec![
            vec![
                ("title".into(), "Toy Story (1995)".into()),
                ("avg".into(), Value::Float(3.92093)),
                ("genres".into(), Value::List(vec!["Animation".into(), "Comedy".into()])),
            ],
            vec![
                ("title".into(), "Heat (1995)".into()),
                ("avg".into(), Value::Int(4)),
                ("genres".into(), Value::List(vec!["Action".into()])),
            ],
        ])
    }

    #[test]
    fn test_render_with_template() {
        let spec = QuerySpec::new("q", "b").with_line("{#}. {title}: {avg:.2} ({genres:join=|})");
        let lines = render_result(&spec, &movies()).unwrap();
        assert_eq!(
            lines,
            vec![
                "1. Toy Story (1995): 3.92 (Animation|Comedy)",
                "2. Heat (1995): 4.00 (Action)",
            ]
        );
    }

    #[test]
    fn test_render_default_line() {
        let spec = QuerySpec::new("q", "b");
        let lines = render_result(&spec, &movies()).unwrap();
        assert_eq!(lines[1], "title: Heat (1995), avg: 4, genres: [Action]");
    }

    #[test]
    fn test_render_nested_path() {
        let result = QueryResult::from_records(vec![vec![(
            "ratings".into(),
            Value::Map(vec![("average".into(), Value::Float(4.5))]),
        )]]);
        let spec = QuerySpec::new("q", "b").with_line("avg {ratings.average:.1}");
        assert_eq!(render_result(&spec, &result).unwrap(), vec!["avg 4.5"]);
    }

    #[test]
    fn test_render_empty_message_and_heading() {
        let spec = QuerySpec {
            heading: Some("Top 10:".to_string()),
            empty: Some("No direct path found".to_string()),
            ..QuerySpec::new("q", "b")
        };
        let lines = render_result(&spec, &QueryResult::new()).unwrap();
        assert_eq!(lines, vec!["Top 10:", "No direct path found"]);
    }

    #[test]
    fn test_missing_field_renders_null() {
        let spec = QuerySpec::new("q", "b").with_line("{nope}");
        assert_eq!(render_result(&spec, &movies()).unwrap()[0], "NULL");
    }

    #[test]
    fn test_parse_rejects_stray_brace() {
        assert!(LineTemplate::parse("{title").is_err());
        assert!(LineTemplate::parse("title}").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_spec() {
        let err = LineTemplate::parse("{avg:x}").unwrap_err();
        assert!(err.to_string().contains("Unknown format spec"));
    }

    #[test]
    fn test_precision_ignored_for_text() {
        let spec = QuerySpec::new("q", "b").with_line("{title:.3}");
        assert_eq!(
            render_result(&spec, &movies()).unwrap()[1],
            "Heat (1995)"
        );
    }
}
