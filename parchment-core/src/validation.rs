//! C4 — Validation engine. Typed parameter validation for globals, fragment
//! params, and the built-in table/image fragments.

use serde_json::Value;

use crate::error::ValidationIssue;
use crate::model::{ParamKind, ParamSchema};

const THEME_PALETTE: &[&str] = &["primary", "secondary", "accent", "muted", "success", "warning", "danger"];

fn kind_name(kind: &ParamKind) -> &'static str {
    match kind {
        ParamKind::String => "string",
        ParamKind::Integer => "integer",
        ParamKind::Number => "number",
        ParamKind::Boolean => "boolean",
        ParamKind::Array => "array",
        ParamKind::Object => "object",
    }
}

fn received_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_kind(kind: &ParamKind, value: &Value) -> bool {
    match kind {
        ParamKind::String => value.is_string(),
        ParamKind::Integer => value.is_i64() || value.is_u64(),
        ParamKind::Number => value.is_number(),
        ParamKind::Boolean => value.is_boolean(),
        ParamKind::Array => value.is_array(),
        ParamKind::Object => value.is_object(),
    }
}

/// Validate a flat parameter map against a typed schema list. Unknown
/// parameter names and missing required parameters are errors; type
/// coercion is never performed silently.
pub fn validate_against_schema(
    schemas: &[ParamSchema],
    params: &serde_json::Map<String, Value>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let known: std::collections::HashSet<&str> = schemas.iter().map(|s| s.name.as_str()).collect();

    for (name, _) in params {
        if !known.contains(name.as_str()) {
            issues.push(ValidationIssue {
                parameter_name: name.clone(),
                expected_type: "(none)".into(),
                received_type: "unknown parameter".into(),
                message: format!("'{name}' is not a recognized parameter"),
                suggested_examples: Vec::new(),
            });
        }
    }

    for schema in schemas {
        match params.get(&schema.name) {
            Some(value) => {
                if !matches_kind(&schema.kind, value) {
                    issues.push(ValidationIssue {
                        parameter_name: schema.name.clone(),
                        expected_type: kind_name(&schema.kind).into(),
                        received_type: received_type_name(value).into(),
                        message: format!(
                            "'{}' expected type {} but received {}",
                            schema.name,
                            kind_name(&schema.kind),
                            received_type_name(value)
                        ),
                        suggested_examples: schema.examples.clone(),
                    });
                }
            }
            None if schema.required && schema.default.is_none() => {
                issues.push(ValidationIssue {
                    parameter_name: schema.name.clone(),
                    expected_type: kind_name(&schema.kind).into(),
                    received_type: "missing".into(),
                    message: format!("'{}' is required", schema.name),
                    suggested_examples: schema.examples.clone(),
                });
            }
            None => {}
        }
    }

    issues
}

fn is_theme_or_hex_color(value: &str) -> bool {
    THEME_PALETTE.contains(&value) || is_hex_color(value)
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_number_format(fmt: &str) -> bool {
    match fmt {
        "percent" | "decimal" | "integer" | "accounting" => true,
        other => other.starts_with("currency:") && other.len() > "currency:".len(),
    }
}

/// Structural validation for the built-in table fragment (spec §4.4).
pub fn validate_table_fragment(params: &serde_json::Map<String, Value>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let issue = |name: &str, msg: String| ValidationIssue {
        parameter_name: name.into(),
        expected_type: "table constraint".into(),
        received_type: "invalid".into(),
        message: msg,
        suggested_examples: Vec::new(),
    };

    let rows = params.get("rows").and_then(|v| v.as_array());
    let has_header = params.get("has_header").and_then(|v| v.as_bool()).unwrap_or(false);

    let row_len = match rows {
        None | Some([]) => {
            issues.push(issue("rows", "rows must be a non-empty row matrix".into()));
            None
        }
        Some(rows) => {
            let mut width = None;
            for (i, row) in rows.iter().enumerate() {
                let Some(cells) = row.as_array() else {
                    issues.push(issue("rows", format!("row {i} is not an array")));
                    continue;
                };
                match width {
                    None => width = Some(cells.len()),
                    Some(w) if w != cells.len() => {
                        issues.push(issue("rows", format!("row {i} has {} columns, expected {w}", cells.len())));
                    }
                    _ => {}
                }
            }
            width
        }
    };

    if let Some(alignments) = params.get("column_alignments").and_then(|v| v.as_array()) {
        for a in alignments {
            if !matches!(a.as_str(), Some("left") | Some("center") | Some("right")) {
                issues.push(issue("column_alignments", format!("'{a}' is not one of left, center, right")));
            }
        }
    }

    if let Some(formats) = params.get("number_format").and_then(|v| v.as_array()) {
        for f in formats {
            if let Some(s) = f.as_str() {
                if !is_valid_number_format(s) {
                    issues.push(issue("number_format", format!("'{s}' is not a recognized number format")));
                }
            }
        }
    }

    for key in ["header_color"] {
        if let Some(color) = params.get(key).and_then(|v| v.as_str()) {
            if !is_theme_or_hex_color(color) {
                issues.push(issue(key, format!("'{color}' is not a theme color or #RRGGBB hex value")));
            }
        }
    }
    if let Some(colors) = params.get("highlight_colors").and_then(|v| v.as_array()) {
        for c in colors {
            if let Some(s) = c.as_str() {
                if !is_theme_or_hex_color(s) {
                    issues.push(issue("highlight_colors", format!("'{s}' is not a theme color or #RRGGBB hex value")));
                }
            }
        }
    }

    if let (Some(indices), Some(width)) = (params.get("highlight_rows").and_then(|v| v.as_array()), row_len) {
        let _ = width;
        let row_count = rows.map(|r| r.len()).unwrap_or(0);
        for idx in indices {
            if let Some(i) = idx.as_u64() {
                if i as usize >= row_count {
                    issues.push(issue("highlight_rows", format!("row index {i} is out of range")));
                }
            }
        }
    }
    if let (Some(indices), Some(width)) = (params.get("highlight_cols").and_then(|v| v.as_array()), row_len) {
        for idx in indices {
            if let Some(i) = idx.as_u64() {
                if i as usize >= width {
                    issues.push(issue("highlight_cols", format!("column index {i} is out of range")));
                }
            }
        }
    }

    if let Some(sort_by) = params.get("sort_by").and_then(|v| v.as_array()) {
        if !has_header {
            issues.push(issue("sort_by", "sort_by requires has_header=true".into()));
        } else if let Some(header_row) = rows.and_then(|r| r.first()).and_then(|r| r.as_array()) {
            let header_strs: Vec<String> = header_row.iter().filter_map(|v| v.as_str().map(String::from)).collect();
            for col in sort_by {
                if let Some(name) = col.as_str() {
                    if !header_strs.iter().any(|h| h == name) {
                        issues.push(issue("sort_by", format!("column '{name}' not present in the header row")));
                    }
                }
            }
        }
    }

    if let Some(widths) = params.get("column_widths").and_then(|v| v.as_array()) {
        let sum: f64 = widths.iter().filter_map(|v| v.as_f64()).sum();
        if sum > 100.0 {
            issues.push(issue("column_widths", format!("column_widths sum to {sum}%, must be <= 100%")));
        }
    }

    issues
}

/// Validation for `add_image_fragment` structural params (HTTPS/format
/// checks are performed by the image validator at add-time, see C11; this
/// covers only the shape of the parameters themselves).
pub fn validate_image_fragment(params: &serde_json::Map<String, Value>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if !matches!(params.get("image_url"), Some(Value::String(s)) if !s.is_empty()) {
        issues.push(ValidationIssue {
            parameter_name: "image_url".into(),
            expected_type: "string".into(),
            received_type: params.get("image_url").map(received_type_name).unwrap_or("missing").into(),
            message: "image_url is required and must be a non-empty string".into(),
            suggested_examples: vec![Value::String("https://example.com/chart.png".into())],
        });
    }
    if let Some(alignment) = params.get("alignment").and_then(|v| v.as_str()) {
        if !matches!(alignment, "left" | "center" | "right") {
            issues.push(ValidationIssue {
                parameter_name: "alignment".into(),
                expected_type: "one of left, center, right".into(),
                received_type: "string".into(),
                message: format!("'{alignment}' is not a valid alignment"),
                suggested_examples: Vec::new(),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn unknown_parameter_is_error() {
        let schemas = vec![ParamSchema { name: "title".into(), kind: ParamKind::String, required: true, default: None, examples: vec![], description: String::new() }];
        let issues = validate_against_schema(&schemas, &obj(json!({"title": "x", "bogus": 1})));
        assert!(issues.iter().any(|i| i.parameter_name == "bogus"));
    }

    #[test]
    fn missing_required_is_error() {
        let schemas = vec![ParamSchema { name: "title".into(), kind: ParamKind::String, required: true, default: None, examples: vec![], description: String::new() }];
        let issues = validate_against_schema(&schemas, &obj(json!({})));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].parameter_name, "title");
    }

    #[test]
    fn type_mismatch_is_error_without_coercion() {
        let schemas = vec![ParamSchema { name: "count".into(), kind: ParamKind::Integer, required: true, default: None, examples: vec![], description: String::new() }];
        let issues = validate_against_schema(&schemas, &obj(json!({"count": "3"})));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].received_type, "string");
    }

    #[test]
    fn table_requires_uniform_columns() {
        let issues = validate_table_fragment(&obj(json!({"rows": [["a","b"],["c"]]})));
        assert!(!issues.is_empty());
    }

    #[test]
    fn table_column_widths_over_100_is_error() {
        let issues = validate_table_fragment(&obj(json!({"rows": [["a"]], "column_widths": [60, 60]})));
        assert!(issues.iter().any(|i| i.parameter_name == "column_widths"));
    }

    #[test]
    fn table_sort_by_requires_header() {
        let issues = validate_table_fragment(&obj(json!({"rows": [["a","b"]], "sort_by": ["a"], "has_header": false})));
        assert!(issues.iter().any(|i| i.parameter_name == "sort_by"));
    }
}
