//! Argument validation against a tool's JSON-Schema-shaped parameter schema
//!
//! Supports the subset tool descriptors use: `type` (single or list),
//! `required`, `properties`, `additionalProperties: false`, `enum`,
//! `pattern`, `minLength`/`maxLength`, `minimum`/`maximum` (and the exclusive
//! forms), `minItems`/`maxItems` and `items`.
//!
//! Validation stops at the first violated rule. Within an object, `required`
//! is checked in declaration order, then present properties in key order
//! (serde_json maps iterate sorted), so the reported violation is
//! deterministic for a given schema and argument set.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaRule {
    Required,
    Type,
    Enum,
    Pattern,
    MinLength,
    MaxLength,
    Minimum,
    Maximum,
    MinItems,
    MaxItems,
    AdditionalProperties,
    InvalidSchema,
}

/// The first rule an argument set violates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaViolation {
    /// Dotted path to the offending field, `items[2].name` style for arrays.
    /// Empty for the argument object itself.
    pub path: String,
    pub rule: SchemaRule,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SchemaViolation {}

pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), SchemaViolation> {
    validate_node(schema, args, "")
}

fn describe(path: &str) -> String {
    if path.is_empty() {
        "Arguments".to_string()
    } else {
        format!("Parameter '{path}'")
    }
}

fn violation(path: &str, rule: SchemaRule, message: String) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        rule,
        message,
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn json_type_name(value: &Value) -> &'static str {
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

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "number" => value.is_number(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn validate_node(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let Some(schema) = schema.as_object() else {
        // `true` / `{}` style schemas accept anything
        return Ok(());
    };

    check_type(schema, value, path)?;
    check_enum(schema, value, path)?;

    match value {
        Value::String(text) => check_string(schema, text, path)?,
        Value::Number(number) => {
            if let Some(number) = number.as_f64() {
                check_number(schema, number, path)?;
            }
        }
        Value::Array(items) => check_array(schema, items, path)?,
        Value::Object(fields) => check_object(schema, fields, path)?,
        _ => {}
    }
    Ok(())
}

fn check_type(schema: &Map<String, Value>, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let expected: Vec<&str> = match schema.get("type") {
        Some(Value::String(single)) => vec![single.as_str()],
        Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };

    if expected.is_empty() || expected.iter().any(|ty| matches_type(ty, value)) {
        return Ok(());
    }

    Err(violation(
        path,
        SchemaRule::Type,
        format!(
            "{} must be of type {}, got {}",
            describe(path),
            expected.join(" or "),
            json_type_name(value)
        ),
    ))
}

fn check_enum(schema: &Map<String, Value>, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let Some(Value::Array(allowed)) = schema.get("enum") else {
        return Ok(());
    };
    if allowed.contains(value) {
        return Ok(());
    }

    let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
    Err(violation(
        path,
        SchemaRule::Enum,
        format!(
            "{} must be one of [{}], got {}",
            describe(path),
            rendered.join(", "),
            value
        ),
    ))
}

fn check_string(schema: &Map<String, Value>, text: &str, path: &str) -> Result<(), SchemaViolation> {
    let length = text.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
        && length < min
    {
        return Err(violation(
            path,
            SchemaRule::MinLength,
            format!("{} must be at least {min} characters long", describe(path)),
        ));
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && length > max
    {
        return Err(violation(
            path,
            SchemaRule::MaxLength,
            format!("{} must be at most {max} characters long", describe(path)),
        ));
    }

    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        let regex = Regex::new(pattern).map_err(|err| {
            violation(
                path,
                SchemaRule::InvalidSchema,
                format!("Schema pattern for {} is invalid: {err}", describe(path)),
            )
        })?;
        if !regex.is_match(text) {
            return Err(violation(
                path,
                SchemaRule::Pattern,
                format!("{} must match pattern '{pattern}'", describe(path)),
            ));
        }
    }
    Ok(())
}

fn check_number(schema: &Map<String, Value>, number: f64, path: &str) -> Result<(), SchemaViolation> {
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);

    if let Some(min) = bound("minimum")
        && number < min
    {
        return Err(violation(
            path,
            SchemaRule::Minimum,
            format!("{} must be >= {min}, got {number}", describe(path)),
        ));
    }
    if let Some(min) = bound("exclusiveMinimum")
        && number <= min
    {
        return Err(violation(
            path,
            SchemaRule::Minimum,
            format!("{} must be > {min}, got {number}", describe(path)),
        ));
    }
    if let Some(max) = bound("maximum")
        && number > max
    {
        return Err(violation(
            path,
            SchemaRule::Maximum,
            format!("{} must be <= {max}, got {number}", describe(path)),
        ));
    }
    if let Some(max) = bound("exclusiveMaximum")
        && number >= max
    {
        return Err(violation(
            path,
            SchemaRule::Maximum,
            format!("{} must be < {max}, got {number}", describe(path)),
        ));
    }
    Ok(())
}

fn check_array(schema: &Map<String, Value>, items: &[Value], path: &str) -> Result<(), SchemaViolation> {
    let count = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64)
        && count < min
    {
        return Err(violation(
            path,
            SchemaRule::MinItems,
            format!("{} must contain at least {min} items, got {count}", describe(path)),
        ));
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64)
        && count > max
    {
        return Err(violation(
            path,
            SchemaRule::MaxItems,
            format!("{} must contain at most {max} items, got {count}", describe(path)),
        ));
    }

    if let Some(item_schema) = schema.get("items") {
        for (index, item) in items.iter().enumerate() {
            let item_path = if path.is_empty() {
                format!("[{index}]")
            } else {
                format!("{path}[{index}]")
            };
            validate_node(item_schema, item, &item_path)?;
        }
    }
    Ok(())
}

fn check_object(
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaViolation> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                let field_path = child_path(path, key);
                return Err(violation(
                    &field_path,
                    SchemaRule::Required,
                    format!("{} is required", describe(&field_path)),
                ));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

    for (key, value) in fields {
        let field_path = child_path(path, key);
        match properties.and_then(|props| props.get(key)) {
            Some(property_schema) => validate_node(property_schema, value, &field_path)?,
            None if closed => {
                return Err(violation(
                    &field_path,
                    SchemaRule::AdditionalProperties,
                    format!("{} is not a recognized parameter", describe(&field_path)),
                ));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "q": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "mode": {"type": "string", "enum": ["fast", "deep"]},
                "lang": {"type": "string", "pattern": "^[a-z]{2}$"},
                "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 3},
                "filters": {
                    "type": "object",
                    "properties": {"site": {"type": "string"}},
                    "required": ["site"],
                    "additionalProperties": false
                }
            },
            "required": ["q"]
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"q": "rust", "limit": 5, "mode": "fast", "lang": "en", "tags": ["a"]});
        assert!(validate_arguments(&search_schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = validate_arguments(&search_schema(), &json!({})).expect_err("q missing");
        assert_eq!(err.rule, SchemaRule::Required);
        assert_eq!(err.path, "q");
        assert!(err.message.contains("'q'"));
    }

    #[test]
    fn wrong_type_names_expected_type() {
        let err = validate_arguments(&search_schema(), &json!({"q": 42})).expect_err("type");
        assert_eq!(err.rule, SchemaRule::Type);
        assert!(err.message.contains("string"));
        assert!(err.message.contains("integer"));
    }

    #[test]
    fn reports_only_first_violation_in_key_order() {
        // both `lang` and `limit` are invalid; `lang` sorts first
        let args = json!({"q": "x", "limit": 500, "lang": "english"});
        let err = validate_arguments(&search_schema(), &args).expect_err("violation");
        assert_eq!(err.path, "lang");
        assert_eq!(err.rule, SchemaRule::Pattern);
    }

    #[test]
    fn enum_and_bounds() {
        let err = validate_arguments(&search_schema(), &json!({"q": "x", "mode": "slow"}))
            .expect_err("enum");
        assert_eq!(err.rule, SchemaRule::Enum);

        let err = validate_arguments(&search_schema(), &json!({"q": "x", "limit": 0}))
            .expect_err("minimum");
        assert_eq!(err.rule, SchemaRule::Minimum);
    }

    #[test]
    fn nested_objects_and_arrays_report_paths() {
        let err = validate_arguments(
            &search_schema(),
            &json!({"q": "x", "filters": {"site": "a", "depth": 2}}),
        )
        .expect_err("additional property");
        assert_eq!(err.path, "filters.depth");
        assert_eq!(err.rule, SchemaRule::AdditionalProperties);

        let err = validate_arguments(&search_schema(), &json!({"q": "x", "filters": {}}))
            .expect_err("nested required");
        assert_eq!(err.path, "filters.site");

        let err = validate_arguments(&search_schema(), &json!({"q": "x", "tags": ["a", 3]}))
            .expect_err("item type");
        assert_eq!(err.path, "tags[1]");

        let err = validate_arguments(
            &search_schema(),
            &json!({"q": "x", "tags": ["a", "b", "c", "d"]}),
        )
        .expect_err("array length");
        assert_eq!(err.rule, SchemaRule::MaxItems);
    }

    #[test]
    fn non_object_arguments_fail_type_check() {
        let err = validate_arguments(&search_schema(), &json!("q")).expect_err("type");
        assert_eq!(err.path, "");
        assert!(err.message.starts_with("Arguments must be of type object"));
    }
}
