//! Closed-world argument validation against a [`ToolSpec`].

use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::tools::{DefaultValue, FieldKind, FieldSpec, ToolSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Integer(i64),
    Text(String),
    Boolean(bool),
    TextList(Vec<String>),
}

impl From<DefaultValue> for ArgValue {
    fn from(value: DefaultValue) -> Self {
        match value {
            DefaultValue::Integer(v) => ArgValue::Integer(v),
            DefaultValue::Text(v) => ArgValue::Text(v.to_string()),
            DefaultValue::Boolean(v) => ArgValue::Boolean(v),
        }
    }
}

/// Arguments that passed their tool's schema, kept in field declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Vec<(&'static str, ArgValue)>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ArgValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ArgValue::Boolean(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ArgValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fill declared defaults for omitted fields, keeping declaration order.
    pub fn with_defaults(self, spec: &ToolSpec) -> Self {
        let mut values = Vec::with_capacity(spec.fields.len());
        for field in spec.fields {
            if let Some(value) = self.get(field.name) {
                values.push((field.name, value.clone()));
            } else if let Some(default) = field.default {
                values.push((field.name, ArgValue::from(default)));
            }
        }
        Self { values }
    }
}

/// Check raw caller input against `spec`. `null` counts as an empty object.
pub fn validate(spec: &ToolSpec, raw: &Value) -> Result<ValidatedArgs, ValidationError> {
    match raw {
        Value::Null => validate_map(spec, &Map::new()),
        Value::Object(map) => validate_map(spec, map),
        _ => Err(ValidationError::new("Arguments must be a JSON object")),
    }
}

pub fn validate_map(
    spec: &ToolSpec,
    raw: &Map<String, Value>,
) -> Result<ValidatedArgs, ValidationError> {
    if let Some(unknown) = raw.keys().find(|key| spec.field(key).is_none()) {
        return Err(ValidationError::for_field(
            unknown.as_str(),
            format!("Unrecognized field '{unknown}' for {}", spec.name),
        ));
    }

    let mut values = Vec::with_capacity(raw.len());
    for field in spec.fields {
        match raw.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(ValidationError::for_field(
                        field.name,
                        format!("Missing required field '{}'", field.name),
                    ));
                }
            }
            Some(value) => values.push((field.name, check_field(field, value)?)),
        }
    }
    Ok(ValidatedArgs { values })
}

fn check_field(field: &FieldSpec, value: &Value) -> Result<ArgValue, ValidationError> {
    let key = field.name;
    let fail = |message: String| ValidationError::for_field(key, message);

    match field.kind {
        FieldKind::Integer { min, max } => {
            let n = as_integer(value).ok_or_else(|| fail(format!("'{key}' must be an integer")))?;
            if let Some(min) = min {
                if n < min {
                    return Err(fail(format!("'{key}' must be >= {min}")));
                }
            }
            if let Some(max) = max {
                if n > max {
                    return Err(fail(format!("'{key}' must be <= {max}")));
                }
            }
            Ok(ArgValue::Integer(n))
        }
        FieldKind::Text { allowed } => {
            let text = value
                .as_str()
                .ok_or_else(|| fail(format!("'{key}' must be a string")))?;
            if field.required && text.trim().is_empty() {
                return Err(fail(format!("'{key}' must not be empty")));
            }
            if let Some(allowed) = allowed {
                if !allowed.contains(&text) {
                    return Err(fail(format!(
                        "'{key}' must be one of: {}",
                        allowed.join(", ")
                    )));
                }
            }
            Ok(ArgValue::Text(text.to_string()))
        }
        FieldKind::Boolean => value
            .as_bool()
            .map(ArgValue::Boolean)
            .ok_or_else(|| fail(format!("'{key}' must be a boolean"))),
        FieldKind::TextList { min_items } => {
            let items = value
                .as_array()
                .ok_or_else(|| fail(format!("'{key}' must be an array of strings")))?;
            if items.len() < min_items {
                return Err(fail(format!(
                    "'{key}' must contain at least {min_items} item(s)"
                )));
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let text = item
                    .as_str()
                    .ok_or_else(|| fail(format!("'{key}' items must be strings")))?;
                out.push(text.to_string());
            }
            Ok(ArgValue::TextList(out))
        }
    }
}

/// Integer-valued JSON number (`5` and `5.0` both pass, `5.5` does not).
fn as_integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(n) = number.as_i64() {
        return Some(n);
    }
    let f = number.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
