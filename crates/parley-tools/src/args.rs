use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::descriptor::{ParamType, ToolDescriptor};
use crate::error::ToolError;

/// Arguments bound to a tool's declared parameters.
///
/// Each declared parameter is coerced to its declared type. Values that
/// cannot be coerced, and missing parameters, bind to `null`. Arguments the
/// descriptor does not declare are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    #[must_use]
    pub fn bind(descriptor: &ToolDescriptor, raw: &Map<String, Value>) -> Self {
        let values = descriptor
            .params
            .iter()
            .map(|p| {
                let value = raw.get(&p.name).map_or(Value::Null, |v| coerce(v, p.ty));
                (p.name.clone(), value)
            })
            .collect();
        Self { values }
    }

    /// Parse JSON-encoded arguments and bind them.
    ///
    /// Blank input is read as `{}`.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` if `json` is not a JSON object.
    pub fn parse(descriptor: &ToolDescriptor, json: &str) -> Result<Self, ToolError> {
        let raw = parse_object(json)?;
        Ok(Self::bind(descriptor, &raw))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn array(&self, name: &str) -> Option<&Vec<Value>> {
        self.get(name).and_then(Value::as_array)
    }

    #[must_use]
    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.get(name).and_then(Value::as_object)
    }

    /// Fetch a required argument, failing when it is absent.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` when `name` is missing or null.
    pub fn require(&self, name: &str) -> Result<&Value, ToolError> {
        self.get(name).ok_or_else(|| ToolError::InvalidArguments {
            message: format!("missing required parameter `{name}`"),
        })
    }

    /// Deserialize all bound arguments into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` when deserialization fails.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        let obj = Value::Object(
            self.values
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(obj).map_err(|e| ToolError::InvalidArguments {
            message: e.to_string(),
        })
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

pub(crate) fn parse_object(json: &str) -> Result<Map<String, Value>, ToolError> {
    if json.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ToolError::InvalidArguments {
            message: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(ToolError::InvalidArguments {
            message: e.to_string(),
        }),
    }
}

/// Coerce one JSON value to `ty`, or `null` when it cannot be represented.
#[must_use]
pub fn coerce(value: &Value, ty: ParamType) -> Value {
    match ty {
        ParamType::String => match value {
            Value::Null => Value::Null,
            Value::String(_) => value.clone(),
            other => Value::String(other.to_string()),
        },
        ParamType::Integer => to_integer(value).map_or(Value::Null, Value::from),
        ParamType::Number => match value {
            Value::Number(_) => value.clone(),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number),
            _ => Value::Null,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => Value::Null,
        },
        ParamType::Array => embedded_json(value, Value::is_array),
        ParamType::Object => embedded_json(value, Value::is_object),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn embedded_json(value: &Value, accept: fn(&Value) -> bool) -> Value {
    if accept(value) {
        return value.clone();
    }
    if let Value::String(s) = value
        && let Ok(parsed) = serde_json::from_str::<Value>(s)
        && accept(&parsed)
    {
        return parsed;
    }
    Value::Null
}
