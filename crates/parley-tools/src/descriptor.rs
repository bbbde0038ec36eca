use parley_llm::ToolDefinition;
use serde_json::{Map, Value, json};

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Map a JSON-schema type name. Unknown names are treated as `object`.
    #[must_use]
    pub fn from_schema_name(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            _ => Self::Object,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    /// Property schema as received, kept so nested shapes (`items`, `enum`)
    /// survive a round trip to the chat endpoint.
    pub schema: Option<Value>,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: String::new(),
            required: false,
            schema: None,
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn property_schema(&self) -> Value {
        if let Some(schema) = &self.schema {
            return schema.clone();
        }
        let mut prop = Map::new();
        prop.insert("type".into(), Value::String(self.ty.as_str().into()));
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        Value::Object(prop)
    }
}

/// Name, description, and parameter schema of one callable tool.
///
/// The same shape describes local and remote tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Build a descriptor from a JSON-schema object (`properties` + `required`).
    ///
    /// Property types given as `["T", "null"]` or `anyOf` with a null branch
    /// resolve to `T`. A property without a type is treated as `object`.
    #[must_use]
    pub fn from_input_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let params = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(pname, prop)| {
                        let obj = prop.as_object();
                        let ty = obj
                            .and_then(|o| {
                                o.get("type")
                                    .and_then(Value::as_str)
                                    .or_else(|| extract_non_null_type(o))
                            })
                            .map_or(ParamType::Object, ParamType::from_schema_name);
                        let description = obj
                            .and_then(|o| o.get("description"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned();
                        ParamSpec {
                            name: pname.clone(),
                            ty,
                            description,
                            required: required.contains(&pname.as_str()),
                            schema: Some(prop.clone()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            params,
        }
    }

    #[must_use]
    pub fn find_param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// `{"type":"object","properties":{..},"required":[..]}`
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.property_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    #[must_use]
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema(),
        }
    }
}

/// Primary type of a nullable property: `"type": ["T", "null"]` or
/// `"anyOf": [{"type": "T"}, {"type": "null"}]`.
fn extract_non_null_type(obj: &Map<String, Value>) -> Option<&str> {
    if let Some(arr) = obj.get("type").and_then(Value::as_array) {
        return arr.iter().filter_map(Value::as_str).find(|t| *t != "null");
    }
    obj.get("anyOf")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|o| o.get("type")?.as_str())
        .find(|t| *t != "null")
}
