//! Tool descriptors: a named callable plus its declared signature.
//!
//! Descriptors are built explicitly from a parameter table instead of being
//! derived from the callable, so the schema sent to the model is exactly what
//! was declared here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Name of the parameter the registry fills with its bound session id.
pub const SESSION_ID_PARAM: &str = "session_id";

/// Closed set of type tags used in signatures and schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    Str,
    Bool,
    Dict,
    List,
}

impl ValueType {
    /// Short tag used in the human-readable signature.
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Bool => "bool",
            ValueType::Dict => "dict",
            ValueType::List => "list",
        }
    }

    /// JSON Schema type name.
    pub fn json_type(&self) -> &'static str {
        match self {
            ValueType::Int => "integer",
            ValueType::Float => "number",
            ValueType::Str => "string",
            ValueType::Bool => "boolean",
            ValueType::Dict => "object",
            ValueType::List => "array",
        }
    }

    /// Whether a JSON value is acceptable for this tag. Integers pass as floats.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::Str => value.is_string(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Dict => value.is_object(),
            ValueType::List => value.is_array(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Provider schema shape for the tool catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFormat {
    /// `{"type": "function", "function": {name, description, parameters}}`
    #[default]
    Function,
    /// `{name, description, parameters}`
    Flat,
}

impl FromStr for SchemaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "function" => Ok(SchemaFormat::Function),
            "flat" => Ok(SchemaFormat::Flat),
            other => Err(format!("unknown schema format: {}", other)),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ValueType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
        }
    }

    /// Optional parameter, filled with `default` when the caller omits it.
    pub fn optional(name: impl Into<String>, ty: ValueType, default: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: Some(default),
            description: None,
        }
    }

    /// The injected session parameter.
    pub fn session() -> Self {
        Self::required(SESSION_ID_PARAM, ValueType::Str)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Bound arguments handed to a tool handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.0.get(name).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn i64_or(&self, name: &str, default: i64) -> i64 {
        self.0.get(name).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Session id injected by the registry.
    pub fn session_id(&self) -> anyhow::Result<&str> {
        self.str(SESSION_ID_PARAM)
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// The callable behind a descriptor.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        (self.0)(args)
    }
}

/// Wrap a synchronous closure as a handler.
pub fn from_fn<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// A named callable with a declared signature.
///
/// Immutable once built; cloning shares the handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    returns: ValueType,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Create a descriptor with no parameters that returns `str`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            returns: ValueType::Str,
            handler,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn returns(mut self, ty: ValueType) -> Self {
        self.returns = ty;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn return_type(&self) -> ValueType {
        self.returns
    }

    /// Whether the registry must inject a session id.
    pub fn takes_session(&self) -> bool {
        self.params.iter().any(|p| p.name == SESSION_ID_PARAM)
    }

    /// Parameters the model is allowed to supply (everything but the session id).
    pub fn model_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.name != SESSION_ID_PARAM)
    }

    /// JSON Schema of the model-facing parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in self.model_params() {
            let mut prop = json!({ "type": p.ty.json_type() });
            if let Some(desc) = &p.description {
                prop["description"] = json!(desc);
            }
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(json!(p.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Provider schema object in the requested shape.
    pub fn schema(&self, format: SchemaFormat) -> Value {
        let flat = json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters_schema(),
        });
        match format {
            SchemaFormat::Flat => flat,
            SchemaFormat::Function => json!({
                "type": "function",
                "function": flat,
            }),
        }
    }

    /// Check raw model arguments against the signature and fill defaults.
    ///
    /// `null` counts as "no arguments". The session id is never accepted from the model.
    pub fn bind(&self, raw: Value) -> Result<ToolArgs, String> {
        let mut supplied = match raw {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => return Err(format!("arguments must be a JSON object, got {}", other)),
        };
        supplied.remove(SESSION_ID_PARAM);

        if let Some(unknown) = supplied
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(format!("unexpected argument '{}'", unknown));
        }

        let mut bound = Map::new();
        for p in self.model_params() {
            match supplied.remove(&p.name) {
                Some(value) if p.ty.matches(&value) => {
                    bound.insert(p.name.clone(), value);
                }
                Some(value) if value.is_null() && !p.required => {
                    if let Some(default) = &p.default {
                        bound.insert(p.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    return Err(format!(
                        "argument '{}' must be {}, got {}",
                        p.name, p.ty, value
                    ));
                }
                None if p.required => {
                    return Err(format!("missing required argument '{}'", p.name));
                }
                None => {
                    if let Some(default) = &p.default {
                        bound.insert(p.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(ToolArgs(bound))
    }

    /// Call the underlying handler. Errors are returned as-is.
    pub async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        self.handler.call(args).await
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Compact signature form, e.g. `read_file(file_path: str) -> dict: Read a file.`
impl fmt::Display for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .model_params()
            .map(|p| match &p.default {
                Some(default) if !p.required => format!("{}: {} = {}", p.name, p.ty, default),
                _ => format!("{}: {}", p.name, p.ty),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let description = self.description.split_whitespace().collect::<Vec<_>>().join(" ");
        write!(
            f,
            "{}({}) -> {}: {}",
            self.name, params, self.returns, description
        )
    }
}
