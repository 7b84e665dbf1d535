/// Core function registration types
///
/// Defines the persisted form of a registered function: its provenance (source text
/// and hash), its declared parameter schema and the closure used to materialize it.
/// These types are serialized to `meta.json` under the function's directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PyflowError, Result};

/// A registered function and its provenance metadata
///
/// `name` is the unique key in the registry. Registering the same name again
/// replaces this record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredFunction {
    /// Unique function name, also its directory name under `functions/`
    pub name: String,
    /// Source text recorded for provenance
    pub source: String,
    /// Lowercase hex SHA-256 of `source`
    pub source_hash: String,
    /// Declared parameter schema
    pub signature: Signature,
    /// How to rebuild an invocable function from this record
    pub closure: Closure,
    /// When this version was registered
    pub registered_at: DateTime<Utc>,
    /// Execution environment requested for container runs
    #[serde(default)]
    pub environment: Environment,
}

impl RegisteredFunction {
    pub fn new(name: &str, source: &str, signature: Signature, closure: Closure) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            source_hash: source_hash(source),
            signature,
            closure,
            registered_at: Utc::now(),
            environment: Environment::default(),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// First 12 hex digits of the source hash, or the whole value if shorter
    pub fn short_hash(&self) -> &str {
        self.source_hash.get(..12).unwrap_or(&self.source_hash)
    }

    /// Parameter names in declaration order
    pub fn parameter_names(&self) -> Vec<&str> {
        self.signature.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Parallel to `parameter_names`: whether each parameter is a keyword parameter
    pub fn parameter_is_keyword(&self) -> Vec<bool> {
        self.signature.parameters.iter().map(|p| p.keyword).collect()
    }
}

/// Content hash used for change detection
pub fn source_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Persisted closure of a registered function
///
/// - Native: a handler compiled into the running binary, found by symbol
/// - Lua: a Lua chunk evaluating to a function, executed with mlua
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Closure {
    /// Statically linked handler, looked up in the handler table
    Native { symbol: String },
    /// Embedded Lua chunk, e.g. `return function(x, y) return x + y end`
    Lua { chunk: String },
}

impl Closure {
    pub fn native(symbol: impl Into<String>) -> Self {
        Closure::Native { symbol: symbol.into() }
    }

    pub fn lua(chunk: impl Into<String>) -> Self {
        Closure::Lua { chunk: chunk.into() }
    }
}

/// Environment a function asks for when it runs in a container
///
/// Stored with the registration; in-process runs ignore it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub runtime: Runtime,
    /// Image to run in; `None` falls back to the launcher's image
    #[serde(default)]
    pub container: Option<ContainerImage>,
    #[serde(default)]
    pub resources: Resources,
}

/// Software the function depends on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    /// Packages the image is expected to provide, recorded for provenance
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Request GPU access from the container engine
    #[serde(default)]
    pub gpu: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ContainerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// `image:tag` reference
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Resource limits passed to the container engine (e.g. `cpu: "2"`, `mem: "4g"`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub mem: Option<String>,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Keyword parameters are optional and fall back to `default`
    pub keyword: bool,
    #[serde(default)]
    pub default: Value,
}

impl Parameter {
    /// Required parameter
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyword: false,
            default: Value::Null,
        }
    }

    /// Optional parameter with a default value
    pub fn keyword(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            keyword: true,
            default,
        }
    }
}

/// Ordered parameter schema declared at registration time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
}

/// Where a bound parameter takes its value from
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Positional(usize),
    Keyword(String),
    Default,
}

impl Signature {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self { parameters }
    }

    /// Signature with only required parameters
    pub fn positional<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Parameter::positional).collect())
    }

    /// Reject schemas that cannot bind unambiguously
    pub fn validate(&self, function: &str) -> Result<()> {
        for (i, param) in self.parameters.iter().enumerate() {
            if param.name.is_empty() {
                return Err(mismatch(function, "parameter names must not be empty".to_string()));
            }
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(mismatch(function, format!("duplicate parameter `{}`", param.name)));
            }
        }
        Ok(())
    }

    /// Check a call shape without values (used when deferring)
    pub fn check<'a>(
        &self,
        function: &str,
        positional: usize,
        keywords: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        self.plan(positional, keywords)
            .map(|_| ())
            .map_err(|reason| mismatch(function, reason))
    }

    /// Bind concrete arguments to parameters in declaration order
    pub fn bind(
        &self,
        function: &str,
        args: Vec<Value>,
        mut kwargs: BTreeMap<String, Value>,
    ) -> Result<BoundArgs> {
        let keys: Vec<String> = kwargs.keys().cloned().collect();
        let slots = self
            .plan(args.len(), keys.iter().map(String::as_str))
            .map_err(|reason| mismatch(function, reason))?;

        let mut positional = args.into_iter().map(Some).collect::<Vec<_>>();
        let mut values = Vec::with_capacity(slots.len());
        for (slot, param) in slots.into_iter().zip(&self.parameters) {
            let value = match slot {
                Slot::Positional(i) => positional[i].take().unwrap_or(Value::Null),
                Slot::Keyword(key) => kwargs.remove(&key).unwrap_or(Value::Null),
                Slot::Default => param.default.clone(),
            };
            values.push((param.name.clone(), value));
        }

        Ok(BoundArgs { values })
    }

    fn plan<'a>(
        &self,
        positional: usize,
        keywords: impl IntoIterator<Item = &'a str>,
    ) -> std::result::Result<Vec<Slot>, String> {
        let params = &self.parameters;
        if positional > params.len() {
            return Err(format!(
                "takes {} argument(s) but {} positional were given",
                params.len(),
                positional
            ));
        }

        let mut slots: Vec<Option<Slot>> = (0..params.len())
            .map(|i| (i < positional).then_some(Slot::Positional(i)))
            .collect();

        for key in keywords {
            let index = params
                .iter()
                .position(|p| p.name == key)
                .ok_or_else(|| format!("unexpected keyword argument `{}`", key))?;
            if slots[index].is_some() {
                return Err(format!("multiple values for parameter `{}`", key));
            }
            slots[index] = Some(Slot::Keyword(key.to_string()));
        }

        slots
            .into_iter()
            .zip(params)
            .map(|(slot, param)| match slot {
                Some(slot) => Ok(slot),
                None if param.keyword => Ok(Slot::Default),
                None => Err(format!("missing required argument `{}`", param.name)),
            })
            .collect()
    }
}

fn mismatch(function: &str, reason: String) -> PyflowError {
    PyflowError::SignatureMismatch {
        function: function.to_string(),
        reason,
    }
}

impl fmt::Display for Signature {
    /// Renders as `(x, y, z=1)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if param.keyword {
                write!(f, "{}={}", param.name, param.default)?;
            } else {
                write!(f, "{}", param.name)?;
            }
        }
        write!(f, ")")
    }
}

/// Arguments bound to a signature, in parameter order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    values: Vec<(String, Value)>,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Integer parameter, failing with a descriptive error otherwise
    pub fn i64(&self, name: &str) -> anyhow::Result<i64> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("parameter `{}` is not an integer", name))
    }

    pub fn f64(&self, name: &str) -> anyhow::Result<f64> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("parameter `{}` is not a number", name))
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("parameter `{}` is not a string", name))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
