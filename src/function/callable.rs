/// Invocable functions rebuilt from registrations
///
/// Native handlers are plain function pointers linked into the binary and looked up
/// by symbol. Lua closures are compiled from their persisted chunk with mlua, so they
/// can be materialized in any process that can read the storage root.

use crate::error::{PyflowError, Result};
use crate::function::types::{BoundArgs, Closure, RegisteredFunction};
use mlua::{Lua, LuaSerdeExt, MultiValue};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Signature of a statically linked handler
pub type NativeFn = fn(&BoundArgs) -> anyhow::Result<Value>;

/// Something that can be invoked with bound arguments
pub trait Callable {
    fn call(&self, args: &BoundArgs) -> anyhow::Result<Value>;
}

impl Callable for NativeFn {
    fn call(&self, args: &BoundArgs) -> anyhow::Result<Value> {
        self(args)
    }
}

/// Handlers available to this process, keyed by symbol
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, NativeFn>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler (builder style)
    pub fn with(mut self, symbol: &str, handler: NativeFn) -> Self {
        self.insert(symbol, handler);
        self
    }

    pub fn insert(&mut self, symbol: &str, handler: NativeFn) {
        self.handlers.insert(symbol.to_string(), handler);
    }

    pub fn get(&self, symbol: &str) -> Option<NativeFn> {
        self.handlers.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.handlers.contains_key(symbol)
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<_> = self.handlers.keys().collect();
        symbols.sort();
        f.debug_struct("HandlerTable").field("symbols", &symbols).finish()
    }
}

/// Lua function compiled from a persisted chunk
pub struct LuaCallable {
    lua: Lua,
    function: mlua::Function,
}

impl LuaCallable {
    /// Compile `chunk`, which must evaluate to a function
    pub fn compile(name: &str, chunk: &str) -> Result<Self> {
        let lua = Lua::new();
        let value = lua
            .load(chunk)
            .set_name(name)
            .eval::<mlua::Value>()
            .map_err(|e| PyflowError::Deserialization {
                name: name.to_string(),
                reason: format!("Lua chunk failed to load: {}", e),
            })?;

        match value {
            mlua::Value::Function(function) => Ok(Self { lua, function }),
            other => Err(PyflowError::Deserialization {
                name: name.to_string(),
                reason: format!("Lua chunk evaluated to {} instead of a function", other.type_name()),
            }),
        }
    }
}

impl fmt::Debug for LuaCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaCallable").finish_non_exhaustive()
    }
}

impl Callable for LuaCallable {
    fn call(&self, args: &BoundArgs) -> anyhow::Result<Value> {
        let mut lua_args = Vec::with_capacity(args.len());
        for value in args.values() {
            let lua_value = self
                .lua
                .to_value(value)
                .map_err(|e| anyhow::anyhow!("Failed to convert argument to Lua: {}", e))?;
            lua_args.push(lua_value);
        }

        let result = self
            .function
            .call::<mlua::Value>(lua_args.into_iter().collect::<MultiValue>())
            .map_err(|e| anyhow::anyhow!("Lua function raised: {}", e))?;

        self.lua
            .from_value::<Value>(result)
            .map_err(|e| anyhow::anyhow!("Failed to convert Lua result to JSON: {}", e))
    }
}

/// A registered function rebuilt into something invocable
pub struct MaterializedFunction {
    function: RegisteredFunction,
    callable: Box<dyn Callable>,
}

impl MaterializedFunction {
    /// Rebuild the callable described by `function.closure`
    pub fn build(function: RegisteredFunction, handlers: &HandlerTable) -> Result<Self> {
        let callable: Box<dyn Callable> = match &function.closure {
            Closure::Native { symbol } => {
                let handler = handlers.get(symbol).ok_or_else(|| PyflowError::Deserialization {
                    name: function.name.clone(),
                    reason: format!("native handler `{}` is not linked into this binary", symbol),
                })?;
                Box::new(handler)
            }
            Closure::Lua { chunk } => Box::new(LuaCallable::compile(&function.name, chunk)?),
        };

        Ok(Self { function, callable })
    }

    pub fn registration(&self) -> &RegisteredFunction {
        &self.function
    }

    /// Bind arguments against the declared signature
    pub fn bind(&self, args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Result<BoundArgs> {
        self.function.signature.bind(&self.function.name, args, kwargs)
    }

    /// Run the function body on already bound arguments
    pub fn call(&self, args: &BoundArgs) -> anyhow::Result<Value> {
        self.callable.call(args)
    }

    /// Bind and call in one step
    pub fn invoke(&self, args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> anyhow::Result<Value> {
        let bound = self.bind(args, kwargs)?;
        self.call(&bound)
    }
}

impl fmt::Debug for MaterializedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedFunction")
            .field("name", &self.function.name)
            .field("signature", &self.function.signature.to_string())
            .finish()
    }
}
