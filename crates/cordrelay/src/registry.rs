//! Operation registry.
//!
//! A fixed table from operation name to its parameter schema, handler,
//! side-effect class, and the privileged intent it needs (if any). Built
//! once at startup with [`RegistryBuilder`] and shared read-only.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cordconf::IntentsConfig;
use futures::future::BoxFuture;
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde_json::Value;
use thiserror::Error;

use crate::context::OpContext;
use crate::error::OpError;
use crate::schema::{self, FieldViolation, Param, ValidatedArgs};

pub type OpResult = Result<Value, OpError>;

/// Boxed handler; see [`OperationSpec::new`].
pub type Handler = Arc<dyn Fn(OpContext, ValidatedArgs) -> BoxFuture<'static, OpResult> + Send + Sync>;

/// What calling an operation does to remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideEffect {
    ReadOnly,
    Mutating,
    /// Not safely repeatable: deletions and moderation.
    Destructive,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::ReadOnly => "read_only",
            SideEffect::Mutating => "mutating",
            SideEffect::Destructive => "destructive",
        }
    }

    /// Only reads are retried after a transient fault.
    pub fn retries_transient(&self) -> bool {
        matches!(self, SideEffect::ReadOnly)
    }
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Privileged gateway intents an operation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Members,
    MessageContent,
}

impl Capability {
    /// Config key that enables it.
    pub fn flag(&self) -> &'static str {
        match self {
            Capability::Members => "intents.members",
            Capability::MessageContent => "intents.message_content",
        }
    }

    pub fn is_enabled(&self, intents: &IntentsConfig) -> bool {
        match self {
            Capability::Members => intents.members,
            Capability::MessageContent => intents.message_content,
        }
    }
}

pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<Param>,
    pub side_effect: SideEffect,
    pub capability: Option<Capability>,
    handler: Handler,
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("side_effect", &self.side_effect)
            .field("capability", &self.capability)
            .finish()
    }
}

impl OperationSpec {
    /// `handler` is any `async fn(OpContext, ValidatedArgs) -> OpResult`.
    pub fn new<F, Fut>(
        name: &'static str,
        description: &'static str,
        side_effect: SideEffect,
        handler: F,
    ) -> Self
    where
        F: Fn(OpContext, ValidatedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        Self {
            name,
            description,
            params: Vec::new(),
            side_effect,
            capability: None,
            handler: Arc::new(
                move |ctx: OpContext, args: ValidatedArgs| -> BoxFuture<'static, OpResult> {
                    Box::pin(handler(ctx, args))
                },
            ),
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn validate(&self, args: &Value) -> Result<ValidatedArgs, Vec<FieldViolation>> {
        schema::validate(&self.params, args)
    }

    pub fn invoke(&self, ctx: OpContext, args: ValidatedArgs) -> BoxFuture<'static, OpResult> {
        (self.handler)(ctx, args)
    }

    /// MCP descriptor with hints derived from the side-effect class.
    pub fn tool(&self) -> Tool {
        let read_only = self.side_effect == SideEffect::ReadOnly;
        let input_schema = match schema::input_schema(&self.params) {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        };
        Tool::new(self.name, self.description, Arc::new(input_schema)).annotate(
            ToolAnnotations::new()
                .read_only(read_only)
                .destructive(self.side_effect == SideEffect::Destructive)
                .idempotent(read_only)
                .open_world(true),
        )
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("operation '{0}' registered twice")]
    Duplicate(&'static str),
}

#[derive(Default)]
pub struct RegistryBuilder {
    specs: Vec<OperationSpec>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: OperationSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn register_all(mut self, specs: impl IntoIterator<Item = OperationSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn build(self) -> Result<OperationRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.specs.len());
        let mut specs = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            if index.insert(spec.name, specs.len()).is_some() {
                return Err(RegistryError::Duplicate(spec.name));
            }
            specs.push(Arc::new(spec));
        }
        Ok(OperationRegistry { specs, index })
    }
}

/// Immutable once built.
#[derive(Debug)]
pub struct OperationRegistry {
    specs: Vec<Arc<OperationSpec>>,
    index: HashMap<&'static str, usize>,
}

impl OperationRegistry {
    pub fn lookup(&self, name: &str) -> Option<&Arc<OperationSpec>> {
        self.index.get(name).map(|&idx| &self.specs[idx])
    }

    pub fn validate(
        &self,
        spec: &OperationSpec,
        args: &Value,
    ) -> Result<ValidatedArgs, Vec<FieldViolation>> {
        spec.validate(args)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OperationSpec>> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Descriptors for `tools/list`, in registration order.
    pub fn tools(&self) -> Vec<Tool> {
        self.specs.iter().map(|s| s.tool()).collect()
    }
}
