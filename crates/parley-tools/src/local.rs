use std::fmt;
use std::future::Future;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::BoxFuture;
use crate::args::ToolArgs;
use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;

type Handler = Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// An in-process tool: a descriptor paired with the handler that runs it.
#[derive(Clone)]
pub struct LocalTool {
    descriptor: ToolDescriptor,
    handler: Handler,
}

impl fmt::Debug for LocalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl LocalTool {
    pub fn new<F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            descriptor,
            handler: Arc::new(move |args| -> BoxFuture<'static, Result<Value, ToolError>> {
                Box::pin(handler(args))
            }),
        }
    }

    /// Wrap a synchronous handler.
    pub fn from_fn<F>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(descriptor, move |args| {
            let handler = Arc::clone(&handler);
            async move { handler(&args) }
        })
    }

    /// Tool whose parameters are the fields of `A`, described by its JSON schema.
    ///
    /// Arguments are coerced to the schema's types before deserializing into `A`;
    /// the handler's output is serialized back to JSON.
    pub fn typed<A, R, F, Fut>(name: &str, description: &str, handler: F) -> Self
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
    {
        let schema = schemars::schema_for!(A);
        let descriptor = ToolDescriptor::from_input_schema(name, description, schema.as_value());
        let handler = Arc::new(handler);
        Self::new(descriptor, move |args: ToolArgs| {
            let handler = Arc::clone(&handler);
            async move {
                let typed: A = args.deserialize()?;
                let out = handler(typed).await?;
                serde_json::to_value(out).map_err(|e| ToolError::execution(e.to_string()))
            }
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.descriptor.name = name;
    }

    /// Parse, coerce, and run.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` for malformed JSON, or whatever
    /// the handler returns.
    pub async fn call(&self, args_json: &str) -> Result<Value, ToolError> {
        let args = ToolArgs::parse(&self.descriptor, args_json)?;
        (self.handler)(args).await
    }
}
