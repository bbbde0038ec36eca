use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use parley_llm::ToolDefinition;
use serde_json::Value;

use crate::args::parse_object;
use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;
use crate::local::LocalTool;
use crate::remote::RemoteToolSource;

const SUFFIX_LEN: usize = 5;

/// Prefix of the text handed back to the model when a tool call fails.
pub const FAILURE_PREFIX: &str = "call failed! msg:";

pub enum ToolSource {
    Local(Vec<LocalTool>),
    Remote(Arc<dyn RemoteToolSource>),
}

/// Text outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn failed(err: &ToolError) -> Self {
        Self {
            content: format!("{FAILURE_PREFIX} {err}"),
            is_error: true,
        }
    }
}

#[derive(Default)]
struct Tables {
    local: HashMap<String, Arc<LocalTool>>,
    remote: Vec<Arc<dyn RemoteToolSource>>,
}

/// Name-keyed dispatch over local tools and remote tool sources.
///
/// Local tools are offered to the model only when a request names them;
/// remote tools are always offered. When a local and a remote tool share a
/// name, the local one is dispatched.
#[derive(Default)]
pub struct ToolRegistry {
    tables: RwLock<Tables>,
    local_timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let remote: Vec<&str> = tables.remote.iter().map(|s| s.source_id()).collect();
        f.debug_struct("ToolRegistry")
            .field("local", &tables.local.len())
            .field("remote", &remote)
            .field("local_timeout", &self.local_timeout)
            .finish()
    }
}

enum Target {
    Local(Arc<LocalTool>),
    Remote(Arc<dyn RemoteToolSource>),
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each local handler's run time.
    #[must_use]
    pub fn with_local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = Some(timeout);
        self
    }

    /// Merge a source into the registry and return the names it contributed.
    ///
    /// A local tool whose name is already taken by another local tool is
    /// renamed with a random suffix. Registering a remote source with an id
    /// already present replaces the earlier source.
    pub fn register(&self, source: ToolSource) -> Vec<String> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match source {
            ToolSource::Local(tools) => {
                let mut names = Vec::with_capacity(tools.len());
                for mut tool in tools {
                    if tables.local.contains_key(tool.name()) {
                        let unique = unique_name(tool.name(), &tables.local);
                        tracing::warn!(
                            tool = tool.name(),
                            renamed = %unique,
                            "local tool name collision"
                        );
                        tool.rename(unique);
                    }
                    let name = tool.name().to_owned();
                    tables.local.insert(name.clone(), Arc::new(tool));
                    names.push(name);
                }
                names
            }
            ToolSource::Remote(source) => {
                let names: Vec<String> = source.tools().into_iter().map(|d| d.name).collect();
                let id = source.source_id().to_owned();
                tables.remote.retain(|s| s.source_id() != id);
                tracing::info!(source_id = %id, tools = names.len(), "registered remote tool source");
                tables.remote.push(source);
                names
            }
        }
    }

    #[must_use]
    pub fn local_names(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.local.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors to attach to one chat request.
    ///
    /// Contains the requested local tools followed by every tool currently
    /// known from remote sources. A remote tool is omitted when its name is
    /// already offered; the first source to advertise a name wins.
    #[must_use]
    pub fn descriptors_for(&self, requested: &[String]) -> Vec<ToolDescriptor> {
        let (locals, remotes) = {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            let locals: Vec<Arc<LocalTool>> = requested
                .iter()
                .filter_map(|name| {
                    let tool = tables.local.get(name).cloned();
                    if tool.is_none() {
                        tracing::warn!(tool = %name, "requested local tool is not registered");
                    }
                    tool
                })
                .collect();
            (locals, tables.remote.clone())
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tool in locals {
            if seen.insert(tool.name().to_owned()) {
                out.push(tool.descriptor().clone());
            }
        }
        for source in remotes {
            for descriptor in source.tools() {
                if seen.insert(descriptor.name.clone()) {
                    out.push(descriptor);
                }
            }
        }
        out
    }

    #[must_use]
    pub fn definitions_for(&self, requested: &[String]) -> Vec<ToolDefinition> {
        self.descriptors_for(requested)
            .iter()
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    fn resolve(&self, name: &str) -> Option<Target> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tool) = tables.local.get(name) {
            return Some(Target::Local(Arc::clone(tool)));
        }
        tables
            .remote
            .iter()
            .find(|s| s.tools().iter().any(|d| d.name == name))
            .map(|s| Target::Remote(Arc::clone(s)))
    }

    /// Run the named tool with JSON-encoded arguments.
    ///
    /// Never fails: unknown tools, malformed arguments, handler errors and
    /// panics, and timeouts are reported as error text in the result.
    pub async fn invoke(&self, name: &str, args_json: &str) -> ToolResult {
        let started = Instant::now();
        let dispatch = async {
            match self.resolve(name) {
                Some(Target::Local(tool)) => self.run_local(&tool, args_json).await,
                Some(Target::Remote(source)) => match parse_object(args_json) {
                    Ok(args) => source.call(name, Value::Object(args)).await,
                    Err(e) => Err(e),
                },
                None => Err(ToolError::UnknownTool {
                    name: name.to_owned(),
                }),
            }
        };
        let outcome = AssertUnwindSafe(dispatch)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ToolError::execution(format!(
                    "{name} panicked: {}",
                    panic_message(&*payload)
                )))
            });
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(content) => {
                tracing::debug!(tool = name, elapsed_ms, "tool call succeeded");
                ToolResult::ok(content)
            }
            Err(e) => {
                tracing::warn!(tool = name, elapsed_ms, error = %e, "tool call failed");
                ToolResult::failed(&e)
            }
        }
    }

    async fn run_local(&self, tool: &LocalTool, args_json: &str) -> Result<String, ToolError> {
        let value = match self.local_timeout {
            Some(limit) => tokio::time::timeout(limit, tool.call(args_json))
                .await
                .map_err(|_| ToolError::Timeout {
                    tool: tool.name().to_owned(),
                    timeout_secs: limit.as_secs(),
                })??,
            None => tool.call(args_json).await?,
        };
        Ok(value_to_text(value))
    }
}

/// Strings pass through, `null` becomes empty, anything else is JSON text.
#[must_use]
pub fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn unique_name(base: &str, taken: &HashMap<String, Arc<LocalTool>>) -> String {
    loop {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let candidate = format!("{base}_{}", &id[..SUFFIX_LEN]);
        if !taken.contains_key(&candidate) {
            return candidate;
        }
    }
}
