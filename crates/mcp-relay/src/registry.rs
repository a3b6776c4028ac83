//! Tool registration and invocation.
//!
//! Each tool is a [`ToolRoute`]: a descriptor with a generated input
//! schema plus an async handler. Invocations run on their own task, so
//! the transport loop stays responsive and a panicking handler is
//! contained and reported as an error-flagged result.
use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, JsonObject,
    ProgressNotificationParam, ProgressToken, Tool,
};

/// Capacity of the per-invocation notification channel. A handler that
/// outruns the session's publisher blocks on `progress` until there is
/// room again.
pub(crate) const NOTIFICATION_BUFFER: usize = 16;

/// Sink through which a running tool handler emits progress.
///
/// Notifications are tagged with the id of the request that started the
/// invocation and forwarded onto the session's live stream while the
/// call is still running. Messages sent after the handler returned may
/// be dropped.
#[derive(Clone)]
pub struct Notifier {
    token: ProgressToken,
    tx: mpsc::Sender<ProgressNotificationParam>,
}

impl Notifier {
    pub fn channel(token: ProgressToken) -> (Self, mpsc::Receiver<ProgressNotificationParam>) {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        (Notifier { token, tx }, rx)
    }

    pub async fn progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        let param = ProgressNotificationParam {
            progress_token: self.token.clone(),
            progress,
            total,
            message,
        };
        if self.tx.send(param).await.is_err() {
            tracing::debug!("progress receiver dropped, notification discarded");
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("token", &self.token)
            .finish()
    }
}

/// Generate the JSON Schema object for a handler parameter type.
pub fn schema_for_type<T: JsonSchema>() -> JsonObject {
    let mut settings = schemars::generate::SchemaSettings::draft2020_12();
    settings.inline_subschemas = true;
    let generator = settings.into_generator();
    let schema = generator.into_root_schema_for::<T>();
    let value = serde_json::to_value(schema).expect("json schema should serialize");
    crate::model::object(value)
}

type DynToolHandler = dyn Fn(Option<JsonObject>, Notifier) -> BoxFuture<'static, Result<CallToolResult, ErrorData>>
    + Send
    + Sync;

/// One registered tool: its descriptor and its handler.
pub struct ToolRoute {
    pub tool: Tool,
    call: Arc<DynToolHandler>,
}

impl ToolRoute {
    /// Register a handler taking a typed parameter struct. The input
    /// schema is generated from `P`, and arguments that do not conform
    /// to it are rejected before the handler runs.
    pub fn new<P, F, Fut>(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P, Notifier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
    {
        let tool = Tool::new(name, description, schema_for_type::<P>());
        let call = Arc::new(
            move |arguments: Option<JsonObject>, notifier: Notifier| {
                let arguments = Value::Object(arguments.unwrap_or_default());
                match serde_json::from_value::<P>(arguments) {
                    Ok(params) => handler(params, notifier).boxed(),
                    Err(e) => std::future::ready(Ok(CallToolResult::error(vec![Content::text(
                        format!("invalid arguments: {e}"),
                    )])))
                    .boxed(),
                }
            },
        );
        ToolRoute { tool, call }
    }

    pub fn with_output_schema<T: JsonSchema>(mut self) -> Self {
        self.tool = self.tool.with_output_schema(schema_for_type::<T>());
        self
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }
}

impl fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRoute").field("tool", &self.tool).finish()
    }
}

impl Clone for ToolRoute {
    fn clone(&self) -> Self {
        ToolRoute {
            tool: self.tool.clone(),
            call: self.call.clone(),
        }
    }
}

/// The set of tools one server exposes.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    map: HashMap<Cow<'static, str>, ToolRoute>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: ToolRoute) {
        self.map.insert(route.tool.name.clone(), route);
    }

    pub fn with_route(mut self, route: ToolRoute) -> Self {
        self.add_route(route);
        self
    }

    pub fn merge(&mut self, other: ToolRegistry) {
        for (name, route) in other.map {
            self.map.insert(name, route);
        }
    }

    pub fn list_all(&self) -> Vec<Tool> {
        self.map.values().map(|route| route.tool.clone()).collect()
    }

    /// Invoke a tool on its own task and wait for the outcome.
    ///
    /// Returns `Err` only when no tool with that name exists. Handler
    /// errors and panics are folded into an error-flagged result
    /// attributed to the invoking request.
    pub async fn call(
        &self,
        params: CallToolRequestParam,
        notifier: Notifier,
    ) -> Result<CallToolResult, ErrorData> {
        let route = self
            .map
            .get(params.name.as_ref())
            .ok_or_else(|| ErrorData::invalid_params("tool not found", None))?;
        let future = (route.call)(params.arguments, notifier);
        let result = match tokio::spawn(future).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => CallToolResult::error(vec![Content::text(error.to_string())]),
            Err(e) => {
                tracing::error!(tool = %params.name, error = %e, "tool handler task failed");
                CallToolResult::error(vec![Content::text("tool execution failed")])
            }
        };
        Ok(result)
    }
}
