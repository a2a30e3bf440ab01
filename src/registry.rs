//! Slug → tool-surface resolution with a TTL cache and change listeners.
//!
//! Reads are lock-free snapshots out of a concurrent map; refreshes and TTL
//! expiry go through this registry only. Listeners are notified exactly once
//! per refresh, in registration order, from a snapshot taken before
//! dispatch so removal during dispatch cannot skip anyone.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::GatewayError;
use crate::store::catalog::McpServerRecord;
use crate::store::{ApiProxy, Db, WorkflowTemplate};
use crate::workflow::model::{VariableDefinition, input_schema_object};

/// Cache TTL for materialized tool configs.
const TOOL_CACHE_TTL: Duration = Duration::from_secs(60);

/// A proxy-backed tool as exposed over MCP.
#[derive(Debug, Clone)]
pub struct ProxyTool {
    pub name: String,
    pub description: String,
    pub proxy: ApiProxy,
}

/// A workflow-backed tool as exposed over MCP.
#[derive(Debug, Clone)]
pub struct WorkflowTool {
    pub name: String,
    pub description: String,
    pub workflow: WorkflowTemplate,
}

impl ProxyTool {
    pub fn input_schema(&self) -> serde_json::Value {
        input_schema_object(&self.proxy.variables_schema)
    }

    pub fn variables(&self) -> &[VariableDefinition] {
        &self.proxy.variables_schema
    }
}

impl WorkflowTool {
    pub fn input_schema(&self) -> serde_json::Value {
        input_schema_object(&self.workflow.input_schema)
    }

    pub fn variables(&self) -> &[VariableDefinition] {
        &self.workflow.input_schema
    }
}

/// The materialized tool surface of one MCP server slug.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub server: McpServerRecord,
    pub proxy_tools: Vec<ProxyTool>,
    pub workflow_tools: Vec<WorkflowTool>,
}

/// Default tool name: lowercased, runs of non-alphanumerics collapsed to
/// `_`, leading/trailing `_` trimmed.
pub fn derive_tool_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_separator = false;
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_separator = false;
        } else if !last_was_separator && !out.is_empty() {
            out.push('_');
            last_was_separator = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered listener registry, snapshot-dispatched.
#[derive(Default)]
pub struct ChangeListeners {
    entries: std::sync::Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ChangeListeners {
    pub fn subscribe(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().expect("listener lock").push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.entries
            .lock()
            .expect("listener lock")
            .retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn notify(&self, slug: &str) {
        // Snapshot before dispatch: a listener that unsubscribes others
        // mid-dispatch must not cause skips.
        let snapshot: Vec<Listener> = self
            .entries
            .lock()
            .expect("listener lock")
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(slug);
        }
    }
}

struct CacheEntry {
    config: Arc<ToolConfig>,
    generation: u64,
}

/// Process-wide registry of slug → tool config.
pub struct ToolRegistry {
    db: Db,
    cache: DashMap<String, CacheEntry>,
    listeners: ChangeListeners,
    generation: AtomicU64,
    ttl: Duration,
}

impl ToolRegistry {
    pub fn new(db: Db) -> Arc<Self> {
        Arc::new(Self {
            db,
            cache: DashMap::new(),
            listeners: ChangeListeners::default(),
            generation: AtomicU64::new(0),
            ttl: TOOL_CACHE_TTL,
        })
    }

    /// Resolve the tool surface for a slug, or `None` when no MCP server
    /// uses it. Cached for the TTL; expiry is a single-shot timer.
    pub async fn load_tools_for_slug(
        self: &Arc<Self>,
        slug: &str,
    ) -> Result<Option<Arc<ToolConfig>>, GatewayError> {
        if let Some(entry) = self.cache.get(slug) {
            return Ok(Some(entry.config.clone()));
        }

        let Some(server) = self.db.get_mcp_server_by_slug(slug).await? else {
            return Ok(None);
        };

        let proxy_tools = self
            .db
            .list_proxy_tools(&server.id)
            .await?
            .into_iter()
            .map(|binding| {
                let name = binding
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| derive_tool_name(&binding.proxy.name));
                let description = binding
                    .tool_description
                    .clone()
                    .unwrap_or_else(|| binding.proxy.name.clone());
                ProxyTool {
                    name,
                    description,
                    proxy: binding.proxy,
                }
            })
            .collect();

        let workflow_tools = self
            .db
            .list_workflow_tools(&server.id)
            .await?
            .into_iter()
            .map(|binding| {
                let name = binding
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| derive_tool_name(&binding.workflow.name));
                let description = binding
                    .tool_description
                    .clone()
                    .or_else(|| binding.workflow.description.clone())
                    .unwrap_or_else(|| binding.workflow.name.clone());
                WorkflowTool {
                    name,
                    description,
                    workflow: binding.workflow,
                }
            })
            .collect();

        let config = Arc::new(ToolConfig {
            server,
            proxy_tools,
            workflow_tools,
        });

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.cache.insert(
            slug.to_string(),
            CacheEntry {
                config: config.clone(),
                generation,
            },
        );

        let registry = Arc::downgrade(self);
        let slug_owned = slug.to_string();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(registry) = registry.upgrade() {
                registry
                    .cache
                    .remove_if(&slug_owned, |_, entry| entry.generation == generation);
            }
        });

        Ok(Some(config))
    }

    /// Drop the cached surface for a slug and notify listeners exactly once.
    pub fn refresh_tools(&self, slug: &str) {
        self.cache.remove(slug);
        self.listeners.notify(slug);
    }

    pub fn subscribe(&self, listener: Listener) -> u64 {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn tool_names_collapse_and_trim() {
        assert_eq!(derive_tool_name("Weather API"), "weather_api");
        assert_eq!(derive_tool_name("  CRO/USD price!! "), "cro_usd_price");
        assert_eq!(derive_tool_name("already_ok_1"), "already_ok_1");
        assert_eq!(derive_tool_name("___"), "");
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let listeners = ChangeListeners::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            listeners.subscribe(Arc::new(move |_slug: &str| {
                order.lock().unwrap().push(tag);
            }));
        }
        listeners.notify("demo");
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn notify_is_once_per_call() {
        let listeners = ChangeListeners::default();
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            listeners.subscribe(Arc::new(move |_slug: &str| {
                *count.lock().unwrap() += 1;
            }));
        }
        listeners.notify("demo");
        listeners.notify("demo");
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn removal_during_dispatch_does_not_skip_pending() {
        let listeners = Arc::new(ChangeListeners::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let id_to_remove = {
            let seen = seen.clone();
            listeners.subscribe(Arc::new(move |_slug: &str| {
                seen.lock().unwrap().push("victim");
            }))
        };
        // Re-register in front order: first listener removes the later one.
        {
            let listeners_inner = listeners.clone();
            let seen = seen.clone();
            // Subscribed after `victim`, so it runs second; it removes a
            // listener registered after itself.
            listeners.subscribe(Arc::new(move |_slug: &str| {
                seen.lock().unwrap().push("remover");
                listeners_inner.unsubscribe(id_to_remove + 2);
            }));
        }
        {
            let seen = seen.clone();
            listeners.subscribe(Arc::new(move |_slug: &str| {
                seen.lock().unwrap().push("tail");
            }));
        }

        listeners.notify("demo");
        assert_eq!(*seen.lock().unwrap(), vec!["victim", "remover", "tail"]);
    }
}
