//! Catalog reads: API proxies, workflow templates, MCP server bindings,
//! and best-effort request logs.

use sqlx::FromRow;

use super::{Db, new_id, now_unix};
use crate::crypto::HybridEncrypted;
use crate::error::GatewayError;
use crate::types::{EvmAddress, TokenAmount};
use crate::workflow::model::{DynamicTarget, VariableDefinition, WorkflowDefinition};

#[derive(Debug, Clone, FromRow)]
struct ApiProxyRow {
    id: String,
    slug: Option<String>,
    owner_user_id: String,
    name: String,
    target_url: String,
    http_method: String,
    encrypted_headers: Option<String>,
    price_per_request: String,
    payment_address: String,
    variables_schema: String,
    request_body_template: Option<String>,
    query_params_template: Option<String>,
    content_type: String,
    is_public: bool,
}

/// A pay-gated upstream API registration.
#[derive(Debug, Clone)]
pub struct ApiProxy {
    pub id: String,
    pub slug: Option<String>,
    pub owner_user_id: String,
    pub name: String,
    pub target_url: String,
    pub http_method: String,
    pub encrypted_headers: Option<HybridEncrypted>,
    pub price_per_request: TokenAmount,
    pub payment_address: EvmAddress,
    pub variables_schema: Vec<VariableDefinition>,
    pub request_body_template: Option<serde_json::Value>,
    pub query_params_template: Option<serde_json::Value>,
    pub content_type: String,
    pub is_public: bool,
}

impl ApiProxy {
    fn from_row(row: ApiProxyRow) -> Result<Self, GatewayError> {
        let malformed =
            |what: &str| GatewayError::Internal(format!("stored proxy has malformed {what}"));
        Ok(ApiProxy {
            encrypted_headers: row
                .encrypted_headers
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|_| malformed("encrypted headers"))?,
            price_per_request: serde_json::from_value(serde_json::Value::String(
                row.price_per_request.clone(),
            ))
            .map_err(|_| malformed("price"))?,
            payment_address: row
                .payment_address
                .parse()
                .map_err(|_| malformed("payment address"))?,
            variables_schema: serde_json::from_str(&row.variables_schema)
                .map_err(|_| malformed("variables schema"))?,
            request_body_template: row
                .request_body_template
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|_| malformed("body template"))?,
            query_params_template: row
                .query_params_template
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|_| malformed("query template"))?,
            id: row.id,
            slug: row.slug,
            owner_user_id: row.owner_user_id,
            name: row.name,
            target_url: row.target_url,
            http_method: row.http_method,
            content_type: row.content_type,
            is_public: row.is_public,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct WorkflowRow {
    id: String,
    slug: String,
    user_id: String,
    name: String,
    description: Option<String>,
    input_schema: String,
    workflow_definition: String,
    is_public: bool,
}

/// A stored workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub id: String,
    pub slug: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Vec<VariableDefinition>,
    pub workflow_definition: WorkflowDefinition,
    pub is_public: bool,
}

impl WorkflowTemplate {
    fn from_row(row: WorkflowRow) -> Result<Self, GatewayError> {
        let malformed =
            |what: &str| GatewayError::Internal(format!("stored workflow has malformed {what}"));
        Ok(WorkflowTemplate {
            input_schema: serde_json::from_str(&row.input_schema)
                .map_err(|_| malformed("input schema"))?,
            workflow_definition: serde_json::from_str(&row.workflow_definition)
                .map_err(|_| malformed("definition"))?,
            id: row.id,
            slug: row.slug,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            is_public: row.is_public,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct McpServerRecord {
    pub id: String,
    pub slug: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
}

/// A proxy tool attached to an MCP server, with its resolved proxy.
#[derive(Debug, Clone)]
pub struct ProxyToolBinding {
    pub tool_name: Option<String>,
    pub tool_description: Option<String>,
    pub display_order: i64,
    pub proxy: ApiProxy,
}

/// A workflow tool attached to an MCP server, with its resolved template.
#[derive(Debug, Clone)]
pub struct WorkflowToolBinding {
    pub tool_name: Option<String>,
    pub tool_description: Option<String>,
    pub display_order: i64,
    pub workflow: WorkflowTemplate,
}

const PROXY_COLUMNS: &str = "id, slug, owner_user_id, name, target_url, http_method, \
    encrypted_headers, price_per_request, payment_address, variables_schema, \
    request_body_template, query_params_template, content_type, is_public";

const WORKFLOW_COLUMNS: &str =
    "id, slug, user_id, name, description, input_schema, workflow_definition, is_public";

impl Db {
    pub async fn get_mcp_server_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<McpServerRecord>, GatewayError> {
        let row = sqlx::query_as::<_, McpServerRecord>(
            "SELECT id, slug, user_id, name, description FROM mcp_servers WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn get_api_proxy(&self, id: &str) -> Result<Option<ApiProxy>, GatewayError> {
        let row = sqlx::query_as::<_, ApiProxyRow>(&format!(
            "SELECT {PROXY_COLUMNS} FROM api_proxies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(ApiProxy::from_row).transpose()
    }

    pub async fn get_workflow_template(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowTemplate>, GatewayError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflow_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(WorkflowTemplate::from_row).transpose()
    }

    /// Enabled proxy tools for a server, in display order.
    pub async fn list_proxy_tools(
        &self,
        server_id: &str,
    ) -> Result<Vec<ProxyToolBinding>, GatewayError> {
        #[derive(FromRow)]
        struct BindingRow {
            tool_name: Option<String>,
            tool_description: Option<String>,
            display_order: i64,
            proxy_id: String,
        }
        let bindings = sqlx::query_as::<_, BindingRow>(
            "SELECT tool_name, tool_description, display_order, proxy_id
             FROM mcp_server_tools WHERE server_id = $1 AND enabled = TRUE
             ORDER BY display_order ASC",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(bindings.len());
        for binding in bindings {
            // A binding to a deleted proxy is skipped rather than failing
            // the whole surface.
            if let Some(proxy) = self.get_api_proxy(&binding.proxy_id).await? {
                out.push(ProxyToolBinding {
                    tool_name: binding.tool_name,
                    tool_description: binding.tool_description,
                    display_order: binding.display_order,
                    proxy,
                });
            }
        }
        Ok(out)
    }

    /// Enabled workflow tools for a server, in display order.
    pub async fn list_workflow_tools(
        &self,
        server_id: &str,
    ) -> Result<Vec<WorkflowToolBinding>, GatewayError> {
        #[derive(FromRow)]
        struct BindingRow {
            tool_name: Option<String>,
            tool_description: Option<String>,
            display_order: i64,
            workflow_id: String,
        }
        let bindings = sqlx::query_as::<_, BindingRow>(
            "SELECT tool_name, tool_description, display_order, workflow_id
             FROM mcp_server_workflows WHERE server_id = $1 AND enabled = TRUE
             ORDER BY display_order ASC",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if let Some(workflow) = self.get_workflow_template(&binding.workflow_id).await? {
                out.push(WorkflowToolBinding {
                    tool_name: binding.tool_name,
                    tool_description: binding.tool_description,
                    display_order: binding.display_order,
                    workflow,
                });
            }
        }
        Ok(out)
    }

    /// On-chain targets declared by workflows attached to a slug, labeled
    /// with the originating workflow name. Shown on the consent surface.
    pub async fn workflow_targets_for_slug(
        &self,
        slug: &str,
    ) -> Result<Vec<(String, DynamicTarget)>, GatewayError> {
        let Some(server) = self.get_mcp_server_by_slug(slug).await? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for binding in self.list_workflow_tools(&server.id).await? {
            for target in binding.workflow.workflow_definition.declared_targets() {
                out.push((binding.workflow.name.clone(), target));
            }
        }
        Ok(out)
    }

    /// Best-effort request log. Failures are traced, never surfaced.
    pub async fn log_request(
        &self,
        user_id: Option<&str>,
        proxy_id: Option<&str>,
        slug: Option<&str>,
        status: u16,
        price_charged: Option<&TokenAmount>,
    ) {
        let result = sqlx::query(
            "INSERT INTO request_logs (id, user_id, proxy_id, slug, status, price_charged, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(new_id())
        .bind(user_id)
        .bind(proxy_id)
        .bind(slug)
        .bind(status as i64)
        .bind(price_charged.map(|p| p.to_string()))
        .bind(now_unix())
        .execute(self.pool())
        .await;
        if let Err(error) = result {
            tracing::warn!(error = %error, "failed to write request log");
        }
    }
}
