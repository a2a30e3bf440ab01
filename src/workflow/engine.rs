//! The workflow interpreter.
//!
//! Steps run strictly in order; step N+1 only starts after step N has
//! committed its output into the run context. There are no retries and no
//! parallelism inside one run. Cancellation and the request deadline are
//! honored at step boundaries, and in-flight HTTP calls abort with them.
//!
//! Dry-run mode walks the same interpreter but simulates HTTP and relayer
//! side effects. Expressions that would only resolve against a real
//! upstream response are tolerated there, not failed: the step succeeds
//! with a descriptive `unresolvedExpressions` output. Genuine encoding
//! errors (malformed ABI fragments) fail in both modes.

use alloy_primitives::{Bytes, U256};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::proxy::{PayGate, ProxyCallError};
use crate::scope;
use crate::sign::eip712::{self, Execution};
use crate::sign::{SessionSigningContext, SignError, SigningService};
use crate::store::Db;
use crate::types::{EvmAddress, Selector, SessionId};
use crate::workflow::abi;
use crate::workflow::expr;
use crate::workflow::model::{
    HttpStep, OnchainOperation, ScopeConfig, Step, StepKind, WorkflowDefinition,
};

/// Step- and run-level failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("step '{step}' has unresolved arguments: {details:?}")]
    UnresolvedArg { step: String, details: Vec<String> },
    #[error("step '{step}' failed to encode: {message}")]
    Encoding { step: String, message: String },
    #[error("step '{step}' upstream call failed with status {status}")]
    Http {
        step: String,
        status: u16,
        body: Value,
    },
    #[error("step '{step}' references unknown proxy {proxy_id}")]
    ProxyNotFound { step: String, proxy_id: String },
    #[error("step '{step}' targets {target}, which the session does not allow")]
    TargetNotAllowed { step: String, target: String },
    #[error("step '{step}' relayer call failed: {message}")]
    Relayer { step: String, message: String },
    #[error("signing failed in step '{step}'")]
    Sign {
        step: String,
        #[source]
        source: SignError,
    },
    #[error("workflow deadline exceeded")]
    Timeout,
    #[error("workflow canceled")]
    Canceled,
    #[error("internal workflow failure: {0}")]
    Internal(String),
}

/// The outcome of one executed (or simulated) step.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub id: String,
    pub name: String,
    pub output_as: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The overall result: per-step trail plus the projected output.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-run parameters. A live run carries the session to sign with; dry
/// runs never touch key material.
#[derive(Clone)]
pub struct WorkflowRunContext {
    pub wallet: EvmAddress,
    pub chain_id: u64,
    pub session: Option<SessionSigningContext>,
    pub cancel: CancellationToken,
    pub deadline: Option<tokio::time::Instant>,
    pub dry_run: bool,
}

impl WorkflowRunContext {
    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.session_id)
    }

    fn check_liveness(&self) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(WorkflowError::Timeout);
            }
        }
        Ok(())
    }
}

/// Executes workflow definitions against the catalog, pay gate, and signer.
#[derive(Clone)]
pub struct WorkflowEngine {
    db: Db,
    paygate: PayGate,
    signing: SigningService,
    relayer_url: String,
}

impl WorkflowEngine {
    pub fn new(db: Db, paygate: PayGate, signing: SigningService, relayer_url: String) -> Self {
        Self {
            db,
            paygate,
            signing,
            relayer_url,
        }
    }

    /// Run a workflow to completion or first error.
    #[instrument(skip_all, fields(steps = workflow.steps.len(), dry_run = run.dry_run))]
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        input: Map<String, Value>,
        run: &WorkflowRunContext,
    ) -> WorkflowOutcome {
        let mut context = json!({
            "input": input,
            "steps": {},
            "wallet": run.wallet.as_lower(),
            "chainId": run.chain_id,
            "sessionId": run.session_id().map(|id| id.as_lower()),
            "sessionKeyAddress": run.session.as_ref().map(|s| s.session_key_address.as_lower()),
        });

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(workflow.steps.len());

        for step in &workflow.steps {
            if let Err(error) = run.check_liveness() {
                return Self::halt(outcomes, error);
            }
            let result = self
                .execute_step(step, &context, workflow.scope_config.as_ref(), run)
                .await;
            match result {
                Ok(output) => {
                    context["steps"][&step.output_as] = json!({ "output": output });
                    outcomes.push(StepOutcome {
                        id: step.id.clone(),
                        name: step.name.clone(),
                        output_as: step.output_as.clone(),
                        success: true,
                        output: Some(output),
                        error: None,
                    });
                }
                Err(error) => {
                    outcomes.push(StepOutcome {
                        id: step.id.clone(),
                        name: step.name.clone(),
                        output_as: step.output_as.clone(),
                        success: false,
                        output: None,
                        error: Some(error.to_string()),
                    });
                    return Self::halt(outcomes, error);
                }
            }
        }

        let mut output = Map::new();
        for (key, expression) in &workflow.output_mapping {
            match expr::resolve_expression(expression, &context) {
                Some(value) => {
                    output.insert(key.clone(), value);
                }
                None => {
                    output.insert(key.clone(), Value::Null);
                }
            }
        }

        WorkflowOutcome {
            success: true,
            steps: outcomes,
            output: Some(Value::Object(output)),
            error: None,
        }
    }

    fn halt(outcomes: Vec<StepOutcome>, error: WorkflowError) -> WorkflowOutcome {
        WorkflowOutcome {
            success: false,
            steps: outcomes,
            output: None,
            error: Some(error.to_string()),
        }
    }

    async fn execute_step(
        &self,
        step: &Step,
        context: &Value,
        scope_config: Option<&ScopeConfig>,
        run: &WorkflowRunContext,
    ) -> Result<Value, WorkflowError> {
        match &step.kind {
            StepKind::Http { http } => self.execute_http(step, http, context, run).await,
            StepKind::Onchain { onchain } => {
                let prepared = self.prepare_operation(step, onchain, context, run)?;
                if run.dry_run {
                    return Ok(prepared.simulated_output());
                }
                let operation = prepared.require_resolved(step)?;
                self.assert_target_allowed(step, &operation, scope_config, run)?;
                let execution_data = eip712::encode_single_execution(
                    operation.target.into(),
                    operation.value,
                    &operation.calldata,
                );
                self.relay(step, eip712::mode_single(), execution_data, run)
                    .await
            }
            StepKind::OnchainBatch { onchain_batch } => {
                let mut prepared = Vec::with_capacity(onchain_batch.operations.len());
                for operation in &onchain_batch.operations {
                    prepared.push(self.prepare_operation(step, operation, context, run)?);
                }
                if run.dry_run {
                    let operations: Vec<Value> =
                        prepared.iter().map(|p| p.simulated_output_inner()).collect();
                    return Ok(json!({
                        "_simulated": true,
                        "operations": operations,
                    }));
                }
                let mut executions = Vec::with_capacity(prepared.len());
                for p in prepared {
                    let operation = p.require_resolved(step)?;
                    self.assert_target_allowed(step, &operation, scope_config, run)?;
                    executions.push(Execution {
                        target: operation.target.into(),
                        value: operation.value,
                        callData: Bytes::from(operation.calldata),
                    });
                }
                let execution_data = eip712::encode_batch_execution(&executions);
                self.relay(step, eip712::mode_batch(), execution_data, run)
                    .await
            }
        }
    }

    async fn execute_http(
        &self,
        step: &Step,
        http: &HttpStep,
        context: &Value,
        run: &WorkflowRunContext,
    ) -> Result<Value, WorkflowError> {
        let (body, _unresolved_body) = expr::resolve_mapping(&http.body_mapping, context);
        let query = http
            .query_mapping
            .as_ref()
            .map(|mapping| expr::resolve_mapping(mapping, context).0);
        let headers = http
            .headers_mapping
            .as_ref()
            .map(|mapping| expr::resolve_mapping(mapping, context).0);

        let proxy = match &http.proxy_id {
            Some(proxy_id) => Some(
                self.db
                    .get_api_proxy(proxy_id)
                    .await
                    .map_err(|e| WorkflowError::Internal(e.to_string()))?
                    .ok_or_else(|| WorkflowError::ProxyNotFound {
                        step: step.id.clone(),
                        proxy_id: proxy_id.clone(),
                    })?,
            ),
            None => None,
        };

        let url = proxy
            .as_ref()
            .map(|p| p.target_url.clone())
            .or_else(|| http.url.clone())
            .ok_or_else(|| WorkflowError::Encoding {
                step: step.id.clone(),
                message: "http step needs proxyId or url".to_string(),
            })?;
        let method = proxy
            .as_ref()
            .map(|p| p.http_method.clone())
            .or_else(|| http.method.clone())
            .unwrap_or_else(|| "POST".to_string());

        if run.dry_run {
            return Ok(json!({
                "_simulated": true,
                "_message": "HTTP call skipped in test mode",
                "proxyId": http.proxy_id,
                "url": url,
                "method": method,
                "body": Value::Object(body),
            }));
        }

        let session = self.require_session(run)?;
        let body = if body.is_empty() {
            None
        } else {
            Some(Value::Object(body))
        };

        let outcome = match &proxy {
            Some(proxy) => {
                self.paygate
                    .call_proxy(
                        proxy,
                        session,
                        body,
                        query.as_ref(),
                        headers.as_ref(),
                        &run.cancel,
                    )
                    .await
            }
            None => {
                let header_map = headers
                    .as_ref()
                    .map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| {
                                v.as_str().map(|s| (k.clone(), s.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.paygate
                    .call_url(
                        &method,
                        &url,
                        "application/json",
                        header_map,
                        body,
                        query.as_ref(),
                        session,
                        &run.cancel,
                    )
                    .await
            }
        };

        match outcome {
            Ok(result) => {
                if let Some(proxy) = &proxy {
                    self.db
                        .log_request(
                            None,
                            Some(&proxy.id),
                            None,
                            result.status,
                            result.paid.as_ref(),
                        )
                        .await;
                }
                Ok(result.body)
            }
            Err(ProxyCallError::Upstream { status, body }) => Err(WorkflowError::Http {
                step: step.id.clone(),
                status,
                body,
            }),
            Err(ProxyCallError::Timeout) => Err(WorkflowError::Timeout),
            Err(ProxyCallError::Canceled) => Err(WorkflowError::Canceled),
            Err(ProxyCallError::Sign(source)) => Err(WorkflowError::Sign {
                step: step.id.clone(),
                source,
            }),
            Err(other) => Err(WorkflowError::Internal(other.to_string())),
        }
    }

    /// Resolve one on-chain operation against the context without touching
    /// the network. The result distinguishes fully-resolved operations from
    /// ones blocked on unresolved expressions (tolerated in dry runs).
    fn prepare_operation(
        &self,
        step: &Step,
        operation: &OnchainOperation,
        context: &Value,
        run: &WorkflowRunContext,
    ) -> Result<PreparedOperation, WorkflowError> {
        let mut unresolved: Vec<String> = Vec::new();

        let raw_target = match (&operation.target, &operation.expr) {
            (Some(target), _) => {
                if expr::is_expression(target) {
                    match expr::resolve_expression(target, context) {
                        Some(Value::String(s)) => Some(s),
                        Some(other) => Some(other.to_string()),
                        None => {
                            unresolved.push(format!("target: {target}"));
                            None
                        }
                    }
                } else {
                    Some(target.clone())
                }
            }
            (None, Some(expression)) => match expr::resolve_expression(expression, context) {
                Some(Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
                None => {
                    unresolved.push(format!("target: {expression}"));
                    None
                }
            },
            (None, None) => {
                return Err(WorkflowError::Encoding {
                    step: step.id.clone(),
                    message: "onchain operation needs target or expr".to_string(),
                });
            }
        };

        let target = match raw_target {
            Some(raw) => match raw.parse::<EvmAddress>() {
                Ok(address) => Some(address),
                Err(_) => {
                    if run.dry_run {
                        unresolved.push(format!("target: {raw} is not an address"));
                        None
                    } else {
                        return Err(WorkflowError::Encoding {
                            step: step.id.clone(),
                            message: format!("target '{raw}' is not an address"),
                        });
                    }
                }
            },
            None => None,
        };

        let value = match &operation.value {
            Some(raw) => {
                let rendered = if expr::is_expression(raw) {
                    match expr::resolve_expression(raw, context) {
                        Some(Value::String(s)) => Some(s),
                        Some(Value::Number(n)) => Some(n.to_string()),
                        Some(other) => Some(other.to_string()),
                        None => {
                            unresolved.push(format!("value: {raw}"));
                            None
                        }
                    }
                } else {
                    Some(raw.clone())
                };
                match rendered {
                    Some(rendered) => U256::from_str_radix(&rendered, 10).map_err(|_| {
                        WorkflowError::Encoding {
                            step: step.id.clone(),
                            message: format!("value '{rendered}' is not a decimal integer"),
                        }
                    })?,
                    None => U256::ZERO,
                }
            }
            None => U256::ZERO,
        };

        let (calldata, resolved_args) = match (&operation.calldata, &operation.abi_fragment) {
            (Some(raw), _) => {
                let stripped = raw.strip_prefix("0x").unwrap_or(raw);
                let bytes = hex::decode(stripped).map_err(|_| WorkflowError::Encoding {
                    step: step.id.clone(),
                    message: "calldata is not valid hex".to_string(),
                })?;
                (Some(bytes), None)
            }
            (None, Some(fragment)) => {
                let empty = Map::new();
                let args_mapping = operation.args_mapping.as_ref().unwrap_or(&empty);
                let (resolved, mut arg_unresolved) =
                    expr::resolve_mapping(args_mapping, context);
                unresolved.append(&mut arg_unresolved);
                if unresolved.is_empty() {
                    let encoded = abi::encode_fragment_call(fragment, &resolved).map_err(
                        |error| WorkflowError::Encoding {
                            step: step.id.clone(),
                            message: error.to_string(),
                        },
                    )?;
                    (Some(encoded.calldata), Some(Value::Object(resolved)))
                } else {
                    // Arguments blocked on a prior simulated output: still a
                    // hard error for a malformed fragment.
                    abi::validate_fragment(fragment).map_err(|error| {
                        WorkflowError::Encoding {
                            step: step.id.clone(),
                            message: error.to_string(),
                        }
                    })?;
                    (None, Some(Value::Object(resolved)))
                }
            }
            (None, None) => (Some(Vec::new()), None),
        };

        Ok(PreparedOperation {
            name: operation.name.clone(),
            target,
            value,
            calldata,
            resolved_args,
            unresolved,
        })
    }

    fn assert_target_allowed(
        &self,
        step: &Step,
        operation: &ResolvedOperation,
        scope_config: Option<&ScopeConfig>,
        run: &WorkflowRunContext,
    ) -> Result<(), WorkflowError> {
        let session = self.require_session(run)?;
        let selector = (operation.calldata.len() >= 4).then(|| {
            Selector([
                operation.calldata[0],
                operation.calldata[1],
                operation.calldata[2],
                operation.calldata[3],
            ])
        });
        if scope::is_execution_allowed(&session.scopes, &operation.target, selector.as_ref()) {
            return Ok(());
        }
        let dynamic = scope_config.is_some_and(|config| {
            config
                .allowed_dynamic_targets
                .iter()
                .any(|t| t.address == operation.target)
        });
        if dynamic {
            return Ok(());
        }
        Err(WorkflowError::TargetNotAllowed {
            step: step.id.clone(),
            target: operation.target.as_lower(),
        })
    }

    async fn relay(
        &self,
        step: &Step,
        mode: alloy_primitives::B256,
        execution_data: Bytes,
        run: &WorkflowRunContext,
    ) -> Result<Value, WorkflowError> {
        let session = self.require_session(run)?;
        let signature = self
            .signing
            .sign_execution(session, mode, &execution_data)
            .map_err(|source| WorkflowError::Sign {
                step: step.id.clone(),
                source,
            })?;

        let payload = json!({
            "ownerAddress": run.wallet.as_lower(),
            "sessionId": session.session_id.as_lower(),
            "mode": format!("0x{}", hex::encode(mode)),
            "executionData": format!("0x{}", hex::encode(&execution_data)),
            "signature": signature.to_string(),
            "chainId": run.chain_id,
        });

        let request = self
            .paygate
            .http()
            .post(&self.relayer_url)
            .json(&payload)
            .build()
            .map_err(|e| WorkflowError::Relayer {
                step: step.id.clone(),
                message: e.to_string(),
            })?;

        let response = tokio::select! {
            _ = run.cancel.cancelled() => return Err(WorkflowError::Canceled),
            result = self.paygate.http().execute(request) => result.map_err(|e| {
                if e.is_timeout() {
                    WorkflowError::Timeout
                } else {
                    WorkflowError::Relayer { step: step.id.clone(), message: e.to_string() }
                }
            })?,
        };

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(WorkflowError::Relayer {
                step: step.id.clone(),
                message: format!("relayer returned {status}: {body}"),
            });
        }
        let tx_hash = body
            .get("txHash")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({ "txHash": tx_hash }))
    }

    fn require_session<'a>(
        &self,
        run: &'a WorkflowRunContext,
    ) -> Result<&'a SessionSigningContext, WorkflowError> {
        run.session
            .as_ref()
            .ok_or_else(|| WorkflowError::Internal("live run requires a session".to_string()))
    }
}

/// An on-chain operation after context resolution, possibly blocked on
/// unresolved expressions.
struct PreparedOperation {
    name: Option<String>,
    target: Option<EvmAddress>,
    value: U256,
    calldata: Option<Vec<u8>>,
    resolved_args: Option<Value>,
    unresolved: Vec<String>,
}

/// A fully-resolved operation, ready to encode and sign.
struct ResolvedOperation {
    target: EvmAddress,
    value: U256,
    calldata: Vec<u8>,
}

impl PreparedOperation {
    fn simulated_output_inner(&self) -> Value {
        let mut out = Map::new();
        out.insert("_simulated".to_string(), json!(true));
        if let Some(name) = &self.name {
            out.insert("name".to_string(), json!(name));
        }
        out.insert(
            "target".to_string(),
            self.target
                .map(|t| json!(t.as_lower()))
                .unwrap_or(Value::Null),
        );
        out.insert("value".to_string(), json!(self.value.to_string()));
        if let Some(calldata) = &self.calldata {
            out.insert(
                "calldata".to_string(),
                json!(format!("0x{}", hex::encode(calldata))),
            );
        }
        if let Some(args) = &self.resolved_args {
            out.insert("resolvedArgs".to_string(), args.clone());
        }
        if !self.unresolved.is_empty() {
            out.insert("unresolvedExpressions".to_string(), json!(self.unresolved));
            out.insert(
                "_message".to_string(),
                json!(
                    "Expressions reference simulated outputs and will resolve during live execution"
                ),
            );
        }
        Value::Object(out)
    }

    fn simulated_output(&self) -> Value {
        self.simulated_output_inner()
    }

    fn require_resolved(self, step: &Step) -> Result<ResolvedOperation, WorkflowError> {
        if !self.unresolved.is_empty() {
            return Err(WorkflowError::UnresolvedArg {
                step: step.id.clone(),
                details: self.unresolved,
            });
        }
        let target = self.target.ok_or_else(|| WorkflowError::UnresolvedArg {
            step: step.id.clone(),
            details: vec!["target".to_string()],
        })?;
        let calldata = self.calldata.ok_or_else(|| WorkflowError::UnresolvedArg {
            step: step.id.clone(),
            details: vec!["calldata".to_string()],
        })?;
        Ok(ResolvedOperation {
            target,
            value: self.value,
            calldata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::test_keyring;
    use crate::nonce::MemoryNonceStore;
    use std::sync::Arc;

    fn engine() -> WorkflowEngine {
        // Dry-run tests never touch the pool; connect lazily would be
        // preferable but sqlx pools require a server, so the Db handle is
        // built with a lazy pool that is simply never used.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let db = crate::store::Db::from_pool(pool);
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let paygate = PayGate::new(
            signing.clone(),
            keyring,
            Arc::new(MemoryNonceStore::new()),
        );
        WorkflowEngine::new(db, paygate, signing, "http://localhost/relayer".to_string())
    }

    fn dry_context() -> WorkflowRunContext {
        WorkflowRunContext {
            wallet: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap(),
            chain_id: 25,
            session: None,
            cancel: CancellationToken::new(),
            deadline: None,
            dry_run: true,
        }
    }

    fn two_step_workflow() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "steps": [
                {
                    "type": "http",
                    "id": "step1",
                    "name": "Fetch amount",
                    "outputAs": "step1Out",
                    "http": { "url": "https://api.example/quote", "method": "GET",
                              "bodyMapping": { "symbol": "$.input.symbol" } }
                },
                {
                    "type": "onchain",
                    "id": "step2",
                    "name": "Transfer",
                    "outputAs": "step2Out",
                    "onchain": {
                        "target": "0x1111111111111111111111111111111111111111",
                        "abiFragment": {
                            "type": "function",
                            "name": "transfer",
                            "stateMutability": "nonpayable",
                            "inputs": [
                                { "name": "to", "type": "address" },
                                { "name": "amount", "type": "uint256" }
                            ],
                            "outputs": []
                        },
                        "argsMapping": {
                            "to": "$.wallet",
                            "amount": "$.steps.step1Out.output.amount"
                        }
                    }
                }
            ],
            "outputMapping": { "tx": "$.steps.step2Out.output.txHash" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn dry_run_tolerates_unresolved_chained_expressions() {
        let engine = engine();
        let workflow = two_step_workflow();
        let mut input = Map::new();
        input.insert("symbol".to_string(), json!("CRO"));

        let outcome = engine.run(&workflow, input, &dry_context()).await;
        assert!(outcome.success, "dry run should succeed: {outcome:?}");
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps.iter().all(|s| s.success));

        let step2 = outcome.steps[1].output.as_ref().unwrap();
        assert_eq!(step2["_simulated"], json!(true));
        let unresolved = step2["unresolvedExpressions"].as_array().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(
            unresolved[0],
            json!("amount: $.steps.step1Out.output.amount")
        );
        // No calldata could be produced, but that is not an error here.
        assert!(step2.get("calldata").is_none());
    }

    #[tokio::test]
    async fn dry_run_is_deterministic() {
        let engine = engine();
        let workflow = two_step_workflow();
        let mut input = Map::new();
        input.insert("symbol".to_string(), json!("CRO"));

        let first = engine.run(&workflow, input.clone(), &dry_context()).await;
        let second = engine.run(&workflow, input, &dry_context()).await;
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn malformed_abi_fails_even_in_dry_run() {
        let engine = engine();
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "steps": [{
                "type": "onchain",
                "id": "bad",
                "name": "Broken",
                "outputAs": "out",
                "onchain": {
                    "target": "0x1111111111111111111111111111111111111111",
                    "abiFragment": { "inputs": "nonsense" },
                    "argsMapping": { "x": "$.steps.missing.output" }
                }
            }],
            "outputMapping": {}
        }))
        .unwrap();

        let outcome = engine.run(&workflow, Map::new(), &dry_context()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.steps.len(), 1);
        assert!(!outcome.steps[0].success);
    }

    #[tokio::test]
    async fn canceled_run_reports_canceled_and_runs_no_steps() {
        let engine = engine();
        let workflow = two_step_workflow();
        let mut run = dry_context();
        run.cancel = CancellationToken::new();
        run.cancel.cancel();

        let outcome = engine.run(&workflow, Map::new(), &run).await;
        assert!(!outcome.success);
        assert!(outcome.steps.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("workflow canceled"));
    }

    #[tokio::test]
    async fn expired_deadline_reports_timeout() {
        let engine = engine();
        let workflow = two_step_workflow();
        let mut run = dry_context();
        run.deadline = Some(tokio::time::Instant::now());

        let outcome = engine.run(&workflow, Map::new(), &run).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("workflow deadline exceeded"));
    }

    #[tokio::test]
    async fn http_dry_run_reports_url_method_and_body() {
        let engine = engine();
        let workflow = two_step_workflow();
        let mut input = Map::new();
        input.insert("symbol".to_string(), json!("CRO"));
        let outcome = engine.run(&workflow, input, &dry_context()).await;
        let step1 = outcome.steps[0].output.as_ref().unwrap();
        assert_eq!(step1["_simulated"], json!(true));
        assert_eq!(step1["url"], json!("https://api.example/quote"));
        assert_eq!(step1["method"], json!("GET"));
        assert_eq!(step1["body"]["symbol"], json!("CRO"));
    }
}
