//! Pay-gated HTTP calls.
//!
//! One protocol serves both MCP proxy tools and workflow `http` steps: send
//! the request, and when the upstream answers `402 Payment Required`, read
//! the payment requirements from the body, countersign an EIP-3009 transfer
//! with the session key, and retry once with the base64 `X-PAYMENT` header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::crypto::ServerKeyring;
use crate::error::GatewayError;
use crate::known;
use crate::nonce::{NonceNamespace, NonceStore};
use crate::sign::{SessionSigningContext, SignError, SigningService, TransferSignRequest};
use crate::store::ApiProxy;
use crate::types::{
    ExactPaymentPayload, PaymentPayload, PaymentRequiredBody, PaymentRequirements, Scheme,
    TokenAmount, UnixTimestamp, X402Version,
};

/// Per-call timeout for outbound HTTP.
pub const HTTP_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProxyCallError {
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: Value },
    #[error("402 response carried no usable payment requirements")]
    BadPaymentRequirements,
    #[error("unknown payment network: {0}")]
    UnknownNetwork(String),
    #[error("payment signing failed")]
    Sign(#[from] SignError),
    #[error("proxy headers could not be decrypted")]
    HeaderDecrypt,
    #[error("nonce store unavailable")]
    Nonce,
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<ProxyCallError> for GatewayError {
    fn from(error: ProxyCallError) -> Self {
        match error {
            ProxyCallError::Sign(sign) => sign.into(),
            ProxyCallError::Timeout => GatewayError::Timeout,
            ProxyCallError::Canceled => GatewayError::Canceled,
            ProxyCallError::Upstream { status, body } => GatewayError::Internal(format!(
                "upstream returned {status}: {body}"
            )),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

/// The observable result of a proxied call.
#[derive(Debug, Clone)]
pub struct ProxyCallOutcome {
    pub status: u16,
    pub body: Value,
    /// Amount paid when the call went through the 402 flow.
    pub paid: Option<TokenAmount>,
}

/// Executes pay-gated requests on behalf of delegated sessions.
#[derive(Clone)]
pub struct PayGate {
    http: reqwest::Client,
    signing: SigningService,
    keyring: Arc<ServerKeyring>,
    nonces: Arc<dyn NonceStore>,
}

impl PayGate {
    pub fn new(
        signing: SigningService,
        keyring: Arc<ServerKeyring>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_CALL_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            signing,
            keyring,
            nonces,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Perform a pay-gated call against a registered proxy.
    #[instrument(skip_all, fields(proxy = %proxy.id, url = %proxy.target_url))]
    pub async fn call_proxy(
        &self,
        proxy: &ApiProxy,
        session: &SessionSigningContext,
        body: Option<Value>,
        query: Option<&Map<String, Value>>,
        extra_headers: Option<&Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<ProxyCallOutcome, ProxyCallError> {
        let mut headers: HashMap<String, String> = match &proxy.encrypted_headers {
            Some(envelope) => self
                .keyring
                .decrypt_json(envelope)
                .map_err(|_| ProxyCallError::HeaderDecrypt)?,
            None => HashMap::new(),
        };
        if let Some(extra) = extra_headers {
            for (key, value) in extra {
                if let Some(s) = value.as_str() {
                    headers.insert(key.clone(), s.to_string());
                }
            }
        }

        self.call_url(
            &proxy.http_method,
            &proxy.target_url,
            &proxy.content_type,
            headers,
            body,
            query,
            session,
            cancel,
        )
        .await
    }

    /// Perform a pay-gated call against an arbitrary URL (workflow `http`
    /// steps without a proxy reference).
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(url = %url, method = %method))]
    pub async fn call_url(
        &self,
        method: &str,
        url: &str,
        content_type: &str,
        headers: HashMap<String, String>,
        body: Option<Value>,
        query: Option<&Map<String, Value>>,
        session: &SessionSigningContext,
        cancel: &CancellationToken,
    ) -> Result<ProxyCallOutcome, ProxyCallError> {
        let request = self.build_request(method, url, content_type, &headers, &body, query)?;
        let response = self.execute(request, cancel).await?;

        if response.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            return Self::finish(response, None, cancel).await;
        }

        let payment_body: PaymentRequiredBody = Self::read_json(response, cancel)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| ProxyCallError::BadPaymentRequirements)?
            .ok_or(ProxyCallError::BadPaymentRequirements)?;
        let requirements = payment_body
            .into_requirements()
            .ok_or(ProxyCallError::BadPaymentRequirements)?;
        tracing::debug!(
            network = %requirements.network,
            amount = %requirements.max_amount_required,
            "upstream requires payment"
        );

        let header = self.build_payment_header(session, &requirements).await?;
        let paid = requirements.max_amount_required;

        let mut retry_headers = headers;
        retry_headers.insert("X-PAYMENT".to_string(), header);
        let retry = self.build_request(method, url, content_type, &retry_headers, &body, query)?;
        let response = self.execute(retry, cancel).await?;
        Self::finish(response, Some(paid), cancel).await
    }

    /// Build the base64 `X-PAYMENT` header value for the given requirements.
    pub async fn build_payment_header(
        &self,
        session: &SessionSigningContext,
        requirements: &PaymentRequirements,
    ) -> Result<String, ProxyCallError> {
        let chain_id = known::chain_id_by_network_name(&requirements.network)
            .ok_or_else(|| ProxyCallError::UnknownNetwork(requirements.network.clone()))?;

        let nonce_token = self
            .nonces
            .generate(NonceNamespace::Payment)
            .await
            .map_err(|_| ProxyCallError::Nonce)?;
        let nonce = nonce_token
            .parse()
            .map_err(|_| ProxyCallError::Nonce)?;

        let now = UnixTimestamp::try_now().map_err(|_| ProxyCallError::Nonce)?;
        let request = TransferSignRequest {
            from: session.owner_wallet,
            to: requirements.pay_to,
            value: requirements.max_amount_required,
            valid_after: UnixTimestamp(now.0.saturating_sub(10 * 60)),
            valid_before: now + requirements.max_timeout_seconds,
            nonce,
            token_address: requirements.asset,
            chain_id,
        };
        let envelope = self.signing.sign_transfer(session, &request)?;

        let payload = PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: requirements.network.clone(),
            payload: ExactPaymentPayload {
                from: request.from,
                to: request.to,
                value: request.value,
                valid_after: request.valid_after,
                valid_before: request.valid_before,
                nonce: request.nonce,
                asset: requirements.asset,
                signature: envelope.to_hex(),
            },
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| ProxyCallError::Transport(e.to_string()))?;
        Ok(b64.encode(json))
    }

    fn build_request(
        &self,
        method: &str,
        url: &str,
        content_type: &str,
        headers: &HashMap<String, String>,
        body: &Option<Value>,
        query: Option<&Map<String, Value>>,
    ) -> Result<reqwest::Request, ProxyCallError> {
        let method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| ProxyCallError::Transport(format!("invalid method {method}")))?;
        let mut builder = self.http.request(method, url);
        if let Some(query) = query {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect();
            builder = builder.query(&pairs);
        }
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(serde_json::to_vec(body).map_err(|e| ProxyCallError::Transport(e.to_string()))?);
        }
        builder.build().map_err(|e| ProxyCallError::Transport(e.to_string()))
    }

    async fn execute(
        &self,
        request: reqwest::Request,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProxyCallError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProxyCallError::Canceled),
            result = self.http.execute(request) => result.map_err(|e| {
                if e.is_timeout() {
                    ProxyCallError::Timeout
                } else {
                    ProxyCallError::Transport(e.to_string())
                }
            }),
        }
    }

    async fn read_json(
        response: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ProxyCallError> {
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyCallError::Canceled),
            bytes = response.bytes() => bytes.map_err(|e| ProxyCallError::Transport(e.to_string()))?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(Some(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))),
        }
    }

    async fn finish(
        response: reqwest::Response,
        paid: Option<TokenAmount>,
        cancel: &CancellationToken,
    ) -> Result<ProxyCallOutcome, ProxyCallError> {
        let status = response.status().as_u16();
        let body = Self::read_json(response, cancel).await?.unwrap_or(Value::Null);
        if !(200..300).contains(&status) {
            return Err(ProxyCallError::Upstream { status, body });
        }
        Ok(ProxyCallOutcome { status, body, paid })
    }
}

/// Substitute `{{name}}` placeholders in a request template with provided
/// variables. A value that is exactly one placeholder keeps the variable's
/// JSON type; embedded placeholders render as strings.
pub fn apply_template(template: &Value, variables: &Map<String, Value>) -> Value {
    match template {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
                let name = trimmed[2..trimmed.len() - 2].trim();
                if let Some(value) = variables.get(name) {
                    return value.clone();
                }
            }
            let mut rendered = s.clone();
            for (name, value) in variables {
                let needle = format!("{{{{{name}}}}}");
                if rendered.contains(&needle) {
                    let replacement = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    rendered = rendered.replace(&needle, &replacement);
                }
            }
            Value::String(rendered)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| apply_template(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), apply_template(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_placeholder_keeps_json_type() {
        let mut vars = Map::new();
        vars.insert("amount".to_string(), json!(42));
        vars.insert("symbol".to_string(), json!("CRO"));
        let template = json!({ "amount": "{{amount}}", "pair": "{{symbol}}/USD" });
        let applied = apply_template(&template, &vars);
        assert_eq!(applied["amount"], json!(42));
        assert_eq!(applied["pair"], json!("CRO/USD"));
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        let vars = Map::new();
        let template = json!({ "keep": "{{missing}}" });
        let applied = apply_template(&template, &vars);
        assert_eq!(applied["keep"], json!("{{missing}}"));
    }

    #[test]
    fn payment_header_payload_shape() {
        // The canonical X-PAYMENT object, as the settlement side expects it.
        let payload = PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: "cronos".to_string(),
            payload: ExactPaymentPayload {
                from: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap(),
                to: "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap(),
                value: TokenAmount::from(1_000_000u64),
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(1_800_000_000),
                nonce: crate::types::HexEncodedNonce([7u8; 32]),
                asset: "0xc21223249ca28397b4b6541dffaecc539bff0c59".parse().unwrap(),
                signature: format!("0x{}", "ab".repeat(149)),
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["x402Version"], json!(1));
        assert_eq!(value["scheme"], json!("exact"));
        assert_eq!(value["network"], json!("cronos"));
        assert_eq!(value["payload"]["value"], json!("1000000"));
        assert_eq!(value["payload"]["validBefore"], json!("1800000000"));
        assert!(value["payload"]["signature"]
            .as_str()
            .unwrap()
            .starts_with("0x"));
    }
}
