//! Workflow definitions as stored in the template registry.
//!
//! A workflow is a linear list of steps over a shared context. Input typing
//! is data-driven: templates declare `VariableDefinition`s, and argument
//! validation is a function over those descriptors rather than a code type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::{ADDRESS_REGEX, EvmAddress};

/// Primitive types a workflow (or proxy) input variable may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Address,
    Uint256,
    Boolean,
    Array,
    Object,
}

/// One declared input of a workflow template or API proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
}

impl VariableDefinition {
    /// Check a provided value against this descriptor.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self.variable_type {
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Array => value.is_array(),
            VariableType::Object => value.is_object(),
            VariableType::Address => value
                .as_str()
                .is_some_and(|s| ADDRESS_REGEX.is_match(s)),
            VariableType::Uint256 => match value {
                Value::String(s) => alloy_primitives::U256::from_str_radix(s, 10).is_ok(),
                Value::Number(n) => n.is_u64(),
                _ => false,
            },
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "variable '{}' does not match declared type {:?}",
                self.name, self.variable_type
            ))
        }
    }

    fn json_schema_type(&self) -> Value {
        match self.variable_type {
            VariableType::String | VariableType::Address | VariableType::Uint256 => {
                json!("string")
            }
            VariableType::Number => json!("number"),
            VariableType::Boolean => json!("boolean"),
            VariableType::Array => json!("array"),
            VariableType::Object => json!("object"),
        }
    }
}

/// Render a descriptor list into the JSON Schema object MCP clients expect
/// in `tools/list`.
pub fn input_schema_object(definitions: &[VariableDefinition]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for definition in definitions {
        let mut property = Map::new();
        property.insert("type".to_string(), definition.json_schema_type());
        if !definition.description.is_empty() {
            property.insert(
                "description".to_string(),
                json!(definition.description),
            );
        }
        if let Some(example) = &definition.example {
            property.insert("examples".to_string(), json!([example]));
        }
        properties.insert(definition.name.clone(), Value::Object(property));
        if definition.required {
            required.push(json!(definition.name));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Validate call arguments against descriptors, filling defaults for absent
/// optional variables.
pub fn validate_arguments(
    definitions: &[VariableDefinition],
    arguments: &Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    let mut resolved = arguments.clone();
    for definition in definitions {
        match resolved.get(&definition.name) {
            Some(value) => definition.check(value)?,
            None => {
                if let Some(default) = &definition.default {
                    resolved.insert(definition.name.clone(), default.clone());
                } else if definition.required {
                    return Err(format!("missing required variable '{}'", definition.name));
                }
            }
        }
    }
    Ok(resolved)
}

/// HTTP step payload: a pay-gated proxy call or a direct URL call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub body_mapping: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_mapping: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_mapping: Option<Map<String, Value>>,
}

/// One on-chain call: either raw calldata or an ABI fragment with an
/// argument mapping. The target is a literal address or an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_fragment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_mapping: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainBatch {
    pub operations: Vec<OnchainOperation>,
}

/// Step payloads, discriminated by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Http { http: HttpStep },
    Onchain { onchain: OnchainOperation },
    OnchainBatch { onchain_batch: OnchainBatch },
}

/// One step of a workflow. `output_as` names the slot the step's output is
/// committed to in the run context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub name: String,
    pub output_as: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// A contract address a workflow may target dynamically, surfaced during
/// OAuth consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTarget {
    pub address: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeConfig {
    #[serde(default)]
    pub allowed_dynamic_targets: Vec<DynamicTarget>,
}

/// A stored workflow: steps, output projection, and optional dynamic-target
/// allowances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub output_mapping: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_config: Option<ScopeConfig>,
}

impl WorkflowDefinition {
    /// All literal on-chain targets plus declared dynamic targets, used to
    /// aggregate `workflowTargets` for the consent surface.
    pub fn declared_targets(&self) -> Vec<DynamicTarget> {
        let mut targets: Vec<DynamicTarget> = Vec::new();
        let mut push_unique = |target: DynamicTarget| {
            if !targets.iter().any(|t| t.address == target.address) {
                targets.push(target);
            }
        };
        for step in &self.steps {
            let operations: Vec<&OnchainOperation> = match &step.kind {
                StepKind::Onchain { onchain } => vec![onchain],
                StepKind::OnchainBatch { onchain_batch } => {
                    onchain_batch.operations.iter().collect()
                }
                StepKind::Http { .. } => continue,
            };
            for operation in operations {
                if let Some(raw) = &operation.target {
                    if let Ok(address) = raw.parse::<EvmAddress>() {
                        push_unique(DynamicTarget {
                            address,
                            name: operation.name.clone(),
                            description: None,
                        });
                    }
                }
            }
        }
        if let Some(scope_config) = &self.scope_config {
            for target in &scope_config.allowed_dynamic_targets {
                push_unique(target.clone());
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, variable_type: VariableType, required: bool) -> VariableDefinition {
        VariableDefinition {
            name: name.to_string(),
            variable_type,
            description: String::new(),
            required,
            default: None,
            example: None,
            validation: None,
        }
    }

    #[test]
    fn step_wire_format_nests_payload_under_type_key() {
        let step: Step = serde_json::from_value(json!({
            "type": "http",
            "id": "step1",
            "name": "Fetch quote",
            "outputAs": "quote",
            "http": { "proxyId": "proxy_1", "bodyMapping": { "symbol": "$.input.symbol" } }
        }))
        .unwrap();
        assert_eq!(step.output_as, "quote");
        match &step.kind {
            StepKind::Http { http } => assert_eq!(http.proxy_id.as_deref(), Some("proxy_1")),
            other => panic!("expected http step, got {other:?}"),
        }
        let round = serde_json::to_value(&step).unwrap();
        assert_eq!(round["type"], "http");
        assert_eq!(round["http"]["proxyId"], "proxy_1");
    }

    #[test]
    fn batch_step_parses() {
        let step: Step = serde_json::from_value(json!({
            "type": "onchain_batch",
            "id": "step2",
            "name": "Approve and swap",
            "outputAs": "txOut",
            "onchain_batch": { "operations": [
                { "target": "0x1111111111111111111111111111111111111111", "calldata": "0x" },
                { "expr": "$.input.router", "abiFragment": {"name": "swap", "inputs": []}, "argsMapping": {} }
            ]}
        }))
        .unwrap();
        match step.kind {
            StepKind::OnchainBatch { onchain_batch } => {
                assert_eq!(onchain_batch.operations.len(), 2);
                assert_eq!(
                    onchain_batch.operations[1].expr.as_deref(),
                    Some("$.input.router")
                );
            }
            other => panic!("expected batch step, got {other:?}"),
        }
    }

    #[test]
    fn argument_validation_enforces_types_and_defaults() {
        let definitions = vec![
            definition("amount", VariableType::Uint256, true),
            definition("recipient", VariableType::Address, true),
            VariableDefinition {
                default: Some(json!("cronos")),
                ..definition("network", VariableType::String, false)
            },
        ];
        let mut arguments = Map::new();
        arguments.insert("amount".to_string(), json!("1000000"));
        arguments.insert(
            "recipient".to_string(),
            json!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
        );
        let resolved = validate_arguments(&definitions, &arguments).unwrap();
        assert_eq!(resolved["network"], json!("cronos"));

        arguments.insert("amount".to_string(), json!("1.5"));
        assert!(validate_arguments(&definitions, &arguments).is_err());

        arguments.remove("amount");
        assert!(validate_arguments(&definitions, &arguments).is_err());
    }

    #[test]
    fn input_schema_renders_required_list() {
        let definitions = vec![
            definition("symbol", VariableType::String, true),
            definition("limit", VariableType::Number, false),
        ];
        let schema = input_schema_object(&definitions);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["symbol"]["type"], "string");
        assert_eq!(schema["required"], json!(["symbol"]));
    }

    #[test]
    fn declared_targets_dedupe_and_include_dynamic() {
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "steps": [
                { "type": "onchain", "id": "a", "name": "approve", "outputAs": "t1",
                  "onchain": { "target": "0x1111111111111111111111111111111111111111", "calldata": "0x" } },
                { "type": "onchain", "id": "b", "name": "approve again", "outputAs": "t2",
                  "onchain": { "target": "0x1111111111111111111111111111111111111111", "calldata": "0x" } }
            ],
            "outputMapping": {},
            "scopeConfig": { "allowedDynamicTargets": [
                { "address": "0x2222222222222222222222222222222222222222", "name": "router" }
            ]}
        }))
        .unwrap();
        let targets = workflow.declared_targets();
        assert_eq!(targets.len(), 2);
    }
}
