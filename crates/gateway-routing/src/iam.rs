//! Access policy evaluation.
//!
//! Only active rules take part. Deny rules are checked first and win over
//! any allow rule. Allow rules are grouped by dimension (models, providers,
//! pricing); when a key has allow rules for a dimension the candidate must
//! match at least one of them. A key without allow rules is open.
//!
//! Pricing rules match on `pricing_type` (`free` or `paid`) and on the
//! optional per-token price ceilings.

use gateway_core::{
    GatewayError, GatewayResult, IamRule, IamRuleType, IamRuleValue, ModelDefinition,
    ProviderMapping, RecordStatus,
};
use std::sync::Arc;
use tracing::debug;

use crate::metadata::CachedMetadata;

/// Outcome of evaluating a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IamDecision {
    /// The candidate may be used
    Allow,
    /// The candidate is excluded
    Deny {
        /// Rule that caused the denial
        rule_id: Option<String>,
        /// Human readable reason
        reason: String,
    },
}

impl IamDecision {
    /// Whether the decision allows the candidate
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert a denial into an [`GatewayError::AccessDenied`]
    pub fn into_result(self) -> GatewayResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { rule_id, reason } => Err(GatewayError::access_denied(rule_id, reason)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Models,
    Providers,
    Pricing,
}

fn dimension(rule_type: IamRuleType) -> Dimension {
    match rule_type {
        IamRuleType::AllowModels | IamRuleType::DenyModels => Dimension::Models,
        IamRuleType::AllowProviders | IamRuleType::DenyProviders => Dimension::Providers,
        IamRuleType::AllowPricing | IamRuleType::DenyPricing => Dimension::Pricing,
    }
}

/// Evaluate `rules` against one candidate
#[must_use]
pub fn evaluate(
    rules: &[IamRule],
    model: &ModelDefinition,
    mapping: &ProviderMapping,
) -> IamDecision {
    let active: Vec<&IamRule> = rules
        .iter()
        .filter(|rule| rule.status == RecordStatus::Active)
        .collect();

    for rule in active.iter().filter(|rule| rule.rule_type.is_deny()) {
        if let Some(reason) = deny_reason(rule, model, mapping) {
            return IamDecision::Deny {
                rule_id: Some(rule.id.clone()),
                reason,
            };
        }
    }

    for wanted in [Dimension::Models, Dimension::Providers, Dimension::Pricing] {
        let allows: Vec<&&IamRule> = active
            .iter()
            .filter(|rule| !rule.rule_type.is_deny() && dimension(rule.rule_type) == wanted)
            .collect();
        if allows.is_empty() || allows.iter().any(|rule| allows_candidate(rule, model, mapping)) {
            continue;
        }
        let reason = match wanted {
            Dimension::Models => format!("model {} is not in the allowed models", model.id),
            Dimension::Providers => format!(
                "provider {} is not in the allowed providers",
                mapping.provider_id
            ),
            Dimension::Pricing => format!(
                "pricing of {} on {} is not allowed",
                model.id, mapping.provider_id
            ),
        };
        return IamDecision::Deny {
            rule_id: allows.first().map(|rule| rule.id.clone()),
            reason,
        };
    }

    IamDecision::Allow
}

fn deny_reason(rule: &IamRule, model: &ModelDefinition, mapping: &ProviderMapping) -> Option<String> {
    let value = &rule.rule_value;
    match rule.rule_type {
        IamRuleType::DenyModels => contains(&value.models, &model.id)
            .then(|| format!("model {} is denied", model.id)),
        IamRuleType::DenyProviders => contains(&value.providers, &mapping.provider_id)
            .then(|| format!("provider {} is denied", mapping.provider_id)),
        IamRuleType::DenyPricing => pricing_denied(value, model, mapping),
        _ => None,
    }
}

fn allows_candidate(rule: &IamRule, model: &ModelDefinition, mapping: &ProviderMapping) -> bool {
    let value = &rule.rule_value;
    match rule.rule_type {
        IamRuleType::AllowModels => contains(&value.models, &model.id),
        IamRuleType::AllowProviders => contains(&value.providers, &mapping.provider_id),
        IamRuleType::AllowPricing => {
            pricing_type_matches(value, model, mapping).unwrap_or(true)
                && value
                    .max_input_price
                    .map_or(true, |max| mapping.pricing.input_price <= max)
                && value
                    .max_output_price
                    .map_or(true, |max| mapping.pricing.output_price <= max)
        }
        _ => false,
    }
}

fn pricing_denied(value: &IamRuleValue, model: &ModelDefinition, mapping: &ProviderMapping) -> Option<String> {
    if pricing_type_matches(value, model, mapping) == Some(true) {
        return Some(format!(
            "{} models are denied",
            value.pricing_type.as_deref().unwrap_or_default()
        ));
    }
    if let Some(max) = value.max_input_price {
        if mapping.pricing.input_price > max {
            return Some(format!(
                "input price {} exceeds the limit of {max}",
                mapping.pricing.input_price
            ));
        }
    }
    if let Some(max) = value.max_output_price {
        if mapping.pricing.output_price > max {
            return Some(format!(
                "output price {} exceeds the limit of {max}",
                mapping.pricing.output_price
            ));
        }
    }
    None
}

/// `None` when the rule has no pricing type
fn pricing_type_matches(
    value: &IamRuleValue,
    model: &ModelDefinition,
    mapping: &ProviderMapping,
) -> Option<bool> {
    let free = model.free || mapping.pricing.is_zero();
    match value.pricing_type.as_deref()? {
        "free" => Some(free),
        "paid" => Some(!free),
        _ => Some(false),
    }
}

fn contains(list: &[String], needle: &str) -> bool {
    list.iter().any(|item| item == needle)
}

/// Evaluates candidates against the rules of the calling API key
#[derive(Debug, Clone)]
pub struct IamEvaluator {
    metadata: Arc<CachedMetadata>,
}

impl IamEvaluator {
    /// Evaluator reading rules through `metadata`
    #[must_use]
    pub fn new(metadata: Arc<CachedMetadata>) -> Self {
        Self { metadata }
    }

    /// Allow or deny `mapping` of `model` for `api_key_id`
    pub async fn validate_model_access(
        &self,
        api_key_id: &str,
        model: &ModelDefinition,
        mapping: &ProviderMapping,
    ) -> GatewayResult<()> {
        let rules = self.metadata.iam_rules(api_key_id).await?;
        let decision = evaluate(&rules, model, mapping);
        if let IamDecision::Deny { rule_id, reason } = &decision {
            debug!(
                api_key_id = %api_key_id,
                model = %model.id,
                provider = %mapping.provider_id,
                rule_id = rule_id.as_deref().unwrap_or("-"),
                reason = %reason,
                "Candidate denied by IAM"
            );
        }
        decision.into_result()
    }
}
