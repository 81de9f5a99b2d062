//! Candidate ordering.
//!
//! Candidates are ranked by, in order: failures of their provider earlier in
//! this request, number of request requirements the mapping does not meet,
//! stability, input price, and catalog declaration order. The queue re-ranks
//! the remaining candidates after every failure.

use gateway_core::{ModelCapabilities, ModelDefinition, ProviderMapping, RequestRequirements};
use std::cmp::Ordering;
use std::collections::HashMap;

/// One (model, mapping) pair considered for dispatch
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Logical model
    pub model: &'a ModelDefinition,
    /// Mapping to dispatch to
    pub mapping: &'a ProviderMapping,
    /// Index of the mapping in the catalog declaration
    pub position: usize,
}

impl Candidate<'_> {
    /// Provider id of the mapping
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.mapping.provider_id
    }
}

/// Requirements of `requirements` that `capabilities` does not offer.
///
/// Streaming is not counted: a non-streaming mapping is served through a
/// synthesized stream.
#[must_use]
pub fn unmet_requirements(requirements: &RequestRequirements, capabilities: &ModelCapabilities) -> u32 {
    [
        requirements.vision && !capabilities.vision,
        requirements.json_output && !capabilities.json_output,
        requirements.json_schema && !capabilities.json_output_schema,
        requirements.tools && !capabilities.tools,
        requirements.reasoning && !capabilities.reasoning,
    ]
    .into_iter()
    .map(u32::from)
    .sum()
}

#[derive(Debug, Clone, Copy)]
struct RankKey {
    failures: u32,
    unmet: u32,
    stability: u8,
    input_price: f64,
    position: usize,
}

impl RankKey {
    fn compare(&self, other: &Self) -> Ordering {
        self.failures
            .cmp(&other.failures)
            .then(self.unmet.cmp(&other.unmet))
            .then(self.stability.cmp(&other.stability))
            .then(self.input_price.total_cmp(&other.input_price))
            .then(self.position.cmp(&other.position))
    }
}

/// Remaining candidates of one request
#[derive(Debug)]
pub struct CandidateQueue<'a> {
    remaining: Vec<Candidate<'a>>,
    requirements: RequestRequirements,
    failures: HashMap<String, u32>,
}

impl<'a> CandidateQueue<'a> {
    /// Queue over `(declaration index, mapping)` pairs of `model`
    #[must_use]
    pub fn new(
        model: &'a ModelDefinition,
        mappings: impl IntoIterator<Item = (usize, &'a ProviderMapping)>,
        requirements: RequestRequirements,
    ) -> Self {
        Self {
            remaining: mappings
                .into_iter()
                .map(|(position, mapping)| Candidate {
                    model,
                    mapping,
                    position,
                })
                .collect(),
            requirements,
            failures: HashMap::new(),
        }
    }

    /// Number of candidates not yet taken
    #[must_use]
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    /// Whether every candidate has been taken
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Record a failed or skipped attempt on `provider`
    pub fn record_failure(&mut self, provider: &str) {
        *self.failures.entry(provider.to_string()).or_default() += 1;
    }

    /// Failures recorded for `provider` in this request
    #[must_use]
    pub fn failures(&self, provider: &str) -> u32 {
        self.failures.get(provider).copied().unwrap_or_default()
    }

    /// Remaining candidates in current rank order
    #[must_use]
    pub fn ordered(&self) -> Vec<Candidate<'a>> {
        let mut ordered = self.remaining.clone();
        ordered.sort_by(|a, b| self.key(a).compare(&self.key(b)));
        ordered
    }

    /// Take the best-ranked remaining candidate
    pub fn next_candidate(&mut self) -> Option<Candidate<'a>> {
        let (index, _) = self
            .remaining
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| self.key(a).compare(&self.key(b)))?;
        Some(self.remaining.remove(index))
    }

    fn key(&self, candidate: &Candidate<'_>) -> RankKey {
        RankKey {
            failures: self.failures(candidate.provider()),
            unmet: unmet_requirements(&self.requirements, &candidate.mapping.capabilities),
            stability: candidate.model.mapping_stability(candidate.mapping).rank(),
            input_price: candidate.mapping.pricing.input_price,
            position: candidate.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::StabilityLevel;
    use pretty_assertions::assert_eq;

    fn mapping(provider: &str, price: f64) -> ProviderMapping {
        let mut mapping = ProviderMapping::new(provider, "m");
        mapping.pricing.input_price = price;
        mapping
    }

    fn model(providers: Vec<ProviderMapping>) -> ModelDefinition {
        ModelDefinition {
            id: "m".to_string(),
            family: "test".to_string(),
            free: false,
            stability: StabilityLevel::Stable,
            output: vec![],
            providers,
        }
    }

    fn order(queue: &CandidateQueue<'_>) -> Vec<String> {
        queue
            .ordered()
            .into_iter()
            .map(|c| c.provider().to_string())
            .collect()
    }

    fn queue<'a>(model: &'a ModelDefinition, requirements: RequestRequirements) -> CandidateQueue<'a> {
        CandidateQueue::new(model, model.providers.iter().enumerate(), requirements)
    }

    #[test]
    fn test_cheapest_first_then_declaration_order() {
        let m = model(vec![
            mapping("a", 0.000_003),
            mapping("b", 0.000_001),
            mapping("c", 0.000_001),
        ]);
        assert_eq!(order(&queue(&m, RequestRequirements::default())), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_stability_before_price() {
        let mut beta = mapping("beta", 0.0);
        beta.stability = Some(StabilityLevel::Beta);
        let m = model(vec![beta, mapping("stable", 0.000_01)]);
        assert_eq!(order(&queue(&m, RequestRequirements::default())), vec!["stable", "beta"]);
    }

    #[test]
    fn test_capability_match_before_stability() {
        let mut vision = mapping("vision", 0.000_01);
        vision.capabilities.vision = true;
        vision.stability = Some(StabilityLevel::Experimental);
        let m = model(vec![mapping("text", 0.0), vision]);

        let requirements = RequestRequirements {
            vision: true,
            ..RequestRequirements::default()
        };
        assert_eq!(order(&queue(&m, requirements)), vec!["vision", "text"]);
        assert_eq!(order(&queue(&m, RequestRequirements::default())), vec!["text", "vision"]);
    }

    #[test]
    fn test_failures_demote_provider() {
        let m = model(vec![
            mapping("openai", 0.0),
            mapping("openai", 0.000_001),
            mapping("azure", 0.000_002),
        ]);
        let mut q = queue(&m, RequestRequirements::default());

        let first = q.next_candidate().expect("candidate");
        assert_eq!((first.provider(), first.position), ("openai", 0));
        q.record_failure(first.provider());

        let second = q.next_candidate().expect("candidate");
        assert_eq!(second.provider(), "azure");
        let third = q.next_candidate().expect("candidate");
        assert_eq!((third.provider(), third.position), ("openai", 1));
        assert!(q.next_candidate().is_none());
    }

    #[test]
    fn test_unmet_requirements() {
        let caps = ModelCapabilities {
            streaming: false,
            tools: true,
            ..ModelCapabilities::default()
        };
        let requirements = RequestRequirements {
            streaming: true,
            tools: true,
            json_output: true,
            reasoning: true,
            ..RequestRequirements::default()
        };
        assert_eq!(unmet_requirements(&requirements, &caps), 2);
    }
}
