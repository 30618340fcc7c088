use serde::{Deserialize, Serialize};

use crate::package::TypeDescriptor;
use crate::types::WindowsSku;

/// How two strategy type descriptors are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeMatchStrategy {
    /// Namespace, name and version must all be equal.
    Exact,
    /// Namespace and name equal; versions may differ.
    #[default]
    NamespaceAndName,
}

impl TypeMatchStrategy {
    pub fn matches(&self, a: &TypeDescriptor, b: &TypeDescriptor) -> bool {
        match self {
            Self::Exact => a == b,
            Self::NamespaceAndName => a.namespace == b.namespace && a.name == b.name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriteriaMatchStrategy {
    #[default]
    MatchAny,
    MatchAll,
}

/// A named rule over a machine's SKU and the strategy kinds of the packages
/// going onto it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAdjustmentMatchCriteria {
    pub name: String,
    #[serde(default)]
    pub skus_to_match: Vec<WindowsSku>,
    #[serde(default)]
    pub initialization_strategies_to_match: Vec<TypeDescriptor>,
    #[serde(default)]
    pub type_match_strategy: TypeMatchStrategy,
    #[serde(default)]
    pub match_strategy: CriteriaMatchStrategy,
}

impl DeploymentAdjustmentMatchCriteria {
    /// Evaluate the SKU check, then the strategy-type check.
    ///
    /// Under `MatchAny` a passing SKU check returns immediately and the type
    /// check is never evaluated.
    pub fn matches(&self, sku: WindowsSku, strategy_types: &[TypeDescriptor]) -> bool {
        let sku_matched = self.skus_to_match.contains(&sku);
        if sku_matched && self.match_strategy == CriteriaMatchStrategy::MatchAny {
            return true;
        }

        let type_matched = strategy_types.iter().any(|candidate| {
            self.initialization_strategies_to_match
                .iter()
                .any(|wanted| self.type_match_strategy.matches(wanted, candidate))
        });

        match self.match_strategy {
            CriteriaMatchStrategy::MatchAny => type_matched,
            CriteriaMatchStrategy::MatchAll => sku_matched && type_matched,
        }
    }
}
