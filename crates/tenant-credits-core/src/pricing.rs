//! Payment provider price id to plan mapping.
//!
//! The table is parsed once at startup. Parsing rejects anything it cannot
//! map, and lookups of unknown ids are errors rather than a silent `free`.

use std::collections::BTreeMap;

use crate::error::{CreditError, Result};
use crate::PlanId;

/// Price ids of the tenant portal's catalog at the payment provider.
pub const DEFAULT_PRICE_PLAN_MAP: &str =
    "price_1SsEqV52lqSgjCzeKuUQGBOE=basic,price_1SsEr552lqSgjCzeBvWBTzKS=pro";

/// Validated price id → plan table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    prices: BTreeMap<String, PlanId>,
}

impl PriceTable {
    /// Parse `price_id=plan` pairs separated by commas.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::Configuration` for malformed pairs, unknown plan
    /// names, mappings to `free`, duplicate price ids, or an empty table.
    pub fn parse(input: &str) -> Result<Self> {
        let mut prices = BTreeMap::new();

        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (price_id, plan) = pair.split_once('=').ok_or_else(|| {
                CreditError::Configuration(format!("price mapping without '=': {pair}"))
            })?;
            let price_id = price_id.trim();
            let plan_name = plan.trim();

            if price_id.is_empty() {
                return Err(CreditError::Configuration(format!(
                    "empty price id in mapping: {pair}"
                )));
            }

            let plan = PlanId::parse(plan_name).ok_or_else(|| {
                CreditError::Configuration(format!("unknown plan '{plan_name}' for {price_id}"))
            })?;

            if plan == PlanId::Free {
                return Err(CreditError::Configuration(format!(
                    "price {price_id} cannot map to the free plan"
                )));
            }

            if prices.insert(price_id.to_string(), plan).is_some() {
                return Err(CreditError::Configuration(format!(
                    "duplicate price id: {price_id}"
                )));
            }
        }

        if prices.is_empty() {
            return Err(CreditError::Configuration("price table is empty".into()));
        }

        Ok(Self { prices })
    }

    /// Map a price id to its plan.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::UnknownPrice` if the id is not in the table.
    pub fn plan_for(&self, price_id: &str) -> Result<PlanId> {
        self.prices
            .get(price_id)
            .copied()
            .ok_or_else(|| CreditError::UnknownPrice(price_id.to_string()))
    }

    /// All configured price ids, for startup verification at the provider.
    pub fn price_ids(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }

    /// Number of configured prices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty. Never true for a parsed table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut prices = BTreeMap::new();
        prices.insert("price_1SsEqV52lqSgjCzeKuUQGBOE".to_string(), PlanId::Basic);
        prices.insert("price_1SsEr552lqSgjCzeBvWBTzKS".to_string(), PlanId::Pro);
        Self { prices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_parses_to_default_table() {
        let parsed = PriceTable::parse(DEFAULT_PRICE_PLAN_MAP).unwrap();
        assert_eq!(parsed, PriceTable::default());
        assert_eq!(
            parsed.plan_for("price_1SsEr552lqSgjCzeBvWBTzKS").unwrap(),
            PlanId::Pro
        );
    }

    #[test]
    fn unknown_price_is_an_error() {
        let table = PriceTable::default();
        assert!(matches!(
            table.plan_for("price_missing"),
            Err(CreditError::UnknownPrice(id)) if id == "price_missing"
        ));
    }

    #[test]
    fn rejects_bad_specs() {
        assert!(PriceTable::parse("").is_err());
        assert!(PriceTable::parse("price_a").is_err());
        assert!(PriceTable::parse("price_a=gold").is_err());
        assert!(PriceTable::parse("price_a=free").is_err());
        assert!(PriceTable::parse("price_a=pro,price_a=basic").is_err());
        assert!(PriceTable::parse("=pro").is_err());
    }

    #[test]
    fn accepts_business_plan() {
        let table = PriceTable::parse("price_b = business , price_p=pro").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.plan_for("price_b").unwrap(), PlanId::Business);
    }
}
