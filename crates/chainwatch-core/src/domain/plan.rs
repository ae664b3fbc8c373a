use serde::{Deserialize, Serialize};

/// Plan identifier. Unknown codes fall back to `Lite`, the default for
/// accounts without a subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanCode {
    Lite,
    Pro,
}

impl PlanCode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lite" => Some(Self::Lite),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Lite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Pro => "pro",
        }
    }
}

/// Enforcement limits for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub per_endpoint_rpm: u64,
    pub monthly_quota: u64,
}

/// One catalog row: limits plus list prices in integer cents.
#[derive(Debug, Clone, Copy)]
pub struct PlanEntry {
    pub limits: PlanLimits,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
}

/// The plan catalog, seeded at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    lite: PlanEntry,
    pro: PlanEntry,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            lite: PlanEntry {
                limits: PlanLimits {
                    per_endpoint_rpm: 20,
                    monthly_quota: 450_000,
                },
                monthly_price_cents: 4_900,
                annual_price_cents: 49_000,
            },
            pro: PlanEntry {
                limits: PlanLimits {
                    per_endpoint_rpm: 60,
                    monthly_quota: 1_350_000,
                },
                monthly_price_cents: 19_900,
                annual_price_cents: 199_000,
            },
        }
    }
}

impl PlanCatalog {
    pub fn new(lite: PlanEntry, pro: PlanEntry) -> Self {
        Self { lite, pro }
    }

    pub fn entry(&self, code: PlanCode) -> &PlanEntry {
        match code {
            PlanCode::Lite => &self.lite,
            PlanCode::Pro => &self.pro,
        }
    }

    pub fn limits(&self, code: PlanCode) -> PlanLimits {
        self.entry(code).limits
    }

    /// Catalog with overridden limits, for exercising quota boundaries
    /// without a third of a million requests.
    pub fn with_limits(lite: PlanLimits, pro: PlanLimits) -> Self {
        let mut catalog = Self::default();
        catalog.lite.limits = lite;
        catalog.pro.limits = pro;
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_matches_contract() {
        let catalog = PlanCatalog::default();
        assert_eq!(
            catalog.limits(PlanCode::Lite),
            PlanLimits {
                per_endpoint_rpm: 20,
                monthly_quota: 450_000
            }
        );
        assert_eq!(
            catalog.limits(PlanCode::Pro),
            PlanLimits {
                per_endpoint_rpm: 60,
                monthly_quota: 1_350_000
            }
        );
    }

    #[test]
    fn unknown_plan_codes_default_to_lite() {
        assert_eq!(PlanCode::parse_or_default("enterprise"), PlanCode::Lite);
        assert_eq!(PlanCode::parse_or_default("PRO"), PlanCode::Pro);
    }
}
