use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Headquarters,
    Agency,
    Dealer,
    Retail,
}

impl Tier {
    /// The tier that allocates rebate down to this one.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Headquarters => None,
            Self::Agency => Some(Self::Headquarters),
            Self::Dealer | Self::Retail => Some(Self::Agency),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headquarters => "headquarters",
            Self::Agency => "agency",
            Self::Dealer => "dealer",
            Self::Retail => "retail",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "headquarters" | "hq" => Ok(Self::Headquarters),
            "agency" => Ok(Self::Agency),
            "dealer" => Ok(Self::Dealer),
            "retail" => Ok(Self::Retail),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported tier `{other}` (expected headquarters|agency|dealer|retail)"
            ))),
        }
    }
}

/// Everything an allocation screen needs to know about which policy and which
/// pair of tiers it is editing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub policy_id: PolicyId,
    pub parent_tier: Tier,
    pub child_tier: Tier,
}

impl PolicyContext {
    pub fn new(policy_id: PolicyId, child_tier: Tier) -> Result<Self, DomainError> {
        let parent_tier = child_tier.parent().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "tier `{child_tier}` has no parent tier to allocate from"
            ))
        })?;
        Ok(Self { policy_id, parent_tier, child_tier })
    }
}

#[cfg(test)]
mod tests {
    use super::{PolicyContext, PolicyId, Tier};
    use crate::errors::DomainError;

    #[test]
    fn tier_parents_follow_distribution_hierarchy() {
        assert_eq!(Tier::Headquarters.parent(), None);
        assert_eq!(Tier::Agency.parent(), Some(Tier::Headquarters));
        assert_eq!(Tier::Dealer.parent(), Some(Tier::Agency));
        assert_eq!(Tier::Retail.parent(), Some(Tier::Agency));
    }

    #[test]
    fn context_resolves_parent_tier() {
        let context =
            PolicyContext::new(PolicyId("P-100".to_owned()), Tier::Agency).expect("agency context");
        assert_eq!(context.parent_tier, Tier::Headquarters);
        assert_eq!(context.child_tier, Tier::Agency);
    }

    #[test]
    fn headquarters_cannot_be_an_allocation_child() {
        let error = PolicyContext::new(PolicyId("P-100".to_owned()), Tier::Headquarters)
            .expect_err("headquarters has no parent");
        assert!(matches!(error, DomainError::InvariantViolation(ref message) if message.contains("headquarters")));
    }

    #[test]
    fn tier_parses_short_alias() {
        assert_eq!("HQ".parse::<Tier>().expect("alias"), Tier::Headquarters);
        assert!("franchise".parse::<Tier>().is_err());
    }
}
