//! Promo tier ladder driven by lifetime deposits.

use serde::{Deserialize, Serialize};

/// One rung: reaching `threshold_minor` in lifetime deposits grants `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoTier {
    pub name: String,
    pub threshold_minor: i64,
}

/// Tiers ordered by threshold, lowest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromoLadder {
    tiers: Vec<PromoTier>,
}

impl PromoLadder {
    pub fn new(mut tiers: Vec<PromoTier>) -> Self {
        tiers.sort_by_key(|t| t.threshold_minor);
        Self { tiers }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Highest tier whose threshold is met.
    pub fn tier_for(&self, lifetime_minor: i64) -> Option<&PromoTier> {
        self.tiers
            .iter()
            .rev()
            .find(|t| lifetime_minor >= t.threshold_minor)
    }

    fn rank(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }

    /// Tier to assign, if it is an upgrade over `current`.
    ///
    /// A current tier outside the ladder (assigned by hand) is never replaced.
    pub fn upgrade(&self, current: Option<&str>, lifetime_minor: i64) -> Option<&PromoTier> {
        let target = self.tier_for(lifetime_minor)?;
        let target_rank = self.rank(&target.name)?;
        match current {
            None => Some(target),
            Some(name) => self
                .rank(name)
                .filter(|rank| *rank < target_rank)
                .map(|_| target),
        }
    }
}
