//! Subscription status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

/// Provisioning status of a user's access subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Free trial period.
    Trial,
    /// Paid and usable.
    Active,
    /// End date passed or the panel expired the user.
    Expired,
    /// Disabled in the panel (manually or by traffic limit).
    Disabled,
    /// Created locally, not yet provisioned.
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Disabled => "disabled",
            SubscriptionStatus::Pending => "pending",
        }
    }

    /// True if the user can currently connect.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From TRIAL
            (Trial, Active)
                | (Trial, Expired)
                | (Trial, Disabled)
            // From ACTIVE
                | (Active, Expired)
                | (Active, Disabled)
                | (Active, Active) // Data refresh
            // From DISABLED
                | (Disabled, Active)
                | (Disabled, Expired)
            // From EXPIRED
                | (Expired, Active) // Renewal
                | (Expired, Disabled)
            // From PENDING
                | (Pending, Trial)
                | (Pending, Active)
                | (Pending, Disabled)
                | (Pending, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trial => vec![Active, Expired, Disabled],
            Active => vec![Expired, Disabled, Active],
            Disabled => vec![Active, Expired],
            Expired => vec![Active, Disabled],
            Pending => vec![Trial, Active, Disabled, Expired],
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "disabled" => Ok(SubscriptionStatus::Disabled),
            "pending" => Ok(SubscriptionStatus::Pending),
            other => Err(ValidationError::invalid_format(
                "subscription_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_can_become_active() {
        assert_eq!(
            SubscriptionStatus::Trial.transition_to(SubscriptionStatus::Active),
            Ok(SubscriptionStatus::Active)
        );
    }

    #[test]
    fn active_and_disabled_toggle_both_ways() {
        assert!(SubscriptionStatus::Active.can_transition_to(&SubscriptionStatus::Disabled));
        assert!(SubscriptionStatus::Disabled.can_transition_to(&SubscriptionStatus::Active));
    }

    #[test]
    fn active_refreshes_to_itself() {
        assert!(SubscriptionStatus::Active.can_transition_to(&SubscriptionStatus::Active));
    }

    #[test]
    fn expired_cannot_return_to_trial() {
        assert!(SubscriptionStatus::Expired
            .transition_to(SubscriptionStatus::Trial)
            .is_err());
    }

    #[test]
    fn no_status_is_terminal() {
        for status in [
            SubscriptionStatus::Trial,
            SubscriptionStatus::Active,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Disabled,
            SubscriptionStatus::Pending,
        ] {
            assert!(!status.is_terminal());
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_trial_and_active_grant_access() {
        assert!(SubscriptionStatus::Trial.grants_access());
        assert!(SubscriptionStatus::Active.grants_access());
        assert!(!SubscriptionStatus::Disabled.grants_access());
    }
}
