use serde::Serialize;

use crate::{
    error::{CaptureError, CaptureResult},
    models::{Quality, SubscriptionTier},
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementDecision {
    pub allowed: bool,
    pub requested: Quality,
    pub subscription: SubscriptionTier,
    pub available_qualities: Vec<Quality>,
}

pub fn available_qualities(tier: SubscriptionTier) -> Vec<Quality> {
    match tier {
        SubscriptionTier::Free => vec![Quality::Hd720],
        SubscriptionTier::Pro => vec![Quality::Hd720, Quality::Hd1080, Quality::Qhd1440],
        SubscriptionTier::Team | SubscriptionTier::Enterprise => Quality::ALL.to_vec(),
    }
}

/// Lowest subscription label that unlocks `quality`.
pub fn required_tier_label(quality: Quality) -> &'static str {
    match quality {
        Quality::Hd720 => "any",
        Quality::Hd1080 | Quality::Qhd1440 => "Pro or higher",
        Quality::Uhd4k => "Team or Enterprise",
    }
}

pub fn evaluate(requested: Quality, tier: SubscriptionTier) -> EntitlementDecision {
    let available_qualities = available_qualities(tier);
    EntitlementDecision {
        allowed: available_qualities.contains(&requested),
        requested,
        subscription: tier,
        available_qualities,
    }
}

/// Denials are final: the caller has to downgrade the request or upgrade the tier.
pub fn require(requested: Quality, tier: SubscriptionTier) -> CaptureResult<()> {
    let decision = evaluate(requested, tier);
    if decision.allowed {
        return Ok(());
    }

    Err(CaptureError::EntitlementDenied {
        requested,
        tier,
        available: decision.available_qualities,
        required: required_tier_label(requested),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_is_limited_to_720p() {
        let err = require(Quality::Uhd4k, SubscriptionTier::Free).unwrap_err();
        match err {
            CaptureError::EntitlementDenied {
                available,
                required,
                ..
            } => {
                assert_eq!(available, vec![Quality::Hd720]);
                assert_eq!(required, "Team or Enterprise");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(require(Quality::Hd720, SubscriptionTier::Free).is_ok());
    }

    #[test]
    fn pro_stops_short_of_4k() {
        assert!(evaluate(Quality::Qhd1440, SubscriptionTier::Pro).allowed);
        let decision = evaluate(Quality::Uhd4k, SubscriptionTier::Pro);
        assert!(!decision.allowed);
        assert_eq!(decision.available_qualities.len(), 3);
    }

    #[test]
    fn team_and_enterprise_get_everything() {
        for tier in [SubscriptionTier::Team, SubscriptionTier::Enterprise] {
            for quality in Quality::ALL {
                assert!(evaluate(quality, tier).allowed, "{tier} {quality}");
            }
        }
    }

    #[test]
    fn denial_message_names_the_upgrade() {
        let err = require(Quality::Hd1080, SubscriptionTier::Free).unwrap_err();
        assert_eq!(err.to_string(), "1080p recording requires Pro or higher subscription");
        assert_eq!(err.kind(), "EntitlementDenied");
    }
}
