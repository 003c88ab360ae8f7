//! Subscription-state admission rules.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::types::{Entitlement, SubscriptionStatus};

/// Subscription state forbids the operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Subscription inactive: {status}")]
pub struct SubscriptionDenied {
    pub status: SubscriptionStatus,
}

impl SubscriptionDenied {
    /// Machine-readable reason, `subscription_<status>`.
    pub fn reason(&self) -> String {
        format!("subscription_{}", self.status.as_str())
    }
}

/// Decide whether a tenant's billing state admits work at `now`.
///
/// | status              | rule                          |
/// |---------------------|-------------------------------|
/// | trialing, active    | allow                         |
/// | past_due            | allow iff `now <= grace_until` |
/// | canceled            | allow iff `now <= usage_period_end` |
/// | unpaid, unknown     | deny                          |
pub fn validate_subscription_access(
    now: DateTime<Utc>,
    entitlement: &Entitlement,
) -> Result<(), SubscriptionDenied> {
    let allowed = match &entitlement.subscription_status {
        SubscriptionStatus::Trialing | SubscriptionStatus::Active => true,
        SubscriptionStatus::PastDue => entitlement.grace_until.is_some_and(|grace| now <= grace),
        SubscriptionStatus::Canceled => now <= entitlement.usage_period_end,
        SubscriptionStatus::Unpaid | SubscriptionStatus::Unknown(_) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(SubscriptionDenied {
            status: entitlement.subscription_status.clone(),
        })
    }
}

/// Grace deadline carried on the entitlement after a billing status change.
///
/// Only `past_due` tenants get one; non-positive `grace_days` counts as one day.
pub fn grace_until_for_status(
    status: &SubscriptionStatus,
    period_end: DateTime<Utc>,
    grace_days: i64,
) -> Option<DateTime<Utc>> {
    if *status != SubscriptionStatus::PastDue {
        return None;
    }
    let days = if grace_days <= 0 { 1 } else { grace_days };
    TimeDelta::try_days(days).and_then(|delta| period_end.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 12, 0, 0).unwrap()
    }

    fn entitlement(status: &str) -> Entitlement {
        let start = now() - TimeDelta::days(10);
        Entitlement::new("tenant-a", "pro", start, start + TimeDelta::days(30))
            .with_status(SubscriptionStatus::parse(status))
    }

    #[test]
    fn test_subscription_matrix() {
        let now = now();
        let day = TimeDelta::hours(24);

        assert!(validate_subscription_access(now, &entitlement("trialing")).is_ok());
        assert!(validate_subscription_access(now, &entitlement("active")).is_ok());

        let grace_ahead = entitlement("past_due").with_grace_until(now + day);
        assert!(validate_subscription_access(now, &grace_ahead).is_ok());
        let grace_behind = entitlement("past_due").with_grace_until(now - day);
        assert!(validate_subscription_access(now, &grace_behind).is_err());

        let mut canceled = entitlement("canceled");
        canceled.usage_period_end = now + day;
        assert!(validate_subscription_access(now, &canceled).is_ok());
        canceled.usage_period_end = now - day;
        assert!(validate_subscription_access(now, &canceled).is_err());

        assert!(validate_subscription_access(now, &entitlement("unpaid")).is_err());
        assert!(validate_subscription_access(now, &entitlement("incomplete")).is_err());
    }

    #[test]
    fn test_past_due_without_grace_is_denied() {
        let err = validate_subscription_access(now(), &entitlement("past_due")).unwrap_err();
        assert_eq!(err.reason(), "subscription_past_due");
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let now = now();
        let on_grace = entitlement("past_due").with_grace_until(now);
        assert!(validate_subscription_access(now, &on_grace).is_ok());

        let mut on_end = entitlement("canceled");
        on_end.usage_period_end = now;
        assert!(validate_subscription_access(now, &on_end).is_ok());
    }

    #[test]
    fn test_unknown_status_reason() {
        let err = validate_subscription_access(now(), &entitlement(" Incomplete ")).unwrap_err();
        assert_eq!(err.reason(), "subscription_incomplete");
    }

    #[test]
    fn test_grace_until_for_status() {
        let end = now();
        assert_eq!(
            grace_until_for_status(&SubscriptionStatus::PastDue, end, 7),
            Some(end + TimeDelta::days(7))
        );
        assert_eq!(
            grace_until_for_status(&SubscriptionStatus::PastDue, end, 0),
            Some(end + TimeDelta::days(1))
        );
        assert_eq!(grace_until_for_status(&SubscriptionStatus::Active, end, 7), None);
    }
}
