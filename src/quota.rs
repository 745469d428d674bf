//! Monthly send allowance calculation.
//!
//! The allowance is a hard ceiling checked at dispatch time, never a
//! pre-allocated budget: admin actions (bonus grants, add-on purchases or
//! cancellations) can change it between scheduling and send time, so the
//! dispatch loop recomputes it from a fresh [`BillingSnapshot`] at every
//! decision point.

use chrono::{DateTime, Duration, Utc};

use crate::models::{AddonStatus, AddonSubscription, BillingSnapshot, PlanTier};

/// Effective monthly email allowance for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    /// Hard ceiling. Zero means zero emails this cycle, regardless of
    /// audience size.
    Limited(i64),
    /// The enterprise tier sentinel. Recognized explicitly here; nothing
    /// else in the system infers "unlimited" from a magic number.
    Unlimited,
}

impl Allowance {
    /// Emails still allowed this cycle given `used` already sent.
    pub fn remaining(&self, used: i64) -> Remaining {
        match self {
            Self::Unlimited => Remaining::Unlimited,
            Self::Limited(cap) => Remaining::Limited((cap - used).max(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Limited(i64),
    Unlimited,
}

impl Remaining {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Limited(0))
    }
}

impl std::fmt::Display for Allowance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Monthly base allowance per plan tier.
fn tier_base(tier: PlanTier) -> i64 {
    match tier {
        PlanTier::Starter => 0,
        PlanTier::Growth => 3_000,
        PlanTier::Scale => 10_000,
        // Handled by the Unlimited sentinel in compute_allowance.
        PlanTier::Enterprise => 0,
    }
}

/// An add-on counts while its subscription is active, or cancelled but
/// still inside the paid window: access_until reaching at least the start
/// of tomorrow means the add-on covers all of today.
fn addon_is_active(addon: &AddonSubscription, now: DateTime<Utc>) -> bool {
    match addon.status {
        AddonStatus::Active => true,
        AddonStatus::Cancelled => match addon.access_until {
            Some(until) => {
                let start_of_tomorrow = (now.date_naive() + Duration::days(1))
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always a valid time")
                    .and_utc();
                until >= start_of_tomorrow
            }
            None => false,
        },
    }
}

/// Compute the effective monthly allowance:
/// base(tier) + sum of active add-on caps + bonus while unexpired.
///
/// Pure function of the snapshot and the clock; callers must not memoize
/// the result across a campaign's lifetime.
pub fn compute_allowance(snapshot: &BillingSnapshot, now: DateTime<Utc>) -> Allowance {
    if snapshot.tier == PlanTier::Enterprise {
        return Allowance::Unlimited;
    }

    let mut total = tier_base(snapshot.tier);

    // Caps are summed, not maxed: add-ons stack.
    for addon in &snapshot.addons {
        if addon_is_active(addon, now) {
            total += addon.monthly_cap;
        }
    }

    if let Some(bonus) = &snapshot.bonus {
        if !bonus.is_expired(now) {
            total += bonus.amount;
        }
    }

    Allowance::Limited(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BonusGrant;
    use uuid::Uuid;

    fn snapshot(tier: PlanTier) -> BillingSnapshot {
        BillingSnapshot {
            tier,
            addons: Vec::new(),
            bonus: None,
        }
    }

    fn addon(cap: i64) -> AddonSubscription {
        AddonSubscription::new(Uuid::new_v4(), format!("boost-{}", cap), cap)
    }

    #[test]
    fn test_tier_bases() {
        let now = Utc::now();
        assert_eq!(
            compute_allowance(&snapshot(PlanTier::Starter), now),
            Allowance::Limited(0)
        );
        assert_eq!(
            compute_allowance(&snapshot(PlanTier::Growth), now),
            Allowance::Limited(3_000)
        );
        assert_eq!(
            compute_allowance(&snapshot(PlanTier::Scale), now),
            Allowance::Limited(10_000)
        );
        assert_eq!(
            compute_allowance(&snapshot(PlanTier::Enterprise), now),
            Allowance::Unlimited
        );
    }

    #[test]
    fn test_addon_caps_sum_with_bonus() {
        let now = Utc::now();
        let mut s = snapshot(PlanTier::Growth);
        s.addons.push(addon(15_000));
        s.addons.push(addon(100_000));
        s.bonus = Some(BonusGrant {
            site_id: Uuid::new_v4(),
            amount: 5_000,
            expires_at: now + chrono::Duration::days(30),
            granted_at: now,
        });

        // 3,000 base + 15,000 + 100,000 + 5,000 bonus
        assert_eq!(compute_allowance(&s, now), Allowance::Limited(123_000));

        // The same bonus past its expiry contributes nothing but is not
        // removed from the snapshot.
        let later = now + chrono::Duration::days(31);
        assert_eq!(compute_allowance(&s, later), Allowance::Limited(118_000));
    }

    #[test]
    fn test_cancelled_addon_counts_through_paid_window() {
        let now = Utc::now();
        let mut inside = addon(15_000);
        inside.status = AddonStatus::Cancelled;
        inside.access_until = Some(now + chrono::Duration::days(3));

        let mut expired = addon(100_000);
        expired.status = AddonStatus::Cancelled;
        expired.access_until = Some(now - chrono::Duration::days(3));

        let mut no_window = addon(7_000);
        no_window.status = AddonStatus::Cancelled;
        no_window.access_until = None;

        let mut s = snapshot(PlanTier::Starter);
        s.addons.extend([inside, expired, no_window]);

        assert_eq!(compute_allowance(&s, now), Allowance::Limited(15_000));
    }

    #[test]
    fn test_remaining_never_negative() {
        let a = Allowance::Limited(100);
        assert_eq!(a.remaining(40), Remaining::Limited(60));
        assert_eq!(a.remaining(100), Remaining::Limited(0));
        assert_eq!(a.remaining(250), Remaining::Limited(0));
        assert!(a.remaining(100).is_exhausted());

        assert_eq!(Allowance::Unlimited.remaining(1_000_000), Remaining::Unlimited);
        assert!(!Allowance::Unlimited.remaining(1_000_000).is_exhausted());
    }

    #[test]
    fn test_zero_allowance_is_not_unlimited() {
        let now = Utc::now();
        let a = compute_allowance(&snapshot(PlanTier::Starter), now);
        assert_eq!(a, Allowance::Limited(0));
        assert!(a.remaining(0).is_exhausted());
    }
}
