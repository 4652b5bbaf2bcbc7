//! Upgrade-Gated Promotion Policy
//!
//! Canary upgrades: all promotions are held while `suspend_promotions` is
//! set, and servers on a newer version may only become voters once
//! `upgrade_migration` sanctions the migration.

use std::cmp::Ordering;

use super::{Decision, DefaultPromoter, Promoter, PromoterInput};

/// Default policy plus upgrade gating
#[derive(Debug, Clone, Default)]
pub struct UpgradeGatedPromoter {
    inner: DefaultPromoter,
}

impl UpgradeGatedPromoter {
    /// Create the upgrade-gated promoter
    pub fn new() -> Self {
        Self::default()
    }
}

impl Promoter for UpgradeGatedPromoter {
    fn name(&self) -> &'static str {
        "upgrade_gated"
    }

    fn decide(&self, input: &PromoterInput<'_>) -> Decision {
        let mut decision = Decision::default();

        if input.config.suspend_promotions {
            tracing::debug!("Promotions suspended for upgrade");
        } else {
            decision.promote = self.inner.promotions(input, input.config.upgrade_migration);
        }

        self.inner.cleanup(input, &mut decision);
        decision.transfer_leadership = self.inner.leadership_transfer(input);
        decision
    }
}

/// Compare dotted versions numerically where both segments are numbers.
///
/// `1.10.0 > 1.9.3`; missing trailing segments count as zero; a segment that
/// is not a number compares lexically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.trim_start_matches('v').split('.');
    let mut right = b.trim_start_matches('v').split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let l = l.unwrap_or("0");
                let r = r.unwrap_or("0");
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promoter::fixtures::Fixture;
    use crate::state::ServerId;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn upgrade_fixture() -> Fixture {
        Fixture::new()
            .leader("s1")
            .voter("s2")
            .voter("s3")
            .non_voter("s4")
            .meta("s1", "1.9.0", "")
            .meta("s2", "1.9.0", "")
            .meta("s3", "1.9.0", "")
            .meta("s4", "2.0.0", "")
    }

    fn decide(fixture: &Fixture) -> Decision {
        let now = fixture.base + Duration::from_secs(20);
        let snapshot = fixture.snapshot();
        let health = fixture.health_at(now, &[]);
        let input = PromoterInput {
            snapshot: &snapshot,
            health: &health,
            metadata: &fixture.metadata,
            config: &fixture.config,
            now,
        };
        UpgradeGatedPromoter::new().decide(&input)
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0.0", "1.99.99"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.0", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("1.2.0-rc1", "1.2.0-rc2"), Ordering::Less);
    }

    #[test]
    fn test_newer_version_needs_migration() {
        let mut fixture = upgrade_fixture();
        assert!(decide(&fixture).promote.is_empty());

        fixture.config.upgrade_migration = true;
        assert_eq!(decide(&fixture).promote, BTreeSet::from([ServerId::from("s4")]));
    }

    #[test]
    fn test_suspend_holds_all_promotions() {
        let mut fixture = upgrade_fixture();
        fixture.config.upgrade_migration = true;
        fixture.config.suspend_promotions = true;

        let decision = decide(&fixture);
        assert!(decision.promote.is_empty());
    }

    #[test]
    fn test_suspend_still_cleans_up() {
        let mut fixture = upgrade_fixture().voter("s5");
        fixture.config.suspend_promotions = true;

        let now = fixture.base + Duration::from_secs(60);
        let snapshot = fixture.snapshot();
        let health = fixture.health_at(now, &["s5"]);
        let input = PromoterInput {
            snapshot: &snapshot,
            health: &health,
            metadata: &fixture.metadata,
            config: &fixture.config,
            now,
        };

        let decision = UpgradeGatedPromoter::new().decide(&input);
        assert_eq!(decision.remove, BTreeSet::from([ServerId::from("s5")]));
    }
}
