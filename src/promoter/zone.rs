//! Zone-Aware Promotion Policy

use std::collections::{BTreeMap, BTreeSet};

use super::{Decision, DefaultPromoter, Promoter, PromoterInput};

/// Default policy, but while a redundancy zone that has a promotable
/// candidate lacks a voter, promote at most one server per zone.
///
/// A voterless zone with no eligible candidate does not hold back promotions
/// elsewhere.
#[derive(Debug, Clone, Default)]
pub struct ZoneAwarePromoter {
    inner: DefaultPromoter,
}

impl ZoneAwarePromoter {
    /// Create the zone-aware promoter
    pub fn new() -> Self {
        Self::default()
    }
}

impl Promoter for ZoneAwarePromoter {
    fn name(&self) -> &'static str {
        "zone_aware"
    }

    fn decide(&self, input: &PromoterInput<'_>) -> Decision {
        let mut decision = self.inner.decide(input);

        // Zone -> holds a voter that survives this decision
        let mut zones: BTreeMap<&str, bool> = BTreeMap::new();
        for server in &input.snapshot.servers {
            let zone = input.zone_of(&server.id);
            if zone.is_empty() {
                continue;
            }
            let keeps_vote = server.is_voter
                && !decision.remove.contains(&server.id)
                && !decision.demote.contains(&server.id);
            *zones.entry(zone).or_insert(false) |= keeps_vote;
        }

        let fills_gap = decision
            .promote
            .iter()
            .any(|id| zones.get(input.zone_of(id)) == Some(&false));
        if !fills_gap {
            return decision;
        }

        let mut filled = BTreeSet::new();
        let balanced: BTreeSet<_> = decision
            .promote
            .iter()
            .filter(|id| {
                let zone = input.zone_of(id);
                !zone.is_empty() && filled.insert(zone)
            })
            .cloned()
            .collect();

        if balanced.len() != decision.promote.len() {
            tracing::debug!(
                "Zone balancing: promoting {} of {} eligible servers",
                balanced.len(),
                decision.promote.len()
            );
        }
        decision.promote = balanced;
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promoter::fixtures::Fixture;
    use crate::state::ServerId;
    use std::time::Duration;

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
        ZoneAwarePromoter::new().decide(&input)
    }

    #[test]
    fn test_one_promotion_per_zone_while_unbalanced() {
        let fixture = Fixture::new()
            .leader("s1")
            .voter("s2")
            .voter("s3")
            .non_voter("s4")
            .non_voter("s5")
            .non_voter("s6")
            .non_voter("s7")
            .meta("s1", "", "a")
            .meta("s2", "", "a")
            .meta("s3", "", "a")
            .meta("s4", "", "b")
            .meta("s5", "", "b")
            .meta("s6", "", "c")
            .meta("s7", "", "a");

        let decision = decide(&fixture);
        assert_eq!(
            decision.promote,
            BTreeSet::from([
                ServerId::from("s4"),
                ServerId::from("s6"),
                ServerId::from("s7"),
            ])
        );
    }

    #[test]
    fn test_voterless_zone_without_candidate_does_not_block() {
        let fixture = Fixture::new()
            .leader("s1")
            .voter("s2")
            .voter("s3")
            .non_voter("s4")
            .non_voter("s5")
            .meta("s1", "", "a")
            .meta("s2", "", "a")
            .meta("s3", "", "a")
            .meta("s4", "", "a")
            .meta("s5", "", "b");

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

        let decision = ZoneAwarePromoter::new().decide(&input);
        let default = DefaultPromoter::new().decide(&input);
        assert_eq!(decision.promote, BTreeSet::from([ServerId::from("s4")]));
        assert_eq!(decision, default);
    }

    #[test]
    fn test_all_zones_covered_uses_default() {
        let fixture = Fixture::new()
            .leader("s1")
            .voter("s2")
            .voter("s3")
            .non_voter("s4")
            .non_voter("s5")
            .meta("s1", "", "a")
            .meta("s2", "", "b")
            .meta("s3", "", "c")
            .meta("s4", "", "a")
            .meta("s5", "", "b");

        let decision = decide(&fixture);
        assert_eq!(
            decision.promote,
            BTreeSet::from([ServerId::from("s4"), ServerId::from("s5")])
        );
    }

    #[test]
    fn test_zone_read_from_configured_tag() {
        let mut fixture = Fixture::new()
            .leader("s1")
            .voter("s2")
            .voter("s3")
            .non_voter("s4")
            .non_voter("s5");
        fixture.config.redundancy_zone_key = "az".to_string();
        for (id, az) in [("s1", "x"), ("s2", "x"), ("s3", "x"), ("s4", "y"), ("s5", "y")] {
            fixture.metadata.insert(
                ServerId::from(id),
                crate::state::ServerMetadata::default().with_tag("az", az),
            );
        }

        let decision = decide(&fixture);
        assert_eq!(decision.promote, BTreeSet::from([ServerId::from("s4")]));
    }
}
