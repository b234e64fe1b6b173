use chrono::{DateTime, Utc};

use crate::models::{
    EngagementLevel, RfmBreakdown, ScoreResult, Snapshot, SubscriberStatus, Tier, TierClass,
};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const RECENCY_WEIGHT: i32 = 40;
const FREQUENCY_WEIGHT: i32 = 30;
const MONETARY_WEIGHT: i32 = 30;

// All sub-scores at 1.
pub const MIN_SCORE: i32 = RECENCY_WEIGHT + FREQUENCY_WEIGHT + MONETARY_WEIGHT;
pub const MAX_SCORE: i32 = 5 * MIN_SCORE;

pub const HIGH_ENGAGEMENT_THRESHOLD: i32 = 400;
pub const MEDIUM_ENGAGEMENT_THRESHOLD: i32 = 250;

pub fn compute_engagement(snapshot: &Snapshot, now: DateTime<Utc>) -> ScoreResult {
    let days = days_since_active(snapshot, now);
    let breakdown = rfm_breakdown(snapshot, now);
    let score = composite_score(breakdown);

    ScoreResult {
        score,
        engagement: engagement_for(score),
        risk: churn_risk(snapshot.status, days),
    }
}

pub fn rfm_breakdown(snapshot: &Snapshot, now: DateTime<Utc>) -> RfmBreakdown {
    RfmBreakdown {
        recency: recency_score(days_since_active(snapshot, now)),
        frequency: frequency_score(activity_count(snapshot)),
        monetary: monetary_score(snapshot.status, &snapshot.tier),
    }
}

pub fn composite_score(breakdown: RfmBreakdown) -> i32 {
    i32::from(breakdown.recency) * RECENCY_WEIGHT
        + i32::from(breakdown.frequency) * FREQUENCY_WEIGHT
        + i32::from(breakdown.monetary) * MONETARY_WEIGHT
}

/// Falls back to the join date, then the Unix epoch. Rounds down.
pub fn days_since_active(snapshot: &Snapshot, now: DateTime<Utc>) -> i64 {
    let last_interaction = snapshot
        .last_active
        .or(snapshot.join_date)
        .unwrap_or_default();
    (now - last_interaction)
        .num_milliseconds()
        .div_euclid(MILLIS_PER_DAY)
}

pub fn activity_count(snapshot: &Snapshot) -> i64 {
    i64::from(snapshot.total_opens.max(0)) + i64::from(snapshot.total_clicks.max(0)) * 2
}

pub fn recency_score(days_since_active: i64) -> u8 {
    match days_since_active {
        i64::MIN..=7 => 5,
        8..=30 => 4,
        31..=60 => 3,
        61..=90 => 2,
        _ => 1,
    }
}

pub fn frequency_score(activity: i64) -> u8 {
    match activity {
        51.. => 5,
        21..=50 => 4,
        11..=20 => 3,
        3..=10 => 2,
        _ => 1,
    }
}

pub fn monetary_score(status: SubscriberStatus, tier: &Tier) -> u8 {
    match (tier.class(), status) {
        (TierClass::Founding, _) => 5,
        (TierClass::Annual, SubscriberStatus::Paid) => 4,
        (_, SubscriberStatus::Paid) => 3,
        (_, SubscriberStatus::Comp) => 2,
        _ => 1,
    }
}

pub fn engagement_for(score: i32) -> EngagementLevel {
    if score >= HIGH_ENGAGEMENT_THRESHOLD {
        EngagementLevel::High
    } else if score >= MEDIUM_ENGAGEMENT_THRESHOLD {
        EngagementLevel::Medium
    } else {
        EngagementLevel::Low
    }
}

pub fn churn_risk(status: SubscriberStatus, days_since_active: i64) -> i32 {
    match status {
        SubscriberStatus::Paid => match days_since_active {
            61.. => 80,
            31..=60 => 50,
            15..=30 => 20,
            _ => 0,
        },
        SubscriberStatus::Free | SubscriberStatus::Comp => match days_since_active {
            91.. => 90,
            46..=90 => 60,
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(
        days_inactive: i64,
        opens: i32,
        clicks: i32,
        status: &str,
        tier: &str,
    ) -> Snapshot {
        Snapshot {
            join_date: Some(now() - Duration::days(365)),
            last_active: Some(now() - Duration::days(days_inactive)),
            total_opens: opens,
            total_clicks: clicks,
            status: SubscriberStatus::parse(status),
            tier: Tier::new(tier),
        }
    }

    #[test]
    fn recency_follows_expected_tiers() {
        assert_eq!(recency_score(0), 5);
        assert_eq!(recency_score(7), 5);
        assert_eq!(recency_score(8), 4);
        assert_eq!(recency_score(30), 4);
        assert_eq!(recency_score(60), 3);
        assert_eq!(recency_score(90), 2);
        assert_eq!(recency_score(91), 1);
        assert_eq!(recency_score(-3), 5);
    }

    #[test]
    fn frequency_weights_clicks_double() {
        let only_clicks = snapshot(0, 0, 11, "free", "free");
        assert_eq!(activity_count(&only_clicks), 22);
        assert_eq!(frequency_score(activity_count(&only_clicks)), 4);
        assert_eq!(frequency_score(2), 1);
        assert_eq!(frequency_score(3), 2);
        assert_eq!(frequency_score(10), 2);
        assert_eq!(frequency_score(11), 3);
        assert_eq!(frequency_score(50), 4);
        assert_eq!(frequency_score(51), 5);
    }

    #[test]
    fn monetary_priority_order() {
        let founding = Tier::new("Founding Member");
        let annual = Tier::new("annual");
        let monthly = Tier::new("monthly");
        assert_eq!(monetary_score(SubscriberStatus::Free, &founding), 5);
        assert_eq!(monetary_score(SubscriberStatus::Paid, &annual), 4);
        assert_eq!(monetary_score(SubscriberStatus::Comp, &annual), 2);
        assert_eq!(monetary_score(SubscriberStatus::Paid, &monthly), 3);
        assert_eq!(monetary_score(SubscriberStatus::Free, &annual), 1);
    }

    #[test]
    fn top_subscriber_scores_maximum() {
        let top = Snapshot {
            join_date: Some(now() - Duration::days(400)),
            last_active: Some(now()),
            total_opens: 1000,
            total_clicks: 0,
            status: SubscriberStatus::Paid,
            tier: Tier::new("founding member"),
        };
        assert_eq!(
            rfm_breakdown(&top, now()),
            RfmBreakdown {
                recency: 5,
                frequency: 5,
                monetary: 5
            }
        );
        let result = compute_engagement(&top, now());
        assert_eq!(result.score, 500);
        assert_eq!(result.engagement, EngagementLevel::High);
        assert_eq!(result.risk, 0);
    }

    #[test]
    fn dormant_free_subscriber_scores_floor() {
        let dormant = Snapshot {
            join_date: Some(now() - Duration::days(200)),
            last_active: None,
            total_opens: 0,
            total_clicks: 0,
            status: SubscriberStatus::Free,
            tier: Tier::free(),
        };
        let result = compute_engagement(&dormant, now());
        assert_eq!(result.score, MIN_SCORE);
        assert_eq!(result.score, 100);
        assert_eq!(result.engagement, EngagementLevel::Low);
        assert_eq!(result.risk, 90);
    }

    #[test]
    fn missing_dates_fall_back_to_epoch() {
        let empty = Snapshot {
            join_date: None,
            last_active: None,
            total_opens: 0,
            total_clicks: 0,
            status: SubscriberStatus::Paid,
            tier: Tier::free(),
        };
        assert!(days_since_active(&empty, now()) > 20_000);
        let result = compute_engagement(&empty, now());
        assert_eq!(result.risk, 80);
        assert_eq!(result.score, 40 + 30 + 90);
    }

    #[test]
    fn partial_days_round_down() {
        let mut snap = snapshot(0, 0, 0, "paid", "free");
        snap.last_active = Some(now() - Duration::hours(30 * 24 + 23));
        assert_eq!(days_since_active(&snap, now()), 30);
        assert_eq!(compute_engagement(&snap, now()).risk, 20);
    }

    #[test]
    fn paid_risk_boundaries() {
        assert_eq!(churn_risk(SubscriberStatus::Paid, 14), 0);
        assert_eq!(churn_risk(SubscriberStatus::Paid, 15), 20);
        assert_eq!(churn_risk(SubscriberStatus::Paid, 30), 20);
        assert_eq!(churn_risk(SubscriberStatus::Paid, 31), 50);
        assert_eq!(churn_risk(SubscriberStatus::Paid, 60), 50);
        assert_eq!(churn_risk(SubscriberStatus::Paid, 61), 80);
    }

    #[test]
    fn free_risk_has_gap_below_46_days() {
        assert_eq!(churn_risk(SubscriberStatus::Free, 45), 0);
        assert_eq!(churn_risk(SubscriberStatus::Free, 46), 60);
        assert_eq!(churn_risk(SubscriberStatus::Comp, 50), 60);
        assert_eq!(churn_risk(SubscriberStatus::Free, 90), 60);
        assert_eq!(churn_risk(SubscriberStatus::Free, 91), 90);
    }

    #[test]
    fn paid_subscriber_inactive_sixty_days() {
        let at_sixty = snapshot(60, 0, 0, "paid", "monthly");
        let at_sixty_one = snapshot(61, 0, 0, "paid", "monthly");
        assert_eq!(compute_engagement(&at_sixty, now()).risk, 50);
        assert_eq!(compute_engagement(&at_sixty_one, now()).risk, 80);
    }

    #[test]
    fn engagement_thresholds_apply_to_composite() {
        assert_eq!(engagement_for(399), EngagementLevel::Medium);
        assert_eq!(engagement_for(400), EngagementLevel::High);
        assert_eq!(engagement_for(250), EngagementLevel::Medium);
        assert_eq!(engagement_for(249), EngagementLevel::Low);
    }

    fn any_snapshot() -> impl Strategy<Value = Snapshot> {
        (
            proptest::option::of(-2_000i64..40_000),
            proptest::option::of(-2_000i64..40_000),
            any::<i32>(),
            any::<i32>(),
            prop_oneof![
                Just("free"),
                Just("paid"),
                Just("comp"),
                Just("PAID"),
                Just("unknown")
            ],
            prop_oneof![
                Just(""),
                Just("founding"),
                Just("Annual"),
                Just("monthly"),
                Just("founding annual")
            ],
        )
            .prop_map(|(join, last, opens, clicks, status, tier)| Snapshot {
                join_date: join.map(|d| now() - Duration::days(d)),
                last_active: last.map(|d| now() - Duration::days(d)),
                total_opens: opens,
                total_clicks: clicks,
                status: SubscriberStatus::parse(status),
                tier: Tier::new(tier),
            })
    }

    proptest! {
        #[test]
        fn score_and_risk_stay_in_range(snap in any_snapshot()) {
            let result = compute_engagement(&snap, now());
            prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&result.score));
            prop_assert!([0, 20, 50, 60, 80, 90].contains(&result.risk));
            prop_assert_eq!(result.engagement, engagement_for(result.score));
        }

        #[test]
        fn recency_never_improves_with_inactivity(a in -1_000i64..10_000, b in -1_000i64..10_000) {
            let (closer, further) = if a <= b { (a, b) } else { (b, a) };
            let near = snapshot(closer, 5, 1, "paid", "annual");
            let far = snapshot(further, 5, 1, "paid", "annual");
            prop_assert!(rfm_breakdown(&near, now()).recency >= rfm_breakdown(&far, now()).recency);
            prop_assert!(compute_engagement(&near, now()).score >= compute_engagement(&far, now()).score);
        }
    }
}
