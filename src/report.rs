use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{EngagementLevel, RiskBucket, SubscriberRow};

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementSummary {
    pub level: EngagementLevel,
    pub count: usize,
    pub avg_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskSummary {
    pub bucket: RiskBucket,
    pub count: usize,
}

/// Rows never scored are left out.
pub fn summarize_by_engagement(subscribers: &[SubscriberRow]) -> Vec<EngagementSummary> {
    let mut map: HashMap<EngagementLevel, (usize, i64)> = HashMap::new();

    for subscriber in subscribers {
        let Some(level) = subscriber.engagement else {
            continue;
        };
        let entry = map.entry(level).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += i64::from(subscriber.rfm_score);
    }

    let mut summaries: Vec<EngagementSummary> = map
        .into_iter()
        .map(|(level, (count, total_score))| EngagementSummary {
            level,
            count,
            avg_score: if count == 0 {
                0.0
            } else {
                total_score as f64 / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.level.cmp(&a.level));
    summaries
}

pub fn summarize_by_risk(subscribers: &[SubscriberRow]) -> Vec<RiskSummary> {
    let mut map: HashMap<RiskBucket, usize> = HashMap::new();
    for subscriber in subscribers {
        *map.entry(subscriber.risk_bucket()).or_insert(0) += 1;
    }

    let mut summaries: Vec<RiskSummary> = map
        .into_iter()
        .map(|(bucket, count)| RiskSummary { bucket, count })
        .collect();
    summaries.sort_by(|a, b| b.bucket.cmp(&a.bucket));
    summaries
}

fn display_name(subscriber: &SubscriberRow) -> &str {
    subscriber
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(&subscriber.email)
}

pub fn build_report(
    user_label: Option<&str>,
    generated_at: DateTime<Utc>,
    subscribers: &[SubscriberRow],
) -> String {
    let engagement = summarize_by_engagement(subscribers);
    let risk = summarize_by_risk(subscribers);

    let mut output = String::new();
    let label = user_label.unwrap_or("all subscribers");

    let _ = writeln!(output, "# Subscriber Engagement Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} subscribers)",
        label,
        generated_at.format("%Y-%m-%d"),
        subscribers.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Engagement Mix");

    if engagement.is_empty() {
        let _ = writeln!(output, "No scored subscribers yet.");
    } else {
        for summary in engagement.iter() {
            let _ = writeln!(
                output,
                "- {}: {} subscribers (avg score {:.1})",
                summary.level.as_str(),
                summary.count,
                summary.avg_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Churn Risk");

    if risk.is_empty() {
        let _ = writeln!(output, "No subscribers recorded.");
    } else {
        for summary in risk.iter() {
            let _ = writeln!(
                output,
                "- {} risk: {} subscribers",
                summary.bucket.as_str(),
                summary.count
            );
        }
    }

    let mut at_risk: Vec<&SubscriberRow> = subscribers
        .iter()
        .filter(|subscriber| subscriber.churn_risk > 0)
        .collect();
    at_risk.sort_by(|a, b| {
        b.churn_risk
            .cmp(&a.churn_risk)
            .then(a.rfm_score.cmp(&b.rfm_score))
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Subscribers");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No subscribers at risk.");
    } else {
        for subscriber in at_risk.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) risk {}% score {}",
                display_name(subscriber),
                subscriber.email,
                subscriber.status.as_str(),
                subscriber.churn_risk,
                subscriber.rfm_score
            );
        }
    }

    let mut recent: Vec<&SubscriberRow> = subscribers
        .iter()
        .filter(|subscriber| subscriber.join_date.is_some())
        .collect();
    recent.sort_by(|a, b| b.join_date.cmp(&a.join_date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Signups");

    if recent.is_empty() {
        let _ = writeln!(output, "No signups recorded.");
    } else {
        for subscriber in recent.iter().take(5) {
            if let Some(joined) = subscriber.join_date {
                let _ = writeln!(
                    output,
                    "- {} ({}) joined {}",
                    display_name(subscriber),
                    subscriber.tier.as_str(),
                    joined.format("%Y-%m-%d")
                );
            }
        }
    }

    output
}
