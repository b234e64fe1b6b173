use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use newsletter_crm_scoring::error::ImportError;
use newsletter_crm_scoring::import::parse_csv;
use newsletter_crm_scoring::models::{EngagementLevel, SubscriberStatus};
use newsletter_crm_scoring::reconcile::{reconcile, ExistingIndex};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn substack_export() -> String {
    let recent = (now() - Duration::days(2)).format("%Y-%m-%d").to_string();
    let stale = (now() - Duration::days(120)).format("%Y-%m-%d").to_string();
    format!(
        "User Email,User Name,Subscription Status,Membership Tier,Signup Date,Last Seen,Opens Count,Clicks Count,Subscriber ID\n\
         Avery@Example.com,Avery Lee,Paid,Founding Member,2024-01-05,{recent},90,12,sub-1\n\
         jules@example.com,,paid,Annual,2025-05-01,{stale},4,0,sub-2\n\
         ,Nobody,free,,2025-01-01,,,,sub-3\n\
         kiara@example.com,Kiara,comp,,not a date,,n/a,3,\n"
    )
}

#[test]
fn csv_import_partitions_and_scores_rows() {
    let parsed = parse_csv(substack_export().as_bytes()).unwrap();
    assert_eq!(parsed.records.len(), 4);

    let existing = ExistingIndex::new([("jules@example.com", Uuid::new_v4())]);
    let plan = reconcile(&parsed.records, &existing, now());

    assert_eq!(plan.skipped, 1);
    assert_eq!(plan.to_insert.len(), 2);
    assert_eq!(plan.to_update.len(), 1);

    let avery = &plan.to_insert[0].fields;
    assert_eq!(avery.email, "avery@example.com");
    assert_eq!(avery.name, "Avery Lee");
    assert_eq!(avery.external_id.as_deref(), Some("sub-1"));
    assert_eq!(avery.scoring.score, 500);
    assert_eq!(avery.scoring.engagement, EngagementLevel::High);
    assert_eq!(avery.scoring.risk, 0);

    let kiara = &plan.to_insert[1].fields;
    assert_eq!(kiara.status, SubscriberStatus::Comp);
    assert_eq!(kiara.join_date, now());
    assert_eq!(kiara.total_opens, 0);
    assert_eq!(kiara.total_clicks, 3);

    let jules = &plan.to_update[0].fields;
    assert_eq!(jules.name, "jules");
    assert_eq!(jules.scoring.risk, 80);
}

#[test]
fn second_run_over_same_input_only_updates() {
    let parsed = parse_csv(substack_export().as_bytes()).unwrap();
    let first = reconcile(&parsed.records, &ExistingIndex::default(), now());
    assert_eq!(first.to_insert.len(), 3);
    assert!(first.to_update.is_empty());

    let assigned: Vec<(String, Uuid)> = first
        .to_insert
        .iter()
        .map(|new| (new.fields.email.clone(), Uuid::new_v4()))
        .collect();
    let seeded = ExistingIndex::new(assigned.iter().map(|(email, id)| (email.as_str(), *id)));

    let second = reconcile(&parsed.records, &seeded, now());
    assert!(second.to_insert.is_empty());
    assert_eq!(second.skipped, first.skipped);

    let updated: Vec<(String, Uuid)> = second
        .to_update
        .iter()
        .map(|update| (update.fields.email.clone(), update.id))
        .collect();
    assert_eq!(updated, assigned);

    for (inserted, update) in first.to_insert.iter().zip(second.to_update.iter()) {
        assert_eq!(inserted.fields, update.fields);
    }
}

#[test]
fn unreadable_input_fails_before_reconciliation() {
    assert!(matches!(parse_csv(b"\n\n"), Err(ImportError::EmptyInput)));
}
