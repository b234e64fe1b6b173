use std::collections::{HashMap, HashSet};
use std::slice::Chunks;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::import::RawRecord;
use crate::models::{
    ImportSummary, NewSubscriber, Snapshot, SubscriberFields, SubscriberSource, SubscriberStatus,
    SubscriberUpdate, Tier,
};
use crate::scoring::compute_engagement;

// Header aliases, highest priority first.
const EMAIL_FIELDS: &[&str] = &["user_email", "email"];
const NAME_FIELDS: &[&str] = &["user_name", "name"];
const STATUS_FIELDS: &[&str] = &["subscription_status", "status"];
const TIER_FIELDS: &[&str] = &["membership_tier", "tier"];
const JOIN_DATE_FIELDS: &[&str] = &["signup_date", "join_date", "created_at"];
const LAST_ACTIVE_FIELDS: &[&str] = &["last_seen", "last_active"];
const OPENS_FIELDS: &[&str] = &["opens_count", "total_opens", "opens"];
const CLICKS_FIELDS: &[&str] = &["clicks_count", "total_clicks", "clicks"];
const EXTERNAL_ID_FIELDS: &[&str] = &["subscriber_id"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// What the database already holds for an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingSubscriber {
    pub id: Uuid,
    pub last_active: Option<DateTime<Utc>>,
}

/// Built once before a run and only read during it, so two rows sharing a new
/// email both resolve as inserts.
#[derive(Debug, Clone, Default)]
pub struct ExistingIndex {
    by_email: HashMap<String, ExistingSubscriber>,
}

impl ExistingIndex {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Uuid)>,
        S: AsRef<str>,
    {
        Self::from_subscribers(pairs.into_iter().map(|(email, id)| {
            (
                email,
                ExistingSubscriber {
                    id,
                    last_active: None,
                },
            )
        }))
    }

    pub fn from_subscribers<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, ExistingSubscriber)>,
        S: AsRef<str>,
    {
        let by_email = entries
            .into_iter()
            .map(|(email, existing)| (normalize_email(email.as_ref()), existing))
            .collect();
        Self { by_email }
    }

    pub fn get(&self, email: &str) -> Option<Uuid> {
        self.lookup(email).map(|existing| existing.id)
    }

    pub fn lookup(&self, email: &str) -> Option<&ExistingSubscriber> {
        self.by_email.get(email)
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Reconciliation {
    pub to_insert: Vec<NewSubscriber>,
    pub to_update: Vec<SubscriberUpdate>,
    /// Rows with no resolvable email.
    pub skipped: usize,
    /// Inserts whose email already appeared earlier in the same batch.
    pub duplicate_new_emails: usize,
}

impl Reconciliation {
    pub fn insert_chunks(&self, size: usize) -> Chunks<'_, NewSubscriber> {
        self.to_insert.chunks(size.max(1))
    }

    pub fn update_chunks(&self, size: usize) -> Chunks<'_, SubscriberUpdate> {
        self.to_update.chunks(size.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }

    pub fn planned_summary(&self) -> ImportSummary {
        ImportSummary {
            inserted_count: self.to_insert.len(),
            updated_count: self.to_update.len(),
            skipped_count: self.skipped,
        }
    }
}

pub fn reconcile(
    records: &[RawRecord],
    existing: &ExistingIndex,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut outcome = Reconciliation::default();
    let mut queued_emails: HashSet<String> = HashSet::new();

    for record in records {
        let Some(fields) = normalize_record(record, now) else {
            outcome.skipped += 1;
            continue;
        };

        if let Some(stored) = existing.lookup(&fields.email) {
            outcome.to_update.push(SubscriberUpdate {
                id: stored.id,
                fields: with_stored_activity(fields, stored.last_active, now),
                updated_at: now,
            });
            continue;
        }

        if !queued_emails.insert(fields.email.clone()) {
            outcome.duplicate_new_emails += 1;
            warn!(email = %fields.email, "email repeated within import; queuing another insert");
        }
        outcome.to_insert.push(NewSubscriber {
            fields,
            source: SubscriberSource::Import,
        });
    }

    info!(
        to_insert = outcome.to_insert.len(),
        to_update = outcome.to_update.len(),
        skipped = outcome.skipped,
        "reconciled import batch"
    );
    outcome
}

/// A row without a last-seen value keeps the stored one and is rescored with it.
fn with_stored_activity(
    mut fields: SubscriberFields,
    stored: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SubscriberFields {
    if fields.last_active.is_none() && stored.is_some() {
        fields.last_active = stored;
        fields.scoring = compute_engagement(&fields.snapshot(), now);
    }
    fields
}

pub fn normalize_record(record: &RawRecord, now: DateTime<Utc>) -> Option<SubscriberFields> {
    let raw_email = first_present(record, EMAIL_FIELDS)?;
    let email = normalize_email(raw_email);

    let name = first_present(record, NAME_FIELDS)
        .map(str::to_string)
        .unwrap_or_else(|| local_part(raw_email).to_string());
    let status = first_present(record, STATUS_FIELDS)
        .map(SubscriberStatus::parse)
        .unwrap_or(SubscriberStatus::Free);
    let tier = first_present(record, TIER_FIELDS)
        .map(Tier::new)
        .unwrap_or_default();
    let join_date = first_present(record, JOIN_DATE_FIELDS)
        .and_then(parse_timestamp)
        .unwrap_or(now);
    let last_active = first_present(record, LAST_ACTIVE_FIELDS).and_then(parse_timestamp);
    let total_opens = first_present(record, OPENS_FIELDS).map_or(0, parse_count);
    let total_clicks = first_present(record, CLICKS_FIELDS).map_or(0, parse_count);
    let external_id = first_present(record, EXTERNAL_ID_FIELDS).map(str::to_string);

    let snapshot = Snapshot {
        join_date: Some(join_date),
        last_active,
        total_opens,
        total_clicks,
        status,
        tier,
    };
    let scoring = compute_engagement(&snapshot, now);

    Some(SubscriberFields {
        email,
        name,
        status: snapshot.status,
        tier: snapshot.tier,
        external_id,
        join_date,
        last_active,
        total_opens,
        total_clicks,
        scoring,
    })
}

fn first_present<'a>(record: &'a RawRecord, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| record.get(*alias))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

/// `"12 opens"` is 12. Junk is 0, negatives clamp to 0, overflow saturates.
pub fn parse_count(value: &str) -> i32 {
    let trimmed = value.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let digits = &unsigned[..end];

    if negative || digits.is_empty() {
        return 0;
    }
    digits.parse::<i32>().unwrap_or(i32::MAX)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc());
        }
    }
    None
}
