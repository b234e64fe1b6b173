use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Billing state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    Free,
    Paid,
    Comp,
}

impl SubscriberStatus {
    /// Case-insensitive parse. Unknown or empty values fall back to `Free`,
    /// the lowest-weight bucket.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "paid" => Self::Paid,
            "comp" => Self::Comp,
            _ => Self::Free,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::Comp => "comp",
        }
    }
}

/// Coarse classification of a tier name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierClass {
    Founding,
    Annual,
    Other,
}

/// Free-form membership tier, stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    pub fn new(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() {
            Self::free()
        } else {
            Self(normalized)
        }
    }

    pub fn free() -> Self {
        Self("free".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substring match: anything naming "founding" wins over "annual".
    pub fn class(&self) -> TierClass {
        if self.0.contains("founding") {
            TierClass::Founding
        } else if self.0.contains("annual") {
            TierClass::Annual
        } else {
            TierClass::Other
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::free()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

pub const MEDIUM_RISK_FLOOR: i32 = 30;
pub const HIGH_RISK_FLOOR: i32 = 70;

/// Churn-risk bucket used for filtering: <30 low, 30-69 medium, >=70 high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn from_risk(risk: i32) -> Self {
        if risk >= HIGH_RISK_FLOOR {
            Self::High
        } else if risk >= MEDIUM_RISK_FLOOR {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Inclusive lower and exclusive upper bound on `churn_risk`.
    pub fn bounds(self) -> (Option<i32>, Option<i32>) {
        match self {
            Self::Low => (None, Some(MEDIUM_RISK_FLOOR)),
            Self::Medium => (Some(MEDIUM_RISK_FLOOR), Some(HIGH_RISK_FLOOR)),
            Self::High => (Some(HIGH_RISK_FLOOR), None),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberSource {
    Import,
    Manual,
}

impl SubscriberSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Manual => "manual",
        }
    }
}

/// Behavioral input to the scoring engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub join_date: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub total_opens: i32,
    pub total_clicks: i32,
    pub status: SubscriberStatus,
    pub tier: Tier,
}

/// Ordinal sub-scores, each in 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmBreakdown {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub score: i32,
    pub engagement: EngagementLevel,
    pub risk: i32,
}

/// Normalized and scored field set shared by inserts and updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFields {
    pub email: String,
    pub name: String,
    pub status: SubscriberStatus,
    pub tier: Tier,
    pub external_id: Option<String>,
    pub join_date: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
    pub total_opens: i32,
    pub total_clicks: i32,
    pub scoring: ScoreResult,
}

impl SubscriberFields {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            join_date: Some(self.join_date),
            last_active: self.last_active,
            total_opens: self.total_opens,
            total_clicks: self.total_clicks,
            status: self.status,
            tier: self.tier.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscriber {
    pub fields: SubscriberFields,
    pub source: SubscriberSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberUpdate {
    pub id: Uuid,
    pub fields: SubscriberFields,
    pub updated_at: DateTime<Utc>,
}

/// A persisted subscriber as read back from the database.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberRow {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub tier: Tier,
    pub join_date: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub total_opens: i32,
    pub total_clicks: i32,
    pub rfm_score: i32,
    pub churn_risk: i32,
    pub engagement: Option<EngagementLevel>,
}

impl SubscriberRow {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            join_date: self.join_date,
            last_active: self.last_active,
            total_opens: self.total_opens,
            total_clicks: self.total_clicks,
            status: self.status,
            tier: self.tier.clone(),
        }
    }

    pub fn risk_bucket(&self) -> RiskBucket {
        RiskBucket::from_risk(self.churn_risk)
    }
}

/// One page of a filtered listing plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberPage {
    pub subscribers: Vec<SubscriberRow>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub segment_type: String,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing outcome of an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
}

impl ImportSummary {
    pub fn message(&self) -> String {
        format!(
            "Imported {} new, updated {} existing subscribers.",
            self.inserted_count, self.updated_count
        )
    }

    pub fn progress(&self) -> String {
        format!(
            "{} inserted and {} updated before the failure",
            self.inserted_count, self.updated_count
        )
    }
}
