use super::{Result, XpError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Isolated scoring namespace (one guild).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

/// Scored subject inside a tenant (one member).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

macro_rules! opaque_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }
    };
}

opaque_id!(TenantId);
opaque_id!(EntityId);

/// Which score column drives ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardVariant {
    Daily,
    Weekly,
    Lifetime,
}

impl LeaderboardVariant {
    pub const ALL: [LeaderboardVariant; 3] = [
        LeaderboardVariant::Daily,
        LeaderboardVariant::Weekly,
        LeaderboardVariant::Lifetime,
    ];

    /// The score this variant reads from a record.
    pub fn score_of(&self, record: &ScoreRecord) -> u64 {
        match self {
            LeaderboardVariant::Daily => record.daily_score,
            LeaderboardVariant::Weekly => record.weekly_score,
            LeaderboardVariant::Lifetime => record.lifetime_score,
        }
    }

    /// Daily and weekly columns are zeroed on cycle boundaries; lifetime never is.
    pub fn is_periodic(&self) -> bool {
        !matches!(self, LeaderboardVariant::Lifetime)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardVariant::Daily => "daily",
            LeaderboardVariant::Weekly => "weekly",
            LeaderboardVariant::Lifetime => "lifetime",
        }
    }
}

impl fmt::Display for LeaderboardVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaderboardVariant {
    type Err = XpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(LeaderboardVariant::Daily),
            "weekly" => Ok(LeaderboardVariant::Weekly),
            "lifetime" | "xp" => Ok(LeaderboardVariant::Lifetime),
            other => Err(XpError::InvalidArgument(format!(
                "unknown leaderboard variant '{}'",
                other
            ))),
        }
    }
}

/// Durable per-(tenant, entity) counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    pub lifetime_score: u64,
    pub daily_score: u64,
    pub weekly_score: u64,
    pub clan_id: Option<u16>,
    pub updated_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn new(tenant_id: TenantId, entity_id: EntityId, at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            entity_id,
            lifetime_score: 0,
            daily_score: 0,
            weekly_score: 0,
            clan_id: None,
            updated_at: at,
        }
    }

    /// Applies one signed source event to all three counters, flooring each at zero.
    pub fn apply_delta(&mut self, delta: i64, at: DateTime<Utc>) {
        self.lifetime_score = apply_delta(self.lifetime_score, delta);
        self.daily_score = apply_delta(self.daily_score, delta);
        self.weekly_score = apply_delta(self.weekly_score, delta);
        self.updated_at = at;
    }
}

/// `score + delta`, saturating at both ends.
pub fn apply_delta(score: u64, delta: i64) -> u64 {
    score.saturating_add_signed(delta)
}

/// A single entry of a flush batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub entity_id: EntityId,
    pub delta: i64,
}

impl ScoreDelta {
    pub fn new(entity_id: impl Into<EntityId>, delta: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            delta,
        }
    }
}

/// A leaderboard row with buffered deltas merged in. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub entity_id: EntityId,
    pub rank: u64,
    pub daily_score: u64,
    pub weekly_score: u64,
    pub lifetime_score: u64,
}

impl LeaderboardRow {
    pub fn score(&self, variant: LeaderboardVariant) -> u64 {
        match variant {
            LeaderboardVariant::Daily => self.daily_score,
            LeaderboardVariant::Weekly => self.weekly_score,
            LeaderboardVariant::Lifetime => self.lifetime_score,
        }
    }
}

/// Point-lookup stats for one entity, zeroed when nothing is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub daily_score: u64,
    pub weekly_score: u64,
    pub lifetime_score: u64,
    pub clan_id: Option<u16>,
}

/// Result of handing a batch to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Batch committed; number of entity rows touched.
    Applied(usize),
    /// A batch with the same id was already committed; nothing changed.
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parse() {
        assert_eq!("daily".parse::<LeaderboardVariant>().unwrap(), LeaderboardVariant::Daily);
        assert_eq!("WEEKLY".parse::<LeaderboardVariant>().unwrap(), LeaderboardVariant::Weekly);
        assert_eq!("xp".parse::<LeaderboardVariant>().unwrap(), LeaderboardVariant::Lifetime);
        assert!("monthly".parse::<LeaderboardVariant>().is_err());
    }

    #[test]
    fn test_apply_delta_floors_at_zero() {
        assert_eq!(apply_delta(10, -3), 7);
        assert_eq!(apply_delta(10, -30), 0);
        assert_eq!(apply_delta(u64::MAX, 5), u64::MAX);
    }

    #[test]
    fn test_record_delta_moves_all_counters() {
        let now = Utc::now();
        let mut record = ScoreRecord::new("g1".into(), "u1".into(), now);
        record.apply_delta(40, now);
        record.daily_score = 5;
        record.apply_delta(-10, now);

        assert_eq!(record.lifetime_score, 30);
        assert_eq!(record.weekly_score, 30);
        assert_eq!(record.daily_score, 0);
    }
}
