// Headhunt tracker: pull submission, pity calculation and per-user history.
//
// Records are keyed by (owner, banner). Every read recomputes its views from
// the stored records; nothing derived is cached here.

pub mod aggregate;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HeadhuntError;
use crate::metrics;

pub use aggregate::{
    global_stats, leaderboard, BannerBreakdown, GlobalStats, Leaderboard, LeaderboardEntry,
    LeaderboardSort, NameCount, DEFAULT_LEADERBOARD_LIMIT, LUCKY_MIN_PULLS, MAX_LEADERBOARD_LIMIT,
};

pub const DEFAULT_IMPORT_SOURCE: &str = "manual";

// ── Model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerType {
    Operator,
    Weapon,
    Standard,
}

impl BannerType {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "operator" => Some(Self::Operator),
            "weapon" => Some(Self::Weapon),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Weapon => "weapon",
            Self::Standard => "standard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Operator,
    Weapon,
}

/// A single gacha result as submitted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pull {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rarity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
}

impl Pull {
    pub fn new(name: &str, rarity: i64) -> Self {
        Self {
            name: Some(name.to_string()),
            rarity,
            item_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rarity {
    Three,
    Four,
    Five,
    Six,
}

impl Rarity {
    /// Strict conversion used when validating submissions.
    pub fn from_stars(stars: i64) -> Option<Self> {
        match stars {
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            _ => None,
        }
    }

    /// Lenient classification for tallying: anything that is not 4/5/6 counts as 3★.
    pub fn classify(stars: i64) -> Self {
        match stars {
            6 => Self::Six,
            5 => Self::Five,
            4 => Self::Four,
            _ => Self::Three,
        }
    }
}

/// Counts and name lists derived from a pull sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullTally {
    pub total_pulls: i64,
    pub six_star_count: i64,
    pub five_star_count: i64,
    pub four_star_count: i64,
    pub three_star_count: i64,
    pub six_star_names: Vec<String>,
    pub five_star_names: Vec<String>,
}

/// Stored aggregate for one (owner, banner) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRecord {
    pub id: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub banner: String,
    pub banner_type: BannerType,
    pub pulls: Vec<Pull>,
    pub total_pulls: i64,
    pub six_star_count: i64,
    pub five_star_count: i64,
    pub four_star_count: i64,
    pub three_star_count: i64,
    pub six_star_names: Vec<String>,
    pub five_star_names: Vec<String>,
    pub import_source: String,
    pub region: Option<String>,
    pub last_imported_at: String,
}

/// Full replacement payload for an upsert keyed on (owner_id, banner).
#[derive(Debug, Clone, PartialEq)]
pub struct PullRecordUpsert {
    pub owner_id: i64,
    pub banner: String,
    pub banner_type: BannerType,
    pub pulls: Vec<Pull>,
    pub tally: PullTally,
    pub import_source: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub banner: Option<String>,
    pub owner_id: Option<i64>,
}

impl RecordFilter {
    pub fn banner(banner: Option<String>) -> Self {
        Self {
            banner: banner.filter(|b| !b.trim().is_empty()),
            owner_id: None,
        }
    }

    pub fn owner(owner_id: i64) -> Self {
        Self {
            banner: None,
            owner_id: Some(owner_id),
        }
    }
}

/// Document store holding pull records.
#[async_trait]
pub trait PullRecordStore: Send + Sync {
    async fn find_pull_records(&self, filter: &RecordFilter) -> Result<Vec<PullRecord>, sqlx::Error>;
    async fn upsert_pull_record(&self, record: &PullRecordUpsert) -> Result<PullRecord, sqlx::Error>;
}

// ── Derivations ───────────────────────────────────────────────────────

pub fn tally_pulls(pulls: &[Pull]) -> PullTally {
    let mut tally = PullTally {
        total_pulls: pulls.len() as i64,
        ..PullTally::default()
    };
    for pull in pulls {
        match Rarity::classify(pull.rarity) {
            Rarity::Six => {
                tally.six_star_count += 1;
                if let Some(name) = &pull.name {
                    tally.six_star_names.push(name.clone());
                }
            }
            Rarity::Five => {
                tally.five_star_count += 1;
                if let Some(name) = &pull.name {
                    tally.five_star_names.push(name.clone());
                }
            }
            Rarity::Four => tally.four_star_count += 1,
            Rarity::Three => tally.three_star_count += 1,
        }
    }
    tally
}

/// Pulls since the most recent 6★, counting the 6★ itself. With no 6★ at all
/// this is the length of the sequence.
pub fn current_pity(pulls: &[Pull]) -> usize {
    match pulls
        .iter()
        .rev()
        .position(|p| Rarity::classify(p.rarity) == Rarity::Six)
    {
        Some(idx) => idx + 1,
        None => pulls.len(),
    }
}

/// Percentage rounded to two decimals; 0 when there is nothing to divide by.
pub fn rate(count: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

// ── Submission ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPullsRequest {
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub banner_type: Option<String>,
    #[serde(default)]
    pub pulls: Option<serde_json::Value>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub import_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPullsResponse {
    pub id: i64,
    pub banner: String,
    pub total_pulls: i64,
    pub six_star_count: i64,
    pub five_star_count: i64,
}

/// Check a submission and build the upsert payload. Nothing is written here.
pub fn validate_submission(
    owner_id: i64,
    req: SubmitPullsRequest,
) -> Result<PullRecordUpsert, HeadhuntError> {
    let banner = req
        .banner
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| HeadhuntError::validation("banner is required"))?;

    let banner_type = req
        .banner_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| HeadhuntError::validation("bannerType is required"))?;
    let banner_type = BannerType::from_str_name(banner_type.trim()).ok_or_else(|| {
        HeadhuntError::validation("bannerType must be one of operator, weapon, standard")
    })?;

    let pulls = match req.pulls {
        Some(value @ serde_json::Value::Array(_)) => serde_json::from_value::<Vec<Pull>>(value)
            .map_err(|e| HeadhuntError::validation(format!("invalid pull entry: {e}")))?,
        _ => return Err(HeadhuntError::validation("pulls must be an array")),
    };

    if let Some((idx, pull)) = pulls
        .iter()
        .enumerate()
        .find(|(_, p)| Rarity::from_stars(p.rarity).is_none())
    {
        return Err(HeadhuntError::validation(format!(
            "pull {idx} has rarity {}; expected 3, 4, 5 or 6",
            pull.rarity
        )));
    }

    let import_source = req
        .import_source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_IMPORT_SOURCE.to_string());
    let region = req.region.filter(|r| !r.trim().is_empty());

    let tally = tally_pulls(&pulls);
    Ok(PullRecordUpsert {
        owner_id,
        banner,
        banner_type,
        pulls,
        tally,
        import_source,
        region,
    })
}

pub async fn submit_pulls<S: PullRecordStore + ?Sized>(
    store: &S,
    owner_id: Option<i64>,
    req: SubmitPullsRequest,
) -> Result<SubmitPullsResponse, HeadhuntError> {
    let owner_id = owner_id.ok_or(HeadhuntError::Unauthenticated)?;
    let upsert = validate_submission(owner_id, req)?;

    let record = store.upsert_pull_record(&upsert).await?;
    metrics::PULL_SUBMISSIONS_TOTAL.inc();
    metrics::record_pulls(
        upsert.tally.six_star_count,
        upsert.tally.five_star_count,
        upsert.tally.four_star_count,
        upsert.tally.three_star_count,
    );
    tracing::info!(
        owner_id,
        banner = %record.banner,
        total_pulls = record.total_pulls,
        "Pull record saved"
    );

    Ok(SubmitPullsResponse {
        id: record.id,
        banner: record.banner,
        total_pulls: record.total_pulls,
        six_star_count: record.six_star_count,
        five_star_count: record.five_star_count,
    })
}

// ── Per-user history ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerHistory {
    pub id: i64,
    pub banner: String,
    pub banner_type: BannerType,
    pub total_pulls: i64,
    pub six_star_count: i64,
    pub five_star_count: i64,
    pub four_star_count: i64,
    pub three_star_count: i64,
    pub six_star_names: Vec<String>,
    pub five_star_names: Vec<String>,
    pub current_pity: usize,
    pub import_source: String,
    pub region: Option<String>,
    pub last_imported_at: String,
    pub pulls: Vec<Pull>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_pulls: i64,
    pub total_six_star: i64,
    pub total_five_star: i64,
    pub six_star_rate: f64,
    pub five_star_rate: f64,
    pub banners_tracked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyHistory {
    pub summary: HistorySummary,
    pub banners: Vec<BannerHistory>,
}

pub fn build_history(records: Vec<PullRecord>) -> MyHistory {
    let mut summary = HistorySummary::default();
    let mut banners_seen = HashSet::new();
    let mut banners = Vec::with_capacity(records.len());

    for record in records {
        summary.total_pulls += record.total_pulls;
        summary.total_six_star += record.six_star_count;
        summary.total_five_star += record.five_star_count;
        banners_seen.insert(record.banner.clone());

        banners.push(BannerHistory {
            current_pity: current_pity(&record.pulls),
            id: record.id,
            banner: record.banner,
            banner_type: record.banner_type,
            total_pulls: record.total_pulls,
            six_star_count: record.six_star_count,
            five_star_count: record.five_star_count,
            four_star_count: record.four_star_count,
            three_star_count: record.three_star_count,
            six_star_names: record.six_star_names,
            five_star_names: record.five_star_names,
            import_source: record.import_source,
            region: record.region,
            last_imported_at: record.last_imported_at,
            pulls: record.pulls,
        });
    }

    summary.six_star_rate = rate(summary.total_six_star, summary.total_pulls);
    summary.five_star_rate = rate(summary.total_five_star, summary.total_pulls);
    summary.banners_tracked = banners_seen.len();

    MyHistory { summary, banners }
}

pub async fn get_my_history<S: PullRecordStore + ?Sized>(
    store: &S,
    owner_id: Option<i64>,
) -> Result<MyHistory, HeadhuntError> {
    let owner_id = owner_id.ok_or(HeadhuntError::Unauthenticated)?;
    let records = store
        .find_pull_records(&RecordFilter::owner(owner_id))
        .await?;
    Ok(build_history(records))
}

// ── Public aggregates ─────────────────────────────────────────────────

pub async fn get_global_stats<S: PullRecordStore + ?Sized>(
    store: &S,
    banner: Option<String>,
) -> Result<GlobalStats, HeadhuntError> {
    let records = store
        .find_pull_records(&RecordFilter::banner(banner))
        .await?;
    Ok(global_stats(&records))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub banner: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
}

/// A leaderboard query after defaults, sort parsing and limit clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardParams {
    pub banner: Option<String>,
    pub sort: LeaderboardSort,
    pub limit: usize,
}

impl LeaderboardQuery {
    pub fn resolve(self) -> Result<LeaderboardParams, HeadhuntError> {
        let sort = match self.sort.as_deref().filter(|s| !s.is_empty()) {
            None => LeaderboardSort::Pulls,
            Some(s) => LeaderboardSort::from_str_name(s)
                .ok_or_else(|| HeadhuntError::validation("sort must be 'pulls' or 'lucky'"))?,
        };
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT as i64)
            .clamp(1, MAX_LEADERBOARD_LIMIT as i64) as usize;

        Ok(LeaderboardParams {
            banner: RecordFilter::banner(self.banner).banner,
            sort,
            limit,
        })
    }
}

impl LeaderboardParams {
    /// Identical for every query that yields the same board.
    pub fn cache_key(&self) -> String {
        let banner = match &self.banner {
            Some(b) => format!("={b}"),
            None => "*".to_string(),
        };
        format!("{}|{}|{banner}", self.sort.as_str(), self.limit)
    }
}

pub async fn load_leaderboard<S: PullRecordStore + ?Sized>(
    store: &S,
    params: &LeaderboardParams,
) -> Result<Leaderboard, HeadhuntError> {
    let records = store
        .find_pull_records(&RecordFilter::banner(params.banner.clone()))
        .await?;
    Ok(leaderboard(&records, params.sort, params.limit))
}

pub async fn get_leaderboard<S: PullRecordStore + ?Sized>(
    store: &S,
    query: LeaderboardQuery,
) -> Result<Leaderboard, HeadhuntError> {
    let params = query.resolve()?;
    load_leaderboard(store, &params).await
}
