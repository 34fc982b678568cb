// Public aggregates over pull records: global drop rates and the leaderboard.
//
// Both views are a single pass over every matching record. Fine while the
// collection is small; there is no pagination.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{rate, PullRecord};

pub const MOST_PULLED_LIMIT: usize = 20;
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 50;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;
/// Minimum sample size for the "lucky" ranking.
pub const LUCKY_MIN_PULLS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerBreakdown {
    pub banner: String,
    pub total_pulls: i64,
    pub six_star_rate: f64,
    pub five_star_rate: f64,
    pub users: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_pulls: i64,
    pub contributors: usize,
    pub six_star_rate: f64,
    pub five_star_rate: f64,
    pub four_star_rate: f64,
    pub total_six_star: i64,
    pub total_five_star: i64,
    pub total_four_star: i64,
    pub total_three_star: i64,
    pub most_pulled_six_star: Vec<NameCount>,
    pub most_pulled_five_star: Vec<NameCount>,
    pub banner_breakdown: Vec<BannerBreakdown>,
}

/// Occurrence counts that remember first-seen order, so equal counts keep
/// scan order after the stable sort.
#[derive(Default)]
struct FrequencyTable {
    index: HashMap<String, usize>,
    counts: Vec<NameCount>,
}

impl FrequencyTable {
    fn record(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&i) => self.counts[i].count += 1,
            None => {
                self.index.insert(name.to_string(), self.counts.len());
                self.counts.push(NameCount {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }

    fn top(mut self, n: usize) -> Vec<NameCount> {
        self.counts.sort_by(|a, b| b.count.cmp(&a.count));
        self.counts.truncate(n);
        self.counts
    }
}

#[derive(Default)]
struct BannerTotals {
    total: i64,
    six: i64,
    five: i64,
    users: HashSet<i64>,
}

pub fn global_stats(records: &[PullRecord]) -> GlobalStats {
    let mut stats = GlobalStats::default();
    let mut contributors = HashSet::new();
    let mut six_names = FrequencyTable::default();
    let mut five_names = FrequencyTable::default();
    let mut banner_order: Vec<String> = Vec::new();
    let mut banners: HashMap<String, BannerTotals> = HashMap::new();

    for record in records {
        stats.total_pulls += record.total_pulls;
        stats.total_six_star += record.six_star_count;
        stats.total_five_star += record.five_star_count;
        stats.total_four_star += record.four_star_count;
        stats.total_three_star += record.three_star_count;
        contributors.insert(record.owner_id);

        for name in &record.six_star_names {
            six_names.record(name);
        }
        for name in &record.five_star_names {
            five_names.record(name);
        }

        if !banners.contains_key(&record.banner) {
            banner_order.push(record.banner.clone());
        }
        let totals = banners.entry(record.banner.clone()).or_default();
        totals.total += record.total_pulls;
        totals.six += record.six_star_count;
        totals.five += record.five_star_count;
        totals.users.insert(record.owner_id);
    }

    stats.contributors = contributors.len();
    stats.six_star_rate = rate(stats.total_six_star, stats.total_pulls);
    stats.five_star_rate = rate(stats.total_five_star, stats.total_pulls);
    stats.four_star_rate = rate(stats.total_four_star, stats.total_pulls);
    stats.most_pulled_six_star = six_names.top(MOST_PULLED_LIMIT);
    stats.most_pulled_five_star = five_names.top(MOST_PULLED_LIMIT);
    stats.banner_breakdown = banner_order
        .into_iter()
        .filter_map(|banner| {
            let totals = banners.remove(&banner)?;
            Some(BannerBreakdown {
                six_star_rate: rate(totals.six, totals.total),
                five_star_rate: rate(totals.five, totals.total),
                users: totals.users.len(),
                total_pulls: totals.total,
                banner,
            })
        })
        .collect();

    stats
}

// ── Leaderboard ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSort {
    /// Most pulls first.
    Pulls,
    /// Highest six-star rate first, among owners with enough pulls.
    Lucky,
}

impl LeaderboardSort {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "pulls" => Some(Self::Pulls),
            "lucky" => Some(Self::Lucky),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pulls => "pulls",
            Self::Lucky => "lucky",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: i64,
    pub username: String,
    pub total_pulls: i64,
    pub six_star_count: i64,
    pub five_star_count: i64,
    pub six_star_rate: f64,
    pub banners_tracked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub total_players: usize,
    pub total_pulls: i64,
    pub overall_six_star_rate: f64,
    pub entries: Vec<LeaderboardEntry>,
}

struct OwnerTotals {
    owner_id: i64,
    username: String,
    total: i64,
    six: i64,
    five: i64,
    banners: HashSet<String>,
}

impl OwnerTotals {
    fn luck(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.six as f64 / self.total as f64
        }
    }
}

pub fn leaderboard(records: &[PullRecord], sort: LeaderboardSort, limit: usize) -> Leaderboard {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut owners: Vec<OwnerTotals> = Vec::new();

    for record in records {
        let i = *index.entry(record.owner_id).or_insert_with(|| {
            owners.push(OwnerTotals {
                owner_id: record.owner_id,
                username: record.owner_name.clone(),
                total: 0,
                six: 0,
                five: 0,
                banners: HashSet::new(),
            });
            owners.len() - 1
        });
        let owner = &mut owners[i];
        owner.total += record.total_pulls;
        owner.six += record.six_star_count;
        owner.five += record.five_star_count;
        owner.banners.insert(record.banner.clone());
    }

    // Population totals are taken before filtering and truncation
    let total_players = owners.len();
    let total_pulls: i64 = owners.iter().map(|o| o.total).sum();
    let total_six: i64 = owners.iter().map(|o| o.six).sum();

    match sort {
        LeaderboardSort::Pulls => owners.sort_by(|a, b| b.total.cmp(&a.total)),
        LeaderboardSort::Lucky => {
            owners.retain(|o| o.total >= LUCKY_MIN_PULLS);
            owners.sort_by(|a, b| b.luck().total_cmp(&a.luck()));
        }
    }
    owners.truncate(limit);

    let entries = owners
        .into_iter()
        .enumerate()
        .map(|(i, o)| LeaderboardEntry {
            rank: i + 1,
            user_id: o.owner_id,
            six_star_rate: rate(o.six, o.total),
            banners_tracked: o.banners.len(),
            username: o.username,
            total_pulls: o.total,
            six_star_count: o.six,
            five_star_count: o.five,
        })
        .collect();

    Leaderboard {
        total_players,
        total_pulls,
        overall_six_star_rate: rate(total_six, total_pulls),
        entries,
    }
}
