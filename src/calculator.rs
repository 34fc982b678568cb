// Operator stat calculator: level interpolation between checkpoint snapshots
// and the talent attribute bonus.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Highest usable level for each breakthrough tier (0..=4).
pub const BREAKTHROUGH_LEVEL_CAPS: [u32; 5] = [20, 40, 60, 80, 90];

/// Interpolation segments as (min level, max level).
const SEGMENTS: [(u32, u32); 5] = [(1, 20), (20, 40), (40, 60), (60, 80), (80, 90)];

pub const MAX_BREAKTHROUGH: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Strength,
    Agility,
    Intellect,
    Will,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatBlock {
    pub hp: i64,
    pub atk: i64,
    pub def: i64,
    pub strength: i64,
    pub agility: i64,
    pub intellect: i64,
    pub will: i64,
}

impl StatBlock {
    /// Interpolate every field independently and round to the nearest integer.
    pub fn lerp(&self, to: &StatBlock, t: f64) -> StatBlock {
        let mix = |a: i64, b: i64| (a as f64 + (b - a) as f64 * t).round() as i64;
        StatBlock {
            hp: mix(self.hp, to.hp),
            atk: mix(self.atk, to.atk),
            def: mix(self.def, to.def),
            strength: mix(self.strength, to.strength),
            agility: mix(self.agility, to.agility),
            intellect: mix(self.intellect, to.intellect),
            will: mix(self.will, to.will),
        }
    }
}

/// Stat snapshots for one operator: level 1, the four checkpoints and level 90.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStats {
    pub main_attribute: Attribute,
    pub base: StatBlock,
    pub lv20: StatBlock,
    pub lv40: StatBlock,
    pub lv60: StatBlock,
    pub lv80: StatBlock,
    pub max: StatBlock,
}

impl OperatorStats {
    fn snapshot_at(&self, level: u32) -> &StatBlock {
        match level {
            20 => &self.lv20,
            40 => &self.lv40,
            60 => &self.lv60,
            80 => &self.lv80,
            90 => &self.max,
            _ => &self.base,
        }
    }

    /// Stats at `level`, after capping it to what `breakthrough` allows.
    pub fn at_level(&self, level: u32, breakthrough: u8) -> LevelStats {
        let level = level.clamp(1, max_level_for_breakthrough(breakthrough));
        let (min_lv, max_lv) = segment_for(level);
        let t = if max_lv == min_lv {
            0.0
        } else {
            (level - min_lv) as f64 / (max_lv - min_lv) as f64
        };
        let from = self.snapshot_at(min_lv);
        let to = self.snapshot_at(max_lv);
        LevelStats {
            level,
            stats: from.lerp(to, t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub level: u32,
    pub stats: StatBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TalentBonus {
    pub attribute: Attribute,
    pub value: i64,
}

pub fn max_level_for_breakthrough(tier: u8) -> u32 {
    BREAKTHROUGH_LEVEL_CAPS[tier.min(MAX_BREAKTHROUGH) as usize]
}

/// Last segment whose lower bound is at or below `level`.
fn segment_for(level: u32) -> (u32, u32) {
    SEGMENTS
        .iter()
        .rev()
        .find(|(min_lv, _)| *min_lv <= level)
        .copied()
        .unwrap_or(SEGMENTS[0])
}

/// Flat attribute bonus granted by talent tier; tiers past 4 keep the tier-4 value.
pub fn talent_attribute_bonus(tier: u8) -> i64 {
    match tier {
        0 => 0,
        1 => 10,
        2 => 25,
        3 => 40,
        _ => 60,
    }
}

/// Operator name -> stat snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatTable {
    operators: HashMap<String, OperatorStats>,
}

impl StatTable {
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Invalid stat table: {e}"))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Self::from_json_str(&content)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&OperatorStats> {
        self.operators.get(name).or_else(|| {
            self.operators
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// `None` when the operator is not in the table.
    pub fn calculate(&self, name: &str, level: u32, breakthrough: u8) -> Option<LevelStats> {
        self.get(name).map(|op| op.at_level(level, breakthrough))
    }

    /// `None` for unknown operators and for tiers below 1.
    pub fn talent_bonus(&self, name: &str, tier: u8) -> Option<TalentBonus> {
        if tier < 1 {
            return None;
        }
        let op = self.get(name)?;
        Some(TalentBonus {
            attribute: op.main_attribute,
            value: talent_attribute_bonus(tier),
        })
    }
}
