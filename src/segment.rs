//! Rule-based customer segmentation from RFM scores
//!
//! A segment is chosen by walking an ordered list of score-range rules and
//! taking the first one that matches. Ranges overlap, so the order of the
//! table decides the outcome. The last rule matches every triple.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::score::RfmScore;

/// Named customer segments, listed in default rule priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "Champions")]
    Champions,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalist")]
    PotentialLoyalist,
    #[serde(rename = "New Customers")]
    NewCustomers,
    #[serde(rename = "Promising")]
    Promising,
    #[serde(rename = "Need Attention")]
    NeedAttention,
    #[serde(rename = "About to Sleep")]
    AboutToSleep,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Cannot Lose Them")]
    CannotLoseThem,
    #[serde(rename = "Hibernating")]
    Hibernating,
    #[serde(rename = "Lost")]
    Lost,
}

impl Segment {
    pub const ALL: [Segment; 11] = [
        Segment::Champions,
        Segment::LoyalCustomers,
        Segment::PotentialLoyalist,
        Segment::NewCustomers,
        Segment::Promising,
        Segment::NeedAttention,
        Segment::AboutToSleep,
        Segment::AtRisk,
        Segment::CannotLoseThem,
        Segment::Hibernating,
        Segment::Lost,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::PotentialLoyalist => "Potential Loyalist",
            Segment::NewCustomers => "New Customers",
            Segment::Promising => "Promising",
            Segment::NeedAttention => "Need Attention",
            Segment::AboutToSleep => "About to Sleep",
            Segment::AtRisk => "At Risk",
            Segment::CannotLoseThem => "Cannot Lose Them",
            Segment::Hibernating => "Hibernating",
            Segment::Lost => "Lost",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::ALL
            .into_iter()
            .find(|seg| seg.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown segment '{s}'"))
    }
}

/// Inclusive score range for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: u32,
    pub max: u32,
}

impl ScoreRange {
    pub const ANY: ScoreRange = ScoreRange {
        min: 0,
        max: u32::MAX,
    };

    pub const fn at_least(min: u32) -> Self {
        Self { min, max: u32::MAX }
    }

    pub const fn at_most(max: u32) -> Self {
        Self { min: 0, max }
    }

    pub const fn between(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, score: u32) -> bool {
        self.min <= score && score <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRule {
    pub segment: Segment,
    pub r: ScoreRange,
    pub f: ScoreRange,
    pub m: ScoreRange,
}

impl SegmentRule {
    pub const fn new(segment: Segment, r: ScoreRange, f: ScoreRange, m: ScoreRange) -> Self {
        Self { segment, r, f, m }
    }

    pub fn matches(&self, r: u32, f: u32, m: u32) -> bool {
        self.r.contains(r) && self.f.contains(f) && self.m.contains(m)
    }
}

use ScoreRange as S;

/// Default table for 5-level scores. First match wins.
const DEFAULT_RULES: [SegmentRule; 10] = [
    SegmentRule::new(Segment::Champions, S::at_least(4), S::at_least(4), S::at_least(4)),
    SegmentRule::new(Segment::LoyalCustomers, S::at_least(3), S::at_least(3), S::at_least(3)),
    SegmentRule::new(Segment::PotentialLoyalist, S::at_least(4), S::at_least(2), S::at_least(2)),
    SegmentRule::new(Segment::NewCustomers, S::at_least(4), S::at_most(2), S::at_most(2)),
    SegmentRule::new(Segment::Promising, S::at_least(3), S::at_least(3), S::at_most(2)),
    SegmentRule::new(Segment::NeedAttention, S::at_least(2), S::at_least(2), S::at_least(2)),
    SegmentRule::new(Segment::AboutToSleep, S::at_most(2), S::at_least(2), S::at_least(2)),
    SegmentRule::new(Segment::AtRisk, S::at_most(2), S::at_least(3), S::at_least(3)),
    SegmentRule::new(Segment::CannotLoseThem, S::at_most(1), S::at_least(4), S::at_least(4)),
    SegmentRule::new(Segment::Hibernating, S::at_most(2), S::at_most(2), S::at_least(2)),
];

const CATCH_ALL: SegmentRule = SegmentRule::new(Segment::Lost, S::ANY, S::ANY, S::ANY);

/// Ordered rule table ending in a catch-all `Lost` rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTable {
    rules: Vec<SegmentRule>,
}

impl Default for RuleTable {
    /// The standard eleven-segment table. Its thresholds assume 5 score
    /// levels; with other quantile counts some segments become unreachable.
    fn default() -> Self {
        Self::new(DEFAULT_RULES.to_vec())
    }
}

impl RuleTable {
    /// Build a table from rules in priority order; the `Lost` catch-all is appended.
    pub fn new(mut rules: Vec<SegmentRule>) -> Self {
        rules.push(CATCH_ALL);
        Self { rules }
    }

    pub fn rules(&self) -> &[SegmentRule] {
        &self.rules
    }

    pub fn classify(&self, r: u32, f: u32, m: u32) -> Segment {
        self.rules
            .iter()
            .find(|rule| rule.matches(r, f, m))
            .map_or(Segment::Lost, |rule| rule.segment)
    }

    pub fn classify_score(&self, score: &RfmScore) -> Segment {
        self.classify(score.r, score.f, score.m)
    }

    /// Segments that no triple in [1, k]^3 can reach because earlier rules win
    pub fn shadowed_segments(&self, k: u32) -> Vec<Segment> {
        let mut reached = Vec::new();
        for r in 1..=k {
            for f in 1..=k {
                for m in 1..=k {
                    let seg = self.classify(r, f, m);
                    if !reached.contains(&seg) {
                        reached.push(seg);
                    }
                }
            }
        }
        let mut shadowed = Vec::new();
        for rule in &self.rules {
            if !reached.contains(&rule.segment) && !shadowed.contains(&rule.segment) {
                shadowed.push(rule.segment);
            }
        }
        shadowed
    }
}

/// Segment assigned to one customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLabel {
    pub customer_id: String,
    pub segment: Segment,
}

/// Label every scored customer, preserving input order
pub fn segment_customers(scores: &[RfmScore], table: &RuleTable) -> Vec<SegmentLabel> {
    let labels: Vec<SegmentLabel> = scores
        .iter()
        .map(|score| SegmentLabel {
            customer_id: score.customer_id.clone(),
            segment: table.classify_score(score),
        })
        .collect();

    for (segment, count) in segment_distribution(&labels) {
        let percentage = count as f64 / labels.len() as f64 * 100.0;
        log::info!("  {segment}: {count} customers ({percentage:.1}%)");
    }
    labels
}

/// Customer count per segment, in segment priority order, omitting empty segments
pub fn segment_distribution(labels: &[SegmentLabel]) -> Vec<(Segment, usize)> {
    Segment::ALL
        .into_iter()
        .map(|seg| (seg, labels.iter().filter(|l| l.segment == seg).count()))
        .filter(|(_, count)| *count > 0)
        .collect()
}
