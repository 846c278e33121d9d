use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Phase
// ============================================================================

/// One stage of a validation conversation.
///
/// Variants are declared in lifecycle order, so `Ord` matches progression:
/// `brain_dump < discovery < research < findings < complete`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    BrainDump,
    Discovery,
    Research,
    Findings,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::BrainDump,
        Phase::Discovery,
        Phase::Research,
        Phase::Findings,
        Phase::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::BrainDump => "brain_dump",
            Phase::Discovery => "discovery",
            Phase::Research => "research",
            Phase::Findings => "findings",
            Phase::Complete => "complete",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Any strictly forward move is legal, which covers the
    /// `discovery -> findings` shortcut that skips research.
    pub fn can_advance_to(self, next: Phase) -> bool {
        next > self
    }

    /// Research is over once the conversation reaches findings.
    pub fn research_complete(self) -> bool {
        matches!(self, Phase::Findings | Phase::Complete)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase '{0}'")]
pub struct ParsePhaseError(String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| ParsePhaseError(s.to_string()))
    }
}

// ============================================================================
// Scores
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("score must be between {min} and {max}, got {0}", min = Score::MIN, max = Score::MAX)]
pub struct ScoreError(pub i64);

/// A confidence score in `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: i64) -> Result<Self, ScoreError> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ScoreError(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = ScoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for i64 {
    fn from(score: Score) -> Self {
        i64::from(score.0)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/10", self.0)
    }
}

/// The desirability / viability / feasibility triple.
///
/// `None` means "not scored yet". Updates always replace the whole triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceScores {
    #[serde(default)]
    pub desirability: Option<Score>,
    #[serde(default)]
    pub viability: Option<Score>,
    #[serde(default)]
    pub feasibility: Option<Score>,
}

impl ConfidenceScores {
    pub fn is_unscored(&self) -> bool {
        self.desirability.is_none() && self.viability.is_none() && self.feasibility.is_none()
    }
}

// ============================================================================
// Kill signals
// ============================================================================

/// Structural reasons an idea may not be viable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSignalKind {
    /// Looks easy, has been tried many times, keeps failing.
    Tarpit,
    /// Crowded market with no clear wedge.
    Saturation,
    /// Users are not unhappy enough to switch.
    NoSwitching,
    /// Nobody has shown they will pay.
    NoWillingnessToPay,
}

impl KillSignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KillSignalKind::Tarpit => "tarpit",
            KillSignalKind::Saturation => "saturation",
            KillSignalKind::NoSwitching => "no_switching",
            KillSignalKind::NoWillingnessToPay => "no_willingness_to_pay",
        }
    }
}

impl fmt::Display for KillSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kill signal as it travels on the wire, before the client stamps it
/// with the message index it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSignalReport {
    #[serde(rename = "type")]
    pub kind: KillSignalKind,
    pub evidence: String,
}
