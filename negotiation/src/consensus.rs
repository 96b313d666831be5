//! Consensus detection — stance classification and convergence scoring.
//!
//! Stance classification is deliberately heuristic: ordered substring
//! matching over bilingual (Korean + English) phrase lists. It sits behind
//! [`StanceClassifier`] so a better classifier can replace it without
//! touching the debate state machine.

use serde::{Deserialize, Serialize};

use crate::persona::Role;
use crate::session::DebateTurn;

/// A role's inferred agreement posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Agree,
    Partial,
    Disagree,
    Neutral,
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agree => write!(f, "agree"),
            Self::Partial => write!(f, "partial"),
            Self::Disagree => write!(f, "disagree"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Aggregate agreement status across all participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    /// Rate at or above the consensus threshold.
    Consensus,
    /// Rate at or above 0.5 but below the threshold.
    Partial,
    /// Rate below 0.5.
    Disagreement,
    /// Three consecutive rounds with an identical rounded rate.
    Stalemate,
}

impl std::fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consensus => write!(f, "consensus"),
            Self::Partial => write!(f, "partial"),
            Self::Disagreement => write!(f, "disagreement"),
            Self::Stalemate => write!(f, "stalemate"),
        }
    }
}

/// Result of one consensus analysis pass. Recomputed fresh every round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub status: ConsensusStatus,
    /// Agreement score in [0, 1].
    pub rate: f64,
    /// Per-role stance, in participant order.
    pub stances: Vec<(Role, Stance)>,
    pub is_stalemate: bool,
    /// Human-readable summary naming dissenting roles where relevant.
    pub summary: String,
}

impl ConsensusResult {
    /// Stance of one role, `Neutral` if the role was not analyzed.
    pub fn stance_of(&self, role: Role) -> Stance {
        self.stances
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, s)| *s)
            .unwrap_or(Stance::Neutral)
    }

    /// Roles holding a `Disagree` stance, falling back to `Partial` holders
    /// when nobody outright disagrees.
    pub fn dissenting_roles(&self) -> Vec<Role> {
        let disagree: Vec<Role> = self
            .stances
            .iter()
            .filter(|(_, s)| *s == Stance::Disagree)
            .map(|(r, _)| *r)
            .collect();
        if !disagree.is_empty() {
            return disagree;
        }
        self.stances
            .iter()
            .filter(|(_, s)| *s == Stance::Partial)
            .map(|(r, _)| *r)
            .collect()
    }
}

/// Classifies a turn's free text into a stance.
pub trait StanceClassifier: Send + Sync {
    fn classify(&self, content: &str) -> Stance;
}

/// Ordered keyword matcher over Korean and English phrase lists.
///
/// Partial-agreement phrases take precedence; then agreement and
/// disagreement lists are checked together — both present means `Partial`.
#[derive(Debug, Default, Clone)]
pub struct KeywordStanceClassifier;

const PARTIAL_PHRASES: &[&str] = &[
    "partially agree",
    "agree in part",
    "agree with most",
    "agree, but",
    "agree but",
    "with reservations",
    "부분적으로 동의",
    "동의하지만",
    "일부 동의",
];

const AGREE_PHRASES: &[&str] = &[
    "i agree",
    "agreed",
    "i support",
    "sounds good",
    "makes sense",
    "no objection",
    "동의합니다",
    "찬성합니다",
    "좋은 방향",
];

const DISAGREE_PHRASES: &[&str] = &[
    "i disagree",
    "disagree with",
    "i object",
    "oppose this",
    "cannot accept",
    "strongly against",
    "반대합니다",
    "동의하지 않습니다",
    "우려가 큽니다",
];

impl StanceClassifier for KeywordStanceClassifier {
    fn classify(&self, content: &str) -> Stance {
        let text = content.to_lowercase();
        if PARTIAL_PHRASES.iter().any(|p| text.contains(p)) {
            return Stance::Partial;
        }
        let agrees = AGREE_PHRASES.iter().any(|p| text.contains(p));
        let disagrees = DISAGREE_PHRASES.iter().any(|p| text.contains(p));
        match (agrees, disagrees) {
            (true, true) => Stance::Partial,
            (true, false) => Stance::Agree,
            (false, true) => Stance::Disagree,
            (false, false) => Stance::Neutral,
        }
    }
}

/// Consensus rate threshold for full consensus.
const CONSENSUS_THRESHOLD: f64 = 0.8;
/// Identical rounded rates needed for a stalemate.
const STALEMATE_WINDOW: usize = 3;

/// Computes aggregate agreement from the turn history.
///
/// Holds one piece of rolling state (the rounded-rate history used for
/// stalemate detection), so one instance must be scoped to exactly one
/// debate.
pub struct ConsensusDetector {
    classifier: Box<dyn StanceClassifier>,
    rate_history: Vec<u32>,
}

impl ConsensusDetector {
    /// Detector with the default keyword classifier.
    pub fn new() -> Self {
        Self::with_classifier(Box::new(KeywordStanceClassifier))
    }

    /// Detector with a custom classifier.
    pub fn with_classifier(classifier: Box<dyn StanceClassifier>) -> Self {
        Self {
            classifier,
            rate_history: Vec::new(),
        }
    }

    /// Analyze the latest stance of every participant.
    ///
    /// Appends the rounded rate to the stalemate history; three identical
    /// consecutive entries flag a stalemate, which overrides every other
    /// status.
    pub fn analyze(&mut self, turns: &[DebateTurn], participants: &[Role]) -> ConsensusResult {
        let stances: Vec<(Role, Stance)> = participants
            .iter()
            .map(|role| {
                let stance = turns
                    .iter()
                    .rev()
                    .find(|t| t.role == *role)
                    .map(|t| self.classifier.classify(&t.content))
                    .unwrap_or(Stance::Neutral);
                (*role, stance)
            })
            .collect();

        let agree = stances.iter().filter(|(_, s)| *s == Stance::Agree).count();
        let partial = stances.iter().filter(|(_, s)| *s == Stance::Partial).count();
        let rate = if participants.is_empty() {
            0.0
        } else {
            (agree as f64 + 0.5 * partial as f64) / participants.len() as f64
        };

        let rounded_pct = (rate * 100.0).round() as u32;
        self.rate_history.push(rounded_pct);
        let is_stalemate = self.rate_history.len() >= STALEMATE_WINDOW
            && self
                .rate_history
                .iter()
                .rev()
                .take(STALEMATE_WINDOW)
                .all(|&r| r == rounded_pct);

        let status = if is_stalemate {
            ConsensusStatus::Stalemate
        } else if rate >= CONSENSUS_THRESHOLD {
            ConsensusStatus::Consensus
        } else if rate >= 0.5 {
            ConsensusStatus::Partial
        } else {
            ConsensusStatus::Disagreement
        };

        let result = ConsensusResult {
            status,
            rate,
            stances,
            is_stalemate,
            summary: String::new(),
        };
        let summary = Self::summarize(&result, rounded_pct);
        ConsensusResult { summary, ..result }
    }

    fn summarize(result: &ConsensusResult, pct: u32) -> String {
        match result.status {
            ConsensusStatus::Consensus => format!(
                "consensus reached at {}% agreement across {} participants",
                pct,
                result.stances.len()
            ),
            ConsensusStatus::Stalemate => format!(
                "stalemate: agreement pinned at {}% for {} consecutive rounds",
                pct, STALEMATE_WINDOW
            ),
            ConsensusStatus::Partial | ConsensusStatus::Disagreement => {
                let dissent: Vec<String> = result
                    .dissenting_roles()
                    .iter()
                    .map(|r| r.to_string())
                    .collect();
                if dissent.is_empty() {
                    format!("{}% agreement, no explicit dissent recorded", pct)
                } else {
                    format!("{}% agreement; dissenting: {}", pct, dissent.join(", "))
                }
            }
        }
    }

    /// Clear the stalemate history for reuse across sessions.
    pub fn reset(&mut self) {
        self.rate_history.clear();
    }
}

impl Default for ConsensusDetector {
    fn default() -> Self {
        Self::new()
    }
}
