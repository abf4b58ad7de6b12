//! Auto-response gating
//!
//! Classifies a retrieval similarity score into a triage decision. The
//! comparison is inclusive on both thresholds so a score exactly at a
//! boundary takes the stronger action.

use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

/// What to do with the best-matching article for an incoming ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Send the article as an automatic response
    Auto,
    /// Surface the article as a suggestion to the agent
    Suggest,
    /// Say nothing
    None,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Suggest => "suggest",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Threshold-based triage gate
#[derive(Debug, Clone)]
pub struct ResponseGate {
    t_high: f64,
    t_med: f64,
    auto_respond_enabled: bool,
}

impl ResponseGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            t_high: config.t_high,
            t_med: config.t_med,
            auto_respond_enabled: config.auto_respond_enabled,
        }
    }

    /// Classify a similarity score against the confidence bands.
    ///
    /// Purely threshold-based: a score at or above `t_high` is `Auto`
    /// regardless of the send flag. Whether an `Auto` decision actually
    /// goes out is a separate question, answered by
    /// [`auto_respond_enabled`](Self::auto_respond_enabled) at the point
    /// that sends.
    pub fn classify(&self, similarity: f64) -> GateDecision {
        if similarity >= self.t_high {
            GateDecision::Auto
        } else if similarity >= self.t_med {
            GateDecision::Suggest
        } else {
            GateDecision::None
        }
    }

    /// Whether `Auto` decisions may actually be sent
    pub fn auto_respond_enabled(&self) -> bool {
        self.auto_respond_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(auto: bool) -> ResponseGate {
        ResponseGate::new(&GateConfig {
            t_high: 0.85,
            t_med: 0.6,
            auto_respond_enabled: auto,
        })
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let gate = gate(true);
        assert_eq!(gate.classify(0.85), GateDecision::Auto);
        assert_eq!(gate.classify(0.6), GateDecision::Suggest);
        assert_eq!(gate.classify(0.5999), GateDecision::None);
        assert_eq!(gate.classify(0.8499), GateDecision::Suggest);
    }

    #[test]
    fn test_extremes() {
        let gate = gate(true);
        assert_eq!(gate.classify(1.0), GateDecision::Auto);
        assert_eq!(gate.classify(0.0), GateDecision::None);
        assert_eq!(gate.classify(-0.4), GateDecision::None);
    }

    #[test]
    fn test_classification_ignores_send_flag() {
        // The flag gates sending, not classification: a strong match is
        // still auto-eligible while sending stays off.
        let gate = gate(false);
        assert_eq!(gate.classify(0.95), GateDecision::Auto);
        assert_eq!(gate.classify(0.7), GateDecision::Suggest);
        assert_eq!(gate.classify(0.1), GateDecision::None);
        assert!(!gate.auto_respond_enabled());
    }
}
