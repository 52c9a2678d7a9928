//! Confidence gating for top predictions.
//!
//! A prediction below the threshold is valid data, not a failure: the gate
//! decides accept/reject and the raw confidence is always surfaced to the
//! caller so it can render retake guidance. The gate is deliberately
//! conservative; the threshold is a deployment parameter, not logic.

use crate::config::DEFAULT_THRESHOLD;

/// Decides whether a top prediction is trustworthy enough to act on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    /// Minimum confidence an accepted prediction must reach.
    pub threshold: f32,
}

impl ConfidenceGate {
    /// Creates a gate with the given threshold.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Pure numeric comparison: `confidence >= threshold`.
    pub fn accept(&self, confidence: f32) -> bool {
        confidence >= self.threshold
    }
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_boundary_is_inclusive() {
        let gate = ConfidenceGate::new(0.5);
        assert!(gate.accept(0.5));
        assert!(!gate.accept(0.4999));
    }

    #[test]
    fn test_default_threshold() {
        let gate = ConfidenceGate::default();
        assert_eq!(gate.threshold, 0.5);
        assert!(gate.accept(0.92));
        assert!(!gate.accept(0.1));
    }

    #[test]
    fn test_custom_threshold() {
        let gate = ConfidenceGate::new(0.8);
        assert!(!gate.accept(0.79));
        assert!(gate.accept(0.8));
    }
}
