use serde::{Deserialize, Serialize};

use super::revision::RevisionRef;

/// Fractions of the maximum possible intensity that changed between two renders.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeFractions {
    /// Content present only in the working-tree render, in `[0.0, 1.0]`.
    pub added: f64,
    /// Content present only in the target revision render, in `[0.0, 1.0]`.
    pub removed: f64,
}

impl ChangeFractions {
    /// No change at all.
    pub const ZERO: Self = Self {
        added: 0.0,
        removed: 0.0,
    };

    /// Sum of both fractions.
    #[must_use]
    pub fn total(self) -> f64 {
        self.added + self.removed
    }
}

/// Result of comparing a single layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum LayerOutcome {
    /// Both renders were rasterized and diffed.
    Compared {
        /// Path of the written diff image.
        image: String,
        /// Change metrics for the layer.
        changes: ChangeFractions,
    },
    /// The layer could not be compared; other layers are unaffected.
    Failed {
        /// Human-readable failure description.
        reason: String,
    },
}

/// Per-layer entry in a [`ComparisonReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerReport {
    /// Layer name as requested.
    pub layer: String,
    /// What happened to this layer.
    #[serde(flatten)]
    pub outcome: LayerOutcome,
}

impl LayerReport {
    /// Change metrics when the layer was compared.
    #[must_use]
    pub fn changes(&self) -> Option<ChangeFractions> {
        match &self.outcome {
            LayerOutcome::Compared { changes, .. } => Some(*changes),
            LayerOutcome::Failed { .. } => None,
        }
    }
}

/// Summary of one comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Revision the working tree was compared against.
    pub target: RevisionRef,
    /// Identity of the working-tree render.
    pub current_identity: String,
    /// Identity of the target render.
    pub target_identity: String,
    /// Layer results in request order.
    #[serde(default)]
    pub layers: Vec<LayerReport>,
}

impl ComparisonReport {
    /// Sum of all change fractions across compared layers.
    #[must_use]
    pub fn total_change(&self) -> f64 {
        self.layers
            .iter()
            .filter_map(LayerReport::changes)
            .map(ChangeFractions::total)
            .sum()
    }

    /// Returns `true` when no compared layer shows any change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.total_change() == 0.0
    }

    /// Number of layers that failed to compare.
    #[must_use]
    pub fn failed_layers(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| matches!(layer.outcome, LayerOutcome::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compared(layer: &str, added: f64, removed: f64) -> LayerReport {
        LayerReport {
            layer: layer.into(),
            outcome: LayerOutcome::Compared {
                image: format!("diffs/{layer}.png"),
                changes: ChangeFractions { added, removed },
            },
        }
    }

    #[test]
    fn total_change_skips_failed_layers() {
        let report = ComparisonReport {
            target: RevisionRef::Head,
            current_identity: "abc1234-dirty".into(),
            target_identity: "abc1234".into(),
            layers: vec![
                compared("F.Cu", 0.25, 0.5),
                LayerReport {
                    layer: "B.Cu".into(),
                    outcome: LayerOutcome::Failed {
                        reason: "dimension mismatch".into(),
                    },
                },
            ],
        };

        assert!((report.total_change() - 0.75).abs() < f64::EPSILON);
        assert!(!report.is_unchanged());
        assert_eq!(report.failed_layers(), 1);
    }

    #[test]
    fn layer_report_flattens_outcome() {
        let json = serde_json::to_string(&compared("F.Cu", 0.0, 0.0)).expect("serialize");
        assert!(json.contains(r#""layer":"F.Cu""#));
        assert!(json.contains(r#""status":"compared""#));

        let decoded: LayerReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded.changes(), Some(ChangeFractions::ZERO));
    }
}
