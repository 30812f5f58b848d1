// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: pre-trained boost classifier artifact.
//
// The offline trainer fits a random forest on the collected feature CSV and
// exports it as JSON node arrays; this side only loads the artifact and
// asks it for predictions.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::features::FeatureSnapshot;
use crate::policy::MAX_BOOST;

/// One decision tree in flattened node-array form. `feature[n] < 0` marks a
/// leaf; internal nodes compare the feature value against `threshold[n]`
/// and descend to `left[n]` or `right[n]`. `value[n]` is the predicted
/// level at a leaf.
#[derive(Debug, Deserialize)]
struct Tree {
    feature: Vec<i32>,
    threshold: Vec<f64>,
    left: Vec<i32>,
    right: Vec<i32>,
    value: Vec<u8>,
}

impl Tree {
    fn node_count(&self) -> usize {
        self.feature.len()
    }

    fn is_consistent(&self) -> bool {
        let n = self.node_count();
        n > 0
            && self.threshold.len() == n
            && self.left.len() == n
            && self.right.len() == n
            && self.value.len() == n
    }

    fn predict(&self, row: &[f64]) -> u8 {
        let mut node = 0usize;
        // Node count bounds the walk so a malformed artifact cannot loop.
        for _ in 0..self.node_count() {
            let feature = self.feature[node];
            if feature < 0 {
                return self.value[node];
            }
            let observed = row.get(feature as usize).copied().unwrap_or(0.0);
            let child = if observed <= self.threshold[node] {
                self.left[node]
            } else {
                self.right[node]
            };
            if child < 0 || child as usize >= self.node_count() {
                return self.value[node];
            }
            node = child as usize;
        }
        self.value[node]
    }
}

/// Opaque classifier mapping a feature snapshot to a boost level. Carries
/// the ordered list of feature names it was trained on; lookups are by
/// name, with zero substituted for names absent from the snapshot.
#[derive(Debug, Deserialize)]
pub struct BoostModel {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
}

impl BoostModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        let model: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse model from {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.feature_names.is_empty() {
            bail!("model has no feature names");
        }
        if self.trees.is_empty() {
            bail!("model has no trees");
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if !tree.is_consistent() {
                bail!("model tree {} has inconsistent node arrays", i);
            }
        }
        Ok(())
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Majority vote across the ensemble, clamped into the boost range.
    /// Ties resolve to the lower level.
    pub fn predict(&self, snap: &FeatureSnapshot) -> u8 {
        let row: Vec<f64> = self
            .feature_names
            .iter()
            .map(|name| snap.get(name).unwrap_or(0.0))
            .collect();

        let mut votes = [0u32; MAX_BOOST as usize + 1];
        for tree in &self.trees {
            let level = tree.predict(&row).min(MAX_BOOST);
            votes[level as usize] += 1;
        }

        let mut best = 0u8;
        for (level, &count) in votes.iter().enumerate() {
            if count > votes[best as usize] {
                best = level as u8;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSnapshot, AVG_LOAD, PROC_CPU};
    use tempfile::tempdir;

    /// Stump on avg_load: <= 50 predicts 0, otherwise 2.
    fn avg_load_stump() -> &'static str {
        r#"{
            "feature_names": ["avg_load", "proc_cpu"],
            "trees": [{
                "feature": [0, -2, -2],
                "threshold": [50.0, 0.0, 0.0],
                "left": [1, -1, -1],
                "right": [2, -1, -1],
                "value": [0, 0, 2]
            }]
        }"#
    }

    fn load_stump() -> BoostModel {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, avg_load_stump()).unwrap();
        BoostModel::load(&path).unwrap()
    }

    #[test]
    fn test_predict_walks_tree() {
        let model = load_stump();
        let mut snap = FeatureSnapshot::new();
        snap.insert(AVG_LOAD, 80.0);
        snap.insert(PROC_CPU, 10.0);
        assert_eq!(model.predict(&snap), 2);

        snap.insert(AVG_LOAD, 30.0);
        assert_eq!(model.predict(&snap), 0);
    }

    #[test]
    fn test_predict_zero_fills_absent_features() {
        let model = load_stump();
        // avg_load missing -> treated as 0 -> left branch.
        let snap = FeatureSnapshot::new();
        assert_eq!(model.predict(&snap), 0);
    }

    #[test]
    fn test_majority_vote_and_clamp() {
        let json = r#"{
            "feature_names": ["avg_load"],
            "trees": [
                {"feature": [-2], "threshold": [0.0], "left": [-1], "right": [-1], "value": [9]},
                {"feature": [-2], "threshold": [0.0], "left": [-1], "right": [-1], "value": [3]},
                {"feature": [-2], "threshold": [0.0], "left": [-1], "right": [-1], "value": [1]}
            ]
        }"#;
        let model: BoostModel = serde_json::from_str(json).unwrap();
        model.validate().unwrap();
        // The out-of-range 9 clamps to 3, giving 3 two votes.
        assert_eq!(model.predict(&FeatureSnapshot::new()), 3);
    }

    #[test]
    fn test_load_rejects_malformed_artifacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");

        assert!(BoostModel::load(&path).is_err());

        std::fs::write(&path, "{not json").unwrap();
        assert!(BoostModel::load(&path).is_err());

        // Mismatched node arrays.
        std::fs::write(
            &path,
            r#"{"feature_names": ["avg_load"],
                "trees": [{"feature": [0], "threshold": [], "left": [], "right": [], "value": []}]}"#,
        )
        .unwrap();
        assert!(BoostModel::load(&path).is_err());
    }
}
