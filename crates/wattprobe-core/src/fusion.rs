//! Dataset fusion: nearest-timestamp join of feature ticks and power samples.
//!
//! A pure batch computation over two already-materialized, timestamp-sorted
//! sequences. Given identical inputs and parameters the output is
//! byte-for-byte reproducible; inputs are never mutated. Rows that fail the
//! tolerance or power-threshold gates are emitted unmatched rather than
//! dropped, so feature-only analysis keeps its rows and poor fusion shows up
//! in the statistics instead of disappearing.

use serde::{Deserialize, Serialize};

use crate::record::{FeatureRecord, MergedRow, PowerRecord};
use crate::sync::guarded_ratio;

/// Power domain used as the training label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerZone {
    Core,
    Package,
}

impl PowerZone {
    /// The selected zone's wattage on a power sample.
    pub fn select(self, record: &PowerRecord) -> f64 {
        match self {
            Self::Core => record.power_core_watts,
            Self::Package => record.power_package_watts,
        }
    }
}

impl std::fmt::Display for PowerZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Package => write!(f, "package"),
        }
    }
}

impl std::str::FromStr for PowerZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Self::Core),
            "package" => Ok(Self::Package),
            other => Err(format!("unknown power zone '{other}' (expected core or package)")),
        }
    }
}

/// Parameters of one merge operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Maximum |timestamp difference| in seconds for a match.
    pub tolerance_secs: f64,
    /// Which power domain labels the row.
    pub zone: PowerZone,
    /// Zone values below this are treated as mis-measured noise: non-matches.
    pub min_power_watts: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 0.2,
            zone: PowerZone::Core,
            min_power_watts: 0.0,
        }
    }
}

/// Quality diagnostics of one merge operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeStats {
    pub feature_points: u64,
    pub power_points: u64,
    pub matched_points: u64,
    pub unmatched_points: u64,
    /// matched / total feature points.
    pub match_rate: f64,
    /// Mean |timestamp difference| over matched rows; absent with no matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_time_diff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_diff: Option<f64>,
    /// Min/max matched power label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_time_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_time_range: Option<(f64, f64)>,
}

/// Index of the power sample nearest to `t`; exact distance ties prefer the
/// earlier timestamp. Assumes `power` is sorted by timestamp.
fn nearest_power(power: &[PowerRecord], t: f64) -> Option<usize> {
    if power.is_empty() {
        return None;
    }
    let idx = power.partition_point(|p| p.timestamp < t);
    let after = (idx < power.len()).then(|| ((power[idx].timestamp - t).abs(), idx));
    let before = (idx > 0).then(|| ((power[idx - 1].timestamp - t).abs(), idx - 1));
    match (before, after) {
        (Some((db, ib)), Some((da, _))) if db <= da => Some(ib),
        (_, Some((_, ia))) => Some(ia),
        (Some((_, ib)), None) => Some(ib),
        (None, None) => None,
    }
}

/// Join each feature tick with its nearest-in-time power sample.
///
/// Every input feature record yields exactly one output row, in input order.
/// A row is matched iff a power sample lies within the tolerance *and* its
/// selected zone value clears the noise threshold.
pub fn merge(
    features: &[FeatureRecord],
    power: &[PowerRecord],
    config: &MergeConfig,
) -> (Vec<MergedRow>, MergeStats) {
    let mut rows = Vec::with_capacity(features.len());
    let mut matched = 0u64;
    let mut diff_sum = 0.0;
    let mut diff_max = 0.0_f64;
    let mut power_min = f64::INFINITY;
    let mut power_max = f64::NEG_INFINITY;

    for feature in features {
        let candidate = nearest_power(power, feature.timestamp).map(|i| {
            let diff = (feature.timestamp - power[i].timestamp).abs();
            (diff, config.zone.select(&power[i]))
        });

        let row = match candidate {
            Some((diff, watts))
                if diff <= config.tolerance_secs && watts >= config.min_power_watts =>
            {
                matched += 1;
                diff_sum += diff;
                diff_max = diff_max.max(diff);
                power_min = power_min.min(watts);
                power_max = power_max.max(watts);
                MergedRow {
                    features: feature.clone(),
                    power_watts: Some(watts),
                    time_diff: Some(diff),
                    matched: true,
                }
            }
            _ => MergedRow {
                features: feature.clone(),
                power_watts: None,
                time_diff: None,
                matched: false,
            },
        };
        rows.push(row);
    }

    let total = features.len() as u64;
    let stats = MergeStats {
        feature_points: total,
        power_points: power.len() as u64,
        matched_points: matched,
        unmatched_points: total - matched,
        match_rate: guarded_ratio(matched as f64, total as f64),
        mean_time_diff: (matched > 0).then(|| diff_sum / matched as f64),
        max_time_diff: (matched > 0).then_some(diff_max),
        power_range: (matched > 0).then_some((power_min, power_max)),
        feature_time_range: time_range(features.iter().map(|f| f.timestamp)),
        power_time_range: time_range(power.iter().map(|p| p.timestamp)),
    };

    (rows, stats)
}

fn time_range(timestamps: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut range: Option<(f64, f64)> = None;
    for t in timestamps {
        range = Some(match range {
            Some((lo, hi)) => (lo.min(t), hi.max(t)),
            None => (t, t),
        });
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FeatureRecord;

    fn feature(t: f64) -> FeatureRecord {
        FeatureRecord::empty(t, format!("t{t}"))
    }

    fn power(t: f64, core: f64, package: f64) -> PowerRecord {
        PowerRecord {
            timestamp: t,
            power_core_watts: core,
            power_package_watts: package,
            vm_count: 1,
        }
    }

    #[test]
    fn tolerance_and_threshold_gate_matches() {
        // Ticks at 0/1/2s against a sparse power series: one clean match,
        // one out of tolerance, one within tolerance but in the noise floor.
        let features = vec![feature(0.0), feature(1.0), feature(2.0)];
        let powers = vec![
            power(0.05, 10.0, 11.0),
            power(1.9, 0.0005, 0.0006),
            power(5.0, 12.0, 13.0),
        ];
        let config = MergeConfig {
            tolerance_secs: 0.5,
            zone: PowerZone::Core,
            min_power_watts: 0.001,
        };
        let (rows, stats) = merge(&features, &powers, &config);

        assert_eq!(rows.len(), 3);
        assert!(rows[0].matched);
        assert_eq!(rows[0].power_watts, Some(10.0));
        assert!((rows[0].time_diff.unwrap() - 0.05).abs() < 1e-9);

        // Nearest is 1.9 at diff 0.9 > tolerance.
        assert!(!rows[1].matched);
        assert!(rows[1].power_watts.is_none());
        assert!(rows[1].time_diff.is_none());

        // Nearest is 1.9 at diff 0.1, but 0.0005 W sits below the threshold.
        assert!(!rows[2].matched);
        assert!(rows[2].power_watts.is_none());

        assert_eq!(stats.matched_points, 1);
        assert_eq!(stats.unmatched_points, 2);
        assert!((stats.match_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.mean_time_diff.unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn exact_ties_prefer_the_earlier_power_sample() {
        let features = vec![feature(10.0)];
        let powers = vec![power(9.5, 1.0, 1.0), power(10.5, 2.0, 2.0)];
        let config = MergeConfig {
            tolerance_secs: 1.0,
            ..Default::default()
        };
        let (rows, _) = merge(&features, &powers, &config);
        assert!(rows[0].matched);
        assert_eq!(rows[0].power_watts, Some(1.0));
    }

    #[test]
    fn zone_selects_the_labeled_domain() {
        let features = vec![feature(1.0)];
        let powers = vec![power(1.0, 5.0, 8.0)];
        let core = MergeConfig {
            zone: PowerZone::Core,
            ..Default::default()
        };
        let package = MergeConfig {
            zone: PowerZone::Package,
            ..Default::default()
        };
        assert_eq!(merge(&features, &powers, &core).0[0].power_watts, Some(5.0));
        assert_eq!(
            merge(&features, &powers, &package).0[0].power_watts,
            Some(8.0)
        );
    }

    #[test]
    fn empty_power_series_yields_all_unmatched() {
        let features = vec![feature(0.0), feature(1.0)];
        let (rows, stats) = merge(&features, &[], &MergeConfig::default());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.matched));
        assert_eq!(stats.match_rate, 0.0);
        assert!(stats.mean_time_diff.is_none());
        assert!(stats.power_time_range.is_none());
    }

    #[test]
    fn merge_is_deterministic() {
        let features: Vec<_> = (0..50).map(|i| feature(i as f64 * 0.5)).collect();
        let powers: Vec<_> = (0..200)
            .map(|i| power(i as f64 * 0.13, 10.0 + i as f64 * 0.01, 12.0))
            .collect();
        let config = MergeConfig {
            tolerance_secs: 0.1,
            ..Default::default()
        };
        let (rows_a, stats_a) = merge(&features, &powers, &config);
        let (rows_b, stats_b) = merge(&features, &powers, &config);
        assert_eq!(rows_a, rows_b);
        assert_eq!(
            serde_json::to_string(&stats_a).unwrap(),
            serde_json::to_string(&stats_b).unwrap()
        );
    }

    #[test]
    fn every_feature_row_is_retained_in_order() {
        let features = vec![feature(0.0), feature(0.4), feature(0.8)];
        let powers = vec![power(0.41, 3.0, 3.0)];
        let (rows, _) = merge(&features, &powers, &MergeConfig::default());
        assert_eq!(rows.len(), 3);
        let ts: Vec<f64> = rows.iter().map(|r| r.features.timestamp).collect();
        assert_eq!(ts, vec![0.0, 0.4, 0.8]);
        assert!(!rows[0].matched);
        assert!(rows[1].matched);
        assert!(!rows[2].matched);
    }

    #[test]
    fn nearest_power_handles_boundaries() {
        let powers = vec![power(1.0, 1.0, 1.0), power(2.0, 2.0, 2.0)];
        assert_eq!(nearest_power(&powers, 0.0), Some(0));
        assert_eq!(nearest_power(&powers, 3.0), Some(1));
        assert_eq!(nearest_power(&powers, 1.4), Some(0));
        assert_eq!(nearest_power(&powers, 1.6), Some(1));
        // Exact midpoint: earlier record wins.
        assert_eq!(nearest_power(&powers, 1.5), Some(0));
        assert_eq!(nearest_power(&[], 1.0), None);
    }
}
