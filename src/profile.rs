//! Cluster profiles and human-readable segment labels

use std::collections::BTreeSet;

use ndarray::{Array1, Array2};
use polars::prelude::{ChunkAgg, ChunkQuantile, Float64Chunked, NewChunkedArray};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::NOISE;
use crate::preprocess::SemanticRoles;

/// Label given to noise rows in per-row assignments
pub const NOISE_LABEL: &str = "Noise";

/// Percentile above which a cluster counts as high on a role
const HIGH_PERCENTILE: f64 = 0.66;
/// Percentile below which a cluster counts as low on a role
const LOW_PERCENTILE: f64 = 0.33;

/// Mean and median of one feature within a cluster, both rounded to 2 decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub feature: String,
    pub mean: f64,
    pub median: f64,
}

/// Summary of one non-noise cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: i64,
    pub size: usize,
    /// Share of all non-noise points, in percent
    pub percentage: f64,
    /// One entry per feature, in feature order
    pub features: Vec<FeatureSummary>,
    pub label: String,
}

impl ClusterProfile {
    pub fn mean_of(&self, feature: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|f| f.feature == feature)
            .map(|f| f.mean)
    }
}

/// Profile every non-noise cluster in ascending id order and label it
pub fn profile_clusters(
    features: &Array2<f64>,
    feature_names: &[String],
    roles: SemanticRoles,
    labels: &Array1<i64>,
) -> crate::Result<Vec<ClusterProfile>> {
    if labels.len() != features.nrows() {
        return Err(Error::invalid(format!(
            "{} labels for {} rows",
            labels.len(),
            features.nrows()
        )));
    }
    if feature_names.len() != features.ncols() {
        return Err(Error::invalid(format!(
            "{} feature names for {} columns",
            feature_names.len(),
            features.ncols()
        )));
    }

    let total = labels.iter().filter(|&&l| l != NOISE).count();
    let ids: BTreeSet<i64> = labels.iter().copied().filter(|&l| l != NOISE).collect();

    let mut profiles: Vec<ClusterProfile> = ids
        .into_iter()
        .map(|cluster_id| {
            let rows: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == cluster_id).collect();
            let summaries = feature_names
                .iter()
                .enumerate()
                .map(|(j, name)| {
                    let values = Float64Chunked::from_vec(
                        name,
                        rows.iter().map(|&i| features[[i, j]]).collect(),
                    );
                    let mean = values.mean().unwrap_or_default();
                    FeatureSummary {
                        feature: name.clone(),
                        mean: round2(mean),
                        median: round2(values.median().unwrap_or(mean)),
                    }
                })
                .collect();

            ClusterProfile {
                cluster_id,
                size: rows.len(),
                percentage: round2(rows.len() as f64 / total as f64 * 100.0),
                features: summaries,
                label: String::new(),
            }
        })
        .collect();

    let names = auto_label(&profiles, roles);
    for (profile, label) in profiles.iter_mut().zip(names) {
        profile.label = label;
    }
    Ok(profiles)
}

/// Name each profile from its income and spending means, or from its size when
/// either role is missing
pub fn auto_label(profiles: &[ClusterProfile], roles: SemanticRoles) -> Vec<String> {
    let Some((income, spending)) = roles.income_and_spending() else {
        return profiles.iter().map(size_label).collect();
    };

    let role_mean = |p: &ClusterProfile, index: usize| p.features.get(index).map(|f| f.mean);
    let incomes: Vec<Option<f64>> = profiles.iter().map(|p| role_mean(p, income)).collect();
    let spendings: Vec<Option<f64>> = profiles.iter().map(|p| role_mean(p, spending)).collect();

    profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| match (incomes[i], spendings[i]) {
            (Some(inc), Some(spend)) => {
                spend_label(percentile(inc, &incomes), percentile(spend, &spendings)).to_string()
            }
            _ => size_label(profile),
        })
        .collect()
}

/// Fraction of values strictly below `value`
fn percentile(value: f64, values: &[Option<f64>]) -> f64 {
    let below = values.iter().flatten().filter(|&&v| v < value).count();
    below as f64 / values.len() as f64
}

fn spend_label(income: f64, spending: f64) -> &'static str {
    let high_income = income > HIGH_PERCENTILE;
    let low_income = income < LOW_PERCENTILE;
    let high_spending = spending > HIGH_PERCENTILE;
    let low_spending = spending < LOW_PERCENTILE;

    if high_income && high_spending {
        "Premium High Spenders"
    } else if high_income && low_spending {
        "Affluent Savers"
    } else if low_income && high_spending {
        "Budget Splurgers"
    } else if low_income && low_spending {
        "Careful Shoppers"
    } else if high_spending {
        "Active Shoppers"
    } else {
        "Average Customers"
    }
}

fn size_label(profile: &ClusterProfile) -> String {
    if profile.percentage > 30.0 {
        "Mainstream Segment".to_string()
    } else if profile.percentage < 10.0 {
        "Niche Segment".to_string()
    } else {
        format!("Segment {}", segment_letter(profile.cluster_id))
    }
}

/// Spreadsheet-style letters: 0 is A, 25 is Z, 26 is AA
pub fn segment_letter(cluster_id: i64) -> String {
    let mut n = cluster_id.max(0) as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// Label of every row, [`NOISE_LABEL`] for noise rows
pub fn label_assignments(labels: &Array1<i64>, profiles: &[ClusterProfile]) -> Vec<String> {
    labels
        .iter()
        .map(|&label| {
            profiles
                .iter()
                .find(|p| p.cluster_id == label)
                .map_or_else(|| NOISE_LABEL.to_string(), |p| p.label.clone())
        })
        .collect()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_profile_sizes_and_stats() {
        let x = array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0], [100.0, 0.0]];
        let labels = array![1, 1, 0, NOISE];
        let feature_names = names(&["Age", "Tenure"]);
        let profiles =
            profile_clusters(&x, &feature_names, SemanticRoles::resolve(&feature_names), &labels)
                .unwrap();

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].cluster_id, 0);
        assert_eq!(profiles[0].size, 1);
        assert_abs_diff_eq!(profiles[0].percentage, 33.33, epsilon = 1e-9);
        assert_eq!(profiles[1].size, 2);
        assert_abs_diff_eq!(profiles[1].percentage, 66.67, epsilon = 1e-9);
        assert_eq!(profiles[1].mean_of("Age"), Some(2.0));
        assert_eq!(profiles[1].features[1].median, 15.0);
        assert_eq!(profiles[1].mean_of("Missing"), None);
    }

    #[test]
    fn test_spending_labels() {
        // One cluster per row, income and spending ranks all distinct.
        let x = array![
            [5.0, 5.0],
            [4.0, 0.0],
            [0.0, 4.0],
            [1.0, 1.0],
            [2.0, 3.0],
            [3.0, 2.0],
        ];
        let labels = array![0, 1, 2, 3, 4, 5];
        let feature_names = names(&["AnnualIncome", "SpendingScore"]);
        let roles = SemanticRoles::resolve(&feature_names);
        let profiles = profile_clusters(&x, &feature_names, roles, &labels).unwrap();
        let labels: Vec<&str> = profiles.iter().map(|p| p.label.as_str()).collect();

        assert_eq!(
            labels,
            vec![
                "Premium High Spenders",
                "Affluent Savers",
                "Budget Splurgers",
                "Careful Shoppers",
                "Average Customers",
                "Average Customers",
            ]
        );
        assert_eq!(auto_label(&profiles, roles), auto_label(&profiles, roles));
    }

    #[test]
    fn test_active_shoppers() {
        assert_eq!(spend_label(0.5, 0.8), "Active Shoppers");
        assert_eq!(spend_label(0.5, 0.5), "Average Customers");
        assert_eq!(spend_label(0.8, 0.5), "Average Customers");
    }

    #[test]
    fn test_size_labels_without_roles() {
        let mut x = Array2::zeros((20, 1));
        x[[0, 0]] = 1.0;
        let mut labels = Array1::from_elem(20, 0_i64);
        labels[0] = 1;
        labels.slice_mut(ndarray::s![1..4]).fill(2);
        let feature_names = names(&["Age"]);
        let profiles =
            profile_clusters(&x, &feature_names, SemanticRoles::default(), &labels).unwrap();

        assert_eq!(profiles[0].label, "Mainstream Segment");
        assert_eq!(profiles[1].label, "Niche Segment");
        assert_eq!(profiles[2].label, "Segment C");
    }

    #[test]
    fn test_segment_letter() {
        assert_eq!(segment_letter(0), "A");
        assert_eq!(segment_letter(1), "B");
        assert_eq!(segment_letter(25), "Z");
        assert_eq!(segment_letter(26), "AA");
        assert_eq!(segment_letter(27), "AB");
    }

    #[test]
    fn test_label_assignments() {
        let x = array![[0.0], [1.0], [2.0]];
        let labels = array![0, NOISE, 0];
        let profiles =
            profile_clusters(&x, &names(&["Age"]), SemanticRoles::default(), &labels).unwrap();
        assert_eq!(
            label_assignments(&labels, &profiles),
            vec!["Mainstream Segment", NOISE_LABEL, "Mainstream Segment"]
        );
    }

    #[test]
    fn test_profile_shape_errors() {
        let x = array![[0.0], [1.0]];
        let roles = SemanticRoles::default();
        assert!(profile_clusters(&x, &names(&["Age"]), roles, &array![0]).is_err());
        assert!(profile_clusters(&x, &names(&["Age", "Income"]), roles, &array![0, 0]).is_err());
        let all_noise =
            profile_clusters(&x, &names(&["Age"]), roles, &array![NOISE, NOISE]).unwrap();
        assert!(all_noise.is_empty());
    }
}
