//! Agglomerative clustering with Lance-Williams linkage updates
//!
//! Merges are found with the nearest-neighbour chain algorithm, which is exact
//! for every supported linkage, then replayed smallest-first until the
//! requested number of clusters remains.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Linkage criterion between two clusters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimize the growth of within-cluster variance
    #[default]
    Ward,
    /// Largest pairwise distance
    Complete,
    /// Mean pairwise distance
    Average,
    /// Smallest pairwise distance
    Single,
}

impl FromStr for Linkage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ward" => Ok(Linkage::Ward),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            "single" => Ok(Linkage::Single),
            other => Err(Error::invalid(format!("unknown linkage criterion '{}'", other))),
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Linkage::Ward => "ward",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
            Linkage::Single => "single",
        };
        f.write_str(name)
    }
}

/// One merge step: the slots joined and their linkage distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
}

/// Cluster `features` bottom-up into exactly `n_clusters` groups.
///
/// Labels are dense in `0..n_clusters`, numbered by first appearance in row order.
pub fn agglomerate(
    features: &Array2<f64>,
    n_clusters: usize,
    linkage: Linkage,
) -> crate::Result<Array1<usize>> {
    let n = features.nrows();
    if n_clusters == 0 || n_clusters > n {
        return Err(Error::invalid(format!(
            "n_clusters must be between 1 and the number of samples ({}), got {}",
            n, n_clusters
        )));
    }

    let mut merges = merge_sequence(features, linkage);
    merges.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut parent: Vec<usize> = (0..n).collect();
    for merge in merges.iter().take(n - n_clusters) {
        let a = find(&mut parent, merge.left);
        let b = find(&mut parent, merge.right);
        if a != b {
            parent[b] = a;
        }
    }

    let mut dense: Vec<Option<usize>> = vec![None; n];
    let mut next = 0;
    let mut labels = Array1::zeros(n);
    for i in 0..n {
        let root = find(&mut parent, i);
        let label = *dense[root].get_or_insert_with(|| {
            next += 1;
            next - 1
        });
        labels[i] = label;
    }

    if next != n_clusters {
        return Err(Error::Numerical(format!(
            "agglomeration produced {} clusters instead of {}",
            next, n_clusters
        )));
    }
    Ok(labels)
}

/// Full merge history of `features` under `linkage`, in discovery order.
pub fn merge_sequence(features: &Array2<f64>, linkage: Linkage) -> Vec<Merge> {
    let n = features.nrows();
    let mut dist = pairwise(features, linkage);
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for _ in 1..n {
        if chain.is_empty() {
            if let Some(start) = active.iter().position(|&a| a) {
                chain.push(start);
            }
        }

        // Grow the chain until its last two slots are reciprocal nearest neighbours.
        let (a, b, d) = loop {
            let a = chain[chain.len() - 1];
            let previous = chain.len().checked_sub(2).map(|i| chain[i]);
            let mut best = previous;
            let mut best_distance = previous.map_or(f64::INFINITY, |p| dist[[a, p]]);
            for x in 0..n {
                if x != a && active[x] && dist[[a, x]] < best_distance {
                    best = Some(x);
                    best_distance = dist[[a, x]];
                }
            }
            let Some(b) = best else {
                return merges;
            };
            if Some(b) == previous {
                chain.truncate(chain.len() - 2);
                break (a.min(b), a.max(b), best_distance);
            }
            chain.push(b);
        };

        for k in 0..n {
            if k == a || k == b || !active[k] {
                continue;
            }
            let updated = lance_williams(
                linkage,
                dist[[k, a]],
                dist[[k, b]],
                d,
                size[a],
                size[b],
                size[k],
            );
            dist[[k, a]] = updated;
            dist[[a, k]] = updated;
        }
        active[b] = false;
        size[a] += size[b];

        merges.push(Merge {
            left: a,
            right: b,
            distance: d,
        });
    }

    merges
}

/// Distance between `k` and the union of `i` and `j`.
///
/// Ward operates on squared Euclidean distances, the others on plain distances.
fn lance_williams(
    linkage: Linkage,
    d_ki: f64,
    d_kj: f64,
    d_ij: f64,
    n_i: usize,
    n_j: usize,
    n_k: usize,
) -> f64 {
    let (n_i, n_j, n_k) = (n_i as f64, n_j as f64, n_k as f64);
    match linkage {
        Linkage::Single => d_ki.min(d_kj),
        Linkage::Complete => d_ki.max(d_kj),
        Linkage::Average => (n_i * d_ki + n_j * d_kj) / (n_i + n_j),
        Linkage::Ward => {
            ((n_i + n_k) * d_ki + (n_j + n_k) * d_kj - n_k * d_ij) / (n_i + n_j + n_k)
        }
    }
}

fn pairwise(features: &Array2<f64>, linkage: Linkage) -> Array2<f64> {
    let n = features.nrows();
    let mut dist = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let sq = squared_distance(features.row(i), features.row(j));
            let d = match linkage {
                Linkage::Ward => sq,
                _ => sq.sqrt(),
            };
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    dist
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn three_groups() -> Array2<f64> {
        array![
            [1.0, 1.0],
            [1.1, 1.1],
            [1.2, 1.0],
            [5.0, 5.0],
            [5.1, 5.1],
            [5.0, 5.2],
            [3.0, 3.0],
            [3.1, 3.0],
            [3.0, 3.1],
        ]
    }

    #[test]
    fn test_agglomerate_recovers_groups() {
        let x = three_groups();
        for linkage in [Linkage::Ward, Linkage::Complete, Linkage::Average, Linkage::Single] {
            let labels = agglomerate(&x, 3, linkage).unwrap();
            assert_eq!(labels.to_vec(), vec![0, 0, 0, 1, 1, 1, 2, 2, 2], "{}", linkage);
        }
    }

    #[test]
    fn test_agglomerate_extremes() {
        let x = three_groups();
        let one = agglomerate(&x, 1, Linkage::Ward).unwrap();
        assert!(one.iter().all(|&l| l == 0));

        let all = agglomerate(&x, 9, Linkage::Average).unwrap();
        assert_eq!(all.to_vec(), (0..9).collect::<Vec<_>>());

        assert!(agglomerate(&x, 0, Linkage::Ward).is_err());
        assert!(agglomerate(&x, 10, Linkage::Ward).is_err());
    }

    #[test]
    fn test_merge_sequence_length_and_order() {
        let x = three_groups();
        let merges = merge_sequence(&x, Linkage::Single);
        assert_eq!(merges.len(), 8);

        let mut distances: Vec<f64> = merges.iter().map(|m| m.distance).collect();
        distances.sort_by(f64::total_cmp);
        // The two largest merges join the middle group to the outer groups.
        assert!((distances[6] - (1.9_f64.powi(2) * 2.0).sqrt()).abs() < 1e-9);
        assert!((distances[7] - (1.9_f64.powi(2) + 2.0_f64.powi(2)).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_linkage_from_str() {
        assert_eq!("Ward".parse::<Linkage>().unwrap(), Linkage::Ward);
        assert_eq!("single".parse::<Linkage>().unwrap(), Linkage::Single);
        assert!("centroid".parse::<Linkage>().is_err());
        assert_eq!(Linkage::default().to_string(), "ward");
    }
}
