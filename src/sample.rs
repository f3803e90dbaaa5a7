//! Seeded synthetic data: Mall-Customers style records and Gaussian blobs

use ndarray::{Array2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::data::{Record, Value};

/// Generate `n` customers with `CustomerID`, `Gender`, `Age`, `AnnualIncome`
/// (thousands) and `SpendingScore`.
///
/// High earners (income above 80) spend 60-99, low earners (below 40) spend 1-39.
pub fn mall_customers(n: usize, seed: u64) -> Vec<Record> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    (1..=n)
        .map(|customer_id| {
            let gender = if rng.gen_bool(0.5) { "Male" } else { "Female" };
            let age: i64 = rng.gen_range(18..70);
            let income: i64 = rng.gen_range(15..140);
            let spending: i64 = if income > 80 {
                rng.gen_range(60..100)
            } else if income < 40 {
                rng.gen_range(1..40)
            } else {
                rng.gen_range(1..100)
            };

            let mut record = Record::new();
            record.insert("CustomerID".to_string(), Value::from(customer_id as i64));
            record.insert("Gender".to_string(), Value::from(gender));
            record.insert("Age".to_string(), Value::from(age));
            record.insert("AnnualIncome".to_string(), Value::from(income));
            record.insert("SpendingScore".to_string(), Value::from(spending));
            record
        })
        .collect()
}

/// Sample `n_per_center` points around each row of `centers` with isotropic
/// Gaussian noise.
///
/// Returns the points, grouped by center, and the index of the center each came from.
pub fn gaussian_blobs(
    centers: &Array2<f64>,
    n_per_center: usize,
    std_dev: f64,
    seed: u64,
) -> (Array2<f64>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_features = centers.ncols();
    let mut points = Array2::zeros((centers.nrows() * n_per_center, n_features));
    let mut truth = Vec::with_capacity(points.nrows());

    for (row, mut point) in points.axis_iter_mut(Axis(0)).enumerate() {
        let center = row / n_per_center.max(1);
        for (value, &c) in point.iter_mut().zip(centers.row(center).iter()) {
            let z: f64 = rng.sample(StandardNormal);
            *value = c + std_dev * z;
        }
        truth.push(center);
    }

    (points, truth)
}
