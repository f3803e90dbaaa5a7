//! Feature preparation: imputation, one-hot encoding, skew correction and standardization
//!
//! [`prepare_for_clustering`] fits every step on a training batch and returns a
//! [`Preprocessor`] holding the fitted parameters. [`Preprocessor::transform`]
//! replays those parameters on new records without refitting.

use std::collections::{BTreeMap, BTreeSet};

use linfa::traits::{Fit, Transformer};
use linfa::Dataset;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{records_to_frame, Record, Value};
use crate::error::Error;

/// Identifier column excluded from features by default
pub const DEFAULT_ID_COLUMN: &str = "CustomerID";

/// Skewness magnitude above which a non-negative column is log-transformed
pub const DEFAULT_SKEW_THRESHOLD: f64 = 1.0;

/// Row position column carried through every frame so a frame never loses its height
const ROW_INDEX: &str = "__row";
/// Count column of the mode aggregation
const LEVEL_COUNT: &str = "__level_count";

/// Settings for the preparation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Column carrying the customer identifier
    pub id_column: String,
    /// Columns dropped before any other step (identifier and prior cluster output)
    pub exclude_columns: Vec<String>,
    /// When set, numeric columns are skew-corrected with this threshold
    pub skew_threshold: Option<f64>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            id_column: DEFAULT_ID_COLUMN.to_string(),
            exclude_columns: vec![
                DEFAULT_ID_COLUMN.to_string(),
                "ClusterID".to_string(),
                "ClusterLabel".to_string(),
            ],
            skew_threshold: None,
        }
    }
}

/// Values used to fill gaps, per column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillValues {
    pub numeric: BTreeMap<String, f64>,
    pub categorical: BTreeMap<String, String>,
}

/// One-hot levels kept for a categorical field, reference level already dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub field: String,
    pub levels: Vec<String>,
}

impl CategoricalEncoding {
    pub fn column_name(&self, level: &str) -> String {
        format!("{}_{}", self.field, level)
    }
}

/// Indices of the feature columns that play a known semantic role
///
/// Resolved once from the feature names and consumed by cluster labeling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticRoles {
    pub income: Option<usize>,
    pub spending: Option<usize>,
}

impl SemanticRoles {
    /// First feature containing `income`, first containing `spending` or `monetary`
    pub fn resolve(feature_names: &[String]) -> Self {
        let find = |needles: &[&str]| {
            feature_names.iter().position(|name| {
                let lower = name.to_lowercase();
                needles.iter().any(|needle| lower.contains(needle))
            })
        };
        Self {
            income: find(&["income"]),
            spending: find(&["spending", "monetary"]),
        }
    }

    pub fn income_and_spending(&self) -> Option<(usize, usize)> {
        self.income.zip(self.spending)
    }
}

/// Numeric feature matrix produced by preparation
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Standardized features (n_records, n_features)
    pub features: Array2<f64>,
    /// Column names of `features`, in order
    pub feature_names: Vec<String>,
    /// Identifier of each row, `None` when the record has none
    pub customer_ids: Vec<Option<Value>>,
    pub roles: SemanticRoles,
}

impl PreparedData {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }
}

/// Fitted preparation state, reused to transform new records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    config: PreprocessConfig,
    fill_values: FillValues,
    encodings: Vec<CategoricalEncoding>,
    log_transformed: Vec<String>,
    feature_names: Vec<String>,
    scaler: LinearScaler<f64>,
    roles: SemanticRoles,
}

impl Preprocessor {
    /// Fit every preparation step on `records` and transform them.
    pub fn fit_transform(
        records: &[Record],
        config: &PreprocessConfig,
    ) -> crate::Result<(Self, PreparedData)> {
        let (mut df, customer_ids) = split_identifiers(records, config)?;

        let fill_values = impute_missing(&mut df)?;
        let log_transformed = match config.skew_threshold {
            Some(threshold) => log_transform_skewed(&mut df, threshold)?,
            None => Vec::new(),
        };
        let encodings = encode_categorical(&mut df, &config.id_column)?;
        let (features, feature_names, scaler) = standardize(&df)?;
        let roles = SemanticRoles::resolve(&feature_names);

        info!(
            samples = features.nrows(),
            features = feature_names.len(),
            encoded_fields = encodings.len(),
            log_transformed = log_transformed.len(),
            "prepared features for clustering"
        );

        let preprocessor = Self {
            config: config.clone(),
            fill_values,
            encodings,
            log_transformed,
            feature_names: feature_names.clone(),
            scaler,
            roles,
        };
        let prepared = PreparedData {
            features,
            feature_names,
            customer_ids,
            roles,
        };
        Ok((preprocessor, prepared))
    }

    /// Transform new records with the fitted parameters.
    ///
    /// Gaps are filled with the training fill values; categories unseen during
    /// fitting encode as all zeros.
    pub fn transform(&self, records: &[Record]) -> crate::Result<PreparedData> {
        let (mut df, customer_ids) = split_identifiers(records, &self.config)?;

        apply_fill_values(&mut df, &self.fill_values)?;
        apply_log_transform(&mut df, &self.log_transformed)?;
        apply_encoding(&mut df, &self.encodings)?;

        let raw = feature_matrix(&df, &self.feature_names)?;
        let features = scale(&self.scaler, raw)?;
        debug!(samples = features.nrows(), "transformed records with fitted preprocessor");

        Ok(PreparedData {
            features,
            feature_names: self.feature_names.clone(),
            customer_ids,
            roles: self.roles,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Fitted standard scaler; a value maps to `(x - offset) * scale`
    pub fn scaler(&self) -> &LinearScaler<f64> {
        &self.scaler
    }

    pub fn roles(&self) -> SemanticRoles {
        self.roles
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn encodings(&self) -> &[CategoricalEncoding] {
        &self.encodings
    }

    pub fn fill_values(&self) -> &FillValues {
        &self.fill_values
    }

    pub fn log_transformed(&self) -> &[String] {
        &self.log_transformed
    }
}

/// Full preparation pipeline: exclusion, imputation, encoding and standardization
///
/// # Arguments
/// * `records` - Raw customer records, one per row
/// * `config` - Identifier column, excluded columns and optional skew threshold
///
/// # Returns
/// * The fitted [`Preprocessor`] and the [`PreparedData`] holding the
///   standardized matrix, its feature names and row-aligned identifiers
pub fn prepare_for_clustering(
    records: &[Record],
    config: &PreprocessConfig,
) -> crate::Result<(Preprocessor, PreparedData)> {
    Preprocessor::fit_transform(records, config)
}

/// Collect row identifiers and build the frame without the excluded columns
fn split_identifiers(
    records: &[Record],
    config: &PreprocessConfig,
) -> crate::Result<(DataFrame, Vec<Option<Value>>)> {
    if records.is_empty() {
        return Err(Error::invalid("record set is empty"));
    }

    let customer_ids = records
        .iter()
        .map(|r| r.get(&config.id_column).filter(|v| !v.is_missing()).cloned())
        .collect();

    let frame = records_to_frame(records)?;
    let rows: Vec<u32> = (0..records.len() as u32).collect();
    let mut columns = vec![Series::new(ROW_INDEX, rows)];
    columns.extend(
        frame
            .get_columns()
            .iter()
            .filter(|s| !config.exclude_columns.iter().any(|name| name == s.name()))
            .cloned(),
    );
    Ok((DataFrame::new(columns)?, customer_ids))
}

/// Record columns of `df`, without the row position column
fn fields(df: &DataFrame) -> impl Iterator<Item = &Series> {
    df.get_columns().iter().filter(|s| s.name() != ROW_INDEX)
}

/// Fill numeric gaps with the column median and categorical gaps with the mode.
///
/// Columns with no observed values are left untouched. Returns the fill value
/// of every column that has at least one observation.
pub fn impute_missing(df: &mut DataFrame) -> crate::Result<FillValues> {
    let mut fills = FillValues::default();

    for series in fields(df) {
        let name = series.name();
        let missing = series.null_count();
        if series.dtype().is_numeric() {
            let Some(fill) = series.median() else {
                warn!(column = name, "numeric column has no observed values");
                continue;
            };
            if missing > 0 {
                debug!(column = name, missing, fill, "imputing numeric column with median");
            }
            fills.numeric.insert(name.to_string(), fill);
        } else {
            let Some(fill) = column_mode(series)? else {
                warn!(column = name, "categorical column has no observed values");
                continue;
            };
            if missing > 0 {
                debug!(column = name, missing, fill = %fill, "imputing categorical column");
            }
            fills.categorical.insert(name.to_string(), fill);
        }
    }

    apply_fill_values(df, &fills)?;
    Ok(fills)
}

/// Most frequent observed level; ties go to the smallest level
fn column_mode(series: &Series) -> crate::Result<Option<String>> {
    let name = series.name();
    let counts = series
        .clone()
        .into_frame()
        .lazy()
        .filter(col(name).is_not_null())
        .group_by([col(name)])
        .agg([len().alias(LEVEL_COUNT)])
        .sort_by_exprs(
            [col(LEVEL_COUNT), col(name)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .limit(1)
        .collect()?;

    let level = counts
        .column(name)?
        .cast(&DataType::String)?
        .str()?
        .get(0)
        .map(str::to_string);
    Ok(level)
}

/// Whether `name` is present in `df`, checking it still has the fitted kind.
///
/// An all-null column is accepted for either kind and cast on use.
fn column_present(df: &DataFrame, name: &str, numeric: bool) -> crate::Result<bool> {
    let Ok(series) = df.column(name) else {
        return Ok(false);
    };
    let all_null = series.null_count() == series.len();
    if series.dtype().is_numeric() != numeric && !all_null {
        let kind = |numeric: bool| if numeric { "numeric" } else { "categorical" };
        return Err(Error::invalid(format!(
            "field '{}' was {} when fitted but holds {} values",
            name,
            kind(numeric),
            kind(!numeric)
        )));
    }
    Ok(true)
}

/// Fill gaps from previously fitted values, adding absent columns.
pub fn apply_fill_values(df: &mut DataFrame, fills: &FillValues) -> crate::Result<()> {
    let mut exprs = Vec::with_capacity(fills.numeric.len() + fills.categorical.len());

    for (name, &fill) in &fills.numeric {
        let expr = if column_present(df, name, true)? {
            col(name).cast(DataType::Float64).fill_null(lit(fill))
        } else {
            lit(fill).alias(name)
        };
        exprs.push(expr);
    }
    for (name, fill) in &fills.categorical {
        let expr = if column_present(df, name, false)? {
            col(name).cast(DataType::String).fill_null(lit(fill.clone()))
        } else {
            lit(fill.clone()).alias(name)
        };
        exprs.push(expr);
    }

    if !exprs.is_empty() {
        *df = std::mem::take(df).lazy().with_columns(exprs).collect()?;
    }
    Ok(())
}

/// One-hot encode every categorical column except `id_column`.
///
/// Levels are sorted and the first is dropped as the reference. Encoded
/// columns are appended as `<field>_<level>` with 0.0/1.0 values.
pub fn encode_categorical(
    df: &mut DataFrame,
    id_column: &str,
) -> crate::Result<Vec<CategoricalEncoding>> {
    let mut encodings = Vec::new();

    for series in fields(df).filter(|s| !s.dtype().is_numeric()) {
        if series.name() == id_column {
            continue;
        }
        let observed: BTreeSet<&str> = series.str()?.into_iter().flatten().collect();
        let levels: Vec<String> = observed.into_iter().skip(1).map(str::to_string).collect();
        debug!(field = series.name(), levels = levels.len(), "one-hot encoding field");
        encodings.push(CategoricalEncoding {
            field: series.name().to_string(),
            levels,
        });
    }

    apply_encoding(df, &encodings)?;
    Ok(encodings)
}

/// Replace encoded fields with their fitted one-hot columns.
pub fn apply_encoding(df: &mut DataFrame, encodings: &[CategoricalEncoding]) -> crate::Result<()> {
    if encodings.is_empty() {
        return Ok(());
    }

    let mut exprs = Vec::new();
    let mut encoded = Vec::new();
    for encoding in encodings {
        let present = column_present(df, &encoding.field, false)?;
        for level in &encoding.levels {
            let indicator = if present {
                when(col(&encoding.field).cast(DataType::String).eq(lit(level.as_str())))
                    .then(lit(1.0))
                    .otherwise(lit(0.0))
            } else {
                lit(0.0)
            };
            exprs.push(indicator.alias(&encoding.column_name(level)));
        }
        if present {
            encoded.push(encoding.field.as_str());
        }
    }

    let mut out = std::mem::take(df).lazy().with_columns(exprs).collect()?;
    for field in encoded {
        out.drop_in_place(field)?;
    }
    *df = out;
    Ok(())
}

/// Apply `ln(1 + x)` to non-negative numeric columns whose skewness exceeds `threshold`.
///
/// Skewness is the adjusted Fisher-Pearson coefficient; columns with gaps or
/// fewer than three rows are left alone. Returns the transformed column names.
pub fn log_transform_skewed(df: &mut DataFrame, threshold: f64) -> crate::Result<Vec<String>> {
    let mut transformed = Vec::new();

    for series in fields(df).filter(|s| s.dtype().is_numeric()) {
        if series.null_count() > 0 || series.len() < 3 {
            continue;
        }
        let values = series.cast(&DataType::Float64)?;
        if values.f64()?.min().is_some_and(|min| min < 0.0) {
            continue;
        }
        match values.skew(false)? {
            Some(skew) if skew.is_finite() && skew.abs() > threshold => {
                debug!(column = series.name(), skew, "log-transforming skewed column");
                transformed.push(series.name().to_string());
            }
            _ => {}
        }
    }

    apply_log_transform(df, &transformed)?;
    Ok(transformed)
}

/// Re-apply a fitted log transform to the named columns.
pub fn apply_log_transform(df: &mut DataFrame, columns: &[String]) -> crate::Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    for name in columns {
        if !column_present(df, name, true)? {
            return Err(Error::invalid(format!("missing field '{}'", name)));
        }
    }

    let exprs: Vec<Expr> = columns
        .iter()
        .map(|name| col(name).cast(DataType::Float64).log1p())
        .collect();
    *df = std::mem::take(df).lazy().with_columns(exprs).collect()?;
    Ok(())
}

/// Fit and apply standardization over the auto-detected feature columns.
///
/// Features are all numeric columns whose name does not look like an identifier.
pub fn standardize(
    df: &DataFrame,
) -> crate::Result<(Array2<f64>, Vec<String>, LinearScaler<f64>)> {
    let feature_names: Vec<String> = fields(df)
        .filter(|s| s.dtype().is_numeric())
        .map(|s| s.name().to_string())
        .filter(|name| !is_identifier_like(name))
        .collect();

    if feature_names.is_empty() {
        return Err(Error::invalid("no usable feature columns after exclusion"));
    }

    let raw = feature_matrix(df, &feature_names)?;
    let dataset = Dataset::new(raw.clone(), Array1::<usize>::zeros(raw.nrows()));
    let scaler = LinearScaler::standard()
        .fit(&dataset)
        .map_err(|e| Error::backend("standard scaling", e))?;
    let features = scale(&scaler, raw)?;
    Ok((features, feature_names, scaler))
}

/// Standardize `raw`, rejecting any non-finite result
fn scale(scaler: &LinearScaler<f64>, raw: Array2<f64>) -> crate::Result<Array2<f64>> {
    if raw.ncols() != scaler.offsets().len() {
        return Err(Error::invalid(format!(
            "scaler was fitted on {} features, got {}",
            scaler.offsets().len(),
            raw.ncols()
        )));
    }
    let features = scaler.transform(raw);
    if features.iter().any(|v| !v.is_finite()) {
        return Err(Error::Numerical("standardization produced non-finite values".into()));
    }
    Ok(features)
}

/// Gather the named numeric columns into a matrix; every cell must be finite.
fn feature_matrix(df: &DataFrame, feature_names: &[String]) -> crate::Result<Array2<f64>> {
    let mut matrix = Array2::zeros((df.height(), feature_names.len()));

    for (j, name) in feature_names.iter().enumerate() {
        let series = df
            .column(name)
            .map_err(|_| Error::invalid(format!("missing feature column '{}'", name)))?;
        if !series.dtype().is_numeric() {
            return Err(Error::invalid(format!("feature '{}' is not numeric", name)));
        }
        let values = series.cast(&DataType::Float64)?;
        for (i, value) in values.f64()?.into_iter().enumerate() {
            match value {
                Some(v) if v.is_finite() => matrix[[i, j]] = v,
                Some(v) => {
                    return Err(Error::Numerical(format!(
                        "feature '{}' has non-finite value {} in row {}",
                        name, v, i
                    )))
                }
                None => {
                    return Err(Error::Numerical(format!(
                        "feature '{}' has no value in row {}",
                        name, i
                    )))
                }
            }
        }
    }

    Ok(matrix)
}

/// Whether a column name has an `ID` word, as in `CustomerID`, `store_id` or `orderId`
pub fn is_identifier_like(name: &str) -> bool {
    name_words(name).iter().any(|word| word.eq_ignore_ascii_case("id"))
}

/// Split on separators and camel-case boundaries
fn name_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(prev) = current.chars().last() {
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = c.is_uppercase()
                && (prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_lower));
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn customers() -> Vec<Record> {
        vec![
            record(&[
                ("CustomerID", 1.0.into()),
                ("Gender", "Male".into()),
                ("Age", 19.0.into()),
                ("AnnualIncome", 15.0.into()),
                ("SpendingScore", 39.0.into()),
            ]),
            record(&[
                ("CustomerID", 2.0.into()),
                ("Gender", "Female".into()),
                ("Age", 21.0.into()),
                ("AnnualIncome", 15.0.into()),
                ("SpendingScore", 81.0.into()),
            ]),
            record(&[
                ("CustomerID", 3.0.into()),
                ("Gender", "Female".into()),
                ("Age", Value::Missing),
                ("AnnualIncome", 16.0.into()),
                ("SpendingScore", 6.0.into()),
            ]),
            record(&[
                ("CustomerID", 4.0.into()),
                ("Gender", Value::Missing),
                ("Age", 23.0.into()),
                ("AnnualIncome", 16.0.into()),
                ("SpendingScore", 77.0.into()),
            ]),
        ]
    }

    fn frame(records: &[Record]) -> DataFrame {
        split_identifiers(records, &PreprocessConfig::default()).unwrap().0
    }

    fn strings(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    fn numbers(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_impute_missing() {
        let mut df = frame(&customers());
        assert!(df.column("CustomerID").is_err());

        let fills = impute_missing(&mut df).unwrap();
        assert_eq!(fills.numeric["Age"], 21.0);
        assert_eq!(fills.categorical["Gender"], "Female");
        assert_eq!(df.column("Age").unwrap().null_count(), 0);
        assert_eq!(numbers(&df, "Age")[2], Some(21.0));
        assert_eq!(
            strings(&df, "Gender"),
            vec![
                Some("Male".to_string()),
                Some("Female".to_string()),
                Some("Female".to_string()),
                Some("Female".to_string()),
            ]
        );
    }

    #[test]
    fn test_mode_ties_take_smallest_level() {
        let records: Vec<Record> = ["b", "a", "b", "a", "c"]
            .iter()
            .map(|&tier| record(&[("Tier", tier.into())]))
            .chain(std::iter::once(record(&[("Tier", Value::Missing)])))
            .collect();
        let mut df = frame(&records);
        let fills = impute_missing(&mut df).unwrap();

        assert_eq!(fills.categorical["Tier"], "a");
        assert_eq!(strings(&df, "Tier")[5], Some("a".to_string()));
    }

    #[test]
    fn test_impute_tolerates_empty_column() {
        let records = vec![
            record(&[("Age", Value::Missing), ("Score", 1.0.into())]),
            record(&[("Age", Value::Missing), ("Score", 2.0.into())]),
        ];
        let mut df = frame(&records);
        let fills = impute_missing(&mut df).unwrap();

        assert!(!fills.numeric.contains_key("Age"));
        assert_eq!(fills.numeric["Score"], 1.5);
        assert_eq!(df.column("Age").unwrap().null_count(), 2);
    }

    #[test]
    fn test_fill_values_add_absent_columns() {
        let mut fills = FillValues::default();
        fills.numeric.insert("Age".to_string(), 40.0);
        fills.categorical.insert("Gender".to_string(), "Female".to_string());

        let mut df = frame(&[record(&[("CustomerID", 9.0.into())]), record(&[])]);
        apply_fill_values(&mut df, &fills).unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(numbers(&df, "Age"), vec![Some(40.0), Some(40.0)]);
        assert_eq!(strings(&df, "Gender")[1], Some("Female".to_string()));
    }

    #[test]
    fn test_encode_categorical_drops_reference_level() {
        let records = vec![
            record(&[("Tier", "gold".into()), ("CustomerID", "a".into())]),
            record(&[("Tier", "bronze".into()), ("CustomerID", "b".into())]),
            record(&[("Tier", "silver".into()), ("CustomerID", "c".into())]),
        ];
        let config = PreprocessConfig {
            exclude_columns: Vec::new(),
            ..PreprocessConfig::default()
        };
        let mut df = split_identifiers(&records, &config).unwrap().0;
        let encodings = encode_categorical(&mut df, "CustomerID").unwrap();

        assert_eq!(encodings.len(), 1);
        assert_eq!(encodings[0].levels, vec!["gold".to_string(), "silver".to_string()]);
        assert!(df.column("Tier").is_err());
        assert!(df.column("CustomerID").is_ok());
        assert_eq!(numbers(&df, "Tier_gold"), vec![Some(1.0), Some(0.0), Some(0.0)]);
        assert_eq!(numbers(&df, "Tier_silver"), vec![Some(0.0), Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_log_transform_skewed() {
        let records: Vec<Record> = [1.0, 1.0, 1.0, 2.0, 100.0]
            .iter()
            .zip([-1.0, 1.0, -1.0, 1.0, 100.0])
            .map(|(&spend, shifted)| {
                record(&[("Spend", spend.into()), ("Shifted", shifted.into())])
            })
            .collect();
        let mut df = frame(&records);
        let transformed = log_transform_skewed(&mut df, DEFAULT_SKEW_THRESHOLD).unwrap();

        assert_eq!(transformed, vec!["Spend".to_string()]);
        assert_abs_diff_eq!(numbers(&df, "Spend")[4].unwrap(), 101.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(numbers(&df, "Shifted")[4], Some(100.0));
    }

    #[test]
    fn test_symmetric_column_is_not_log_transformed() {
        let records: Vec<Record> = [1.0, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .map(|&v| record(&[("Visits", v.into()), ("Flat", 3.0.into())]))
            .collect();
        let mut df = frame(&records);
        assert!(log_transform_skewed(&mut df, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_identifier_detection() {
        assert!(is_identifier_like("CustomerID"));
        assert!(is_identifier_like("customer_id"));
        assert!(is_identifier_like("orderId"));
        assert!(is_identifier_like("ID"));
        assert!(is_identifier_like("StoreID_A"));
        assert!(!is_identifier_like("Paid"));
        assert!(!is_identifier_like("Width"));
        assert!(!is_identifier_like("AnnualIncome"));
    }

    #[test]
    fn test_standardize_constant_column() {
        let records: Vec<Record> = [1.0, 2.0, 3.0]
            .iter()
            .map(|&v| record(&[("Score", v.into()), ("Flat", 5.0.into())]))
            .collect();
        let (features, names, scaler) = standardize(&frame(&records)).unwrap();

        assert_eq!(names, vec!["Flat", "Score"]);
        assert_abs_diff_eq!(scaler.offsets()[1], 2.0);
        assert!(features.column(0).iter().all(|&v| v == 0.0));
        assert_abs_diff_eq!(features[[0, 1]], -(1.5_f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_prepare_for_clustering() {
        let records = customers();
        let (preprocessor, prepared) =
            prepare_for_clustering(&records, &PreprocessConfig::default()).unwrap();

        assert_eq!(
            prepared.feature_names,
            vec!["Age", "AnnualIncome", "SpendingScore", "Gender_Male"]
        );
        assert_eq!(prepared.features.shape(), &[4, 4]);
        assert!(prepared.features.iter().all(|v| v.is_finite()));
        assert_eq!(prepared.customer_ids[2], Some(Value::Number(3.0)));
        assert_eq!(prepared.roles.income, Some(1));
        assert_eq!(prepared.roles.spending, Some(2));
        assert_eq!(preprocessor.feature_names(), prepared.feature_names.as_slice());

        for column in prepared.features.columns() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_prepare_without_identifier() {
        let records = vec![
            record(&[("Age", 20.0.into())]),
            record(&[("Age", 40.0.into())]),
        ];
        let (_, prepared) = prepare_for_clustering(&records, &PreprocessConfig::default()).unwrap();
        assert_eq!(prepared.customer_ids, vec![None, None]);
        assert_eq!(prepared.roles, SemanticRoles::default());
    }

    #[test]
    fn test_prepare_rejects_unusable_input() {
        let config = PreprocessConfig::default();
        assert!(matches!(
            prepare_for_clustering(&[], &config),
            Err(Error::InvalidInput(_))
        ));

        let only_ids = vec![record(&[("CustomerID", 1.0.into()), ("StoreId", 7.0.into())])];
        assert!(matches!(
            prepare_for_clustering(&only_ids, &config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_all_missing_column_is_numerical_failure() {
        let records = vec![
            record(&[("Age", 20.0.into()), ("Income", Value::Missing)]),
            record(&[("Age", 40.0.into()), ("Income", Value::Missing)]),
        ];
        assert!(matches!(
            prepare_for_clustering(&records, &PreprocessConfig::default()),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_transform_reuses_fitted_state() {
        let (preprocessor, prepared) =
            prepare_for_clustering(&customers(), &PreprocessConfig::default()).unwrap();

        let replayed = preprocessor.transform(&customers()).unwrap();
        for (a, b) in replayed.features.iter().zip(prepared.features.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }

        // A single record keeps the training layout: the mode fills Gender,
        // an unseen category encodes as zeros and Age falls back to the median.
        let new = vec![
            record(&[("AnnualIncome", 15.5.into()), ("SpendingScore", 50.0.into())]),
            record(&[
                ("Age", 30.0.into()),
                ("Gender", "Other".into()),
                ("AnnualIncome", 15.5.into()),
                ("SpendingScore", 50.0.into()),
            ]),
        ];
        let scored = preprocessor.transform(&new).unwrap();
        assert_eq!(scored.features.shape(), &[2, 4]);

        let scaler = preprocessor.scaler();
        let expected_age = (21.0 - scaler.offsets()[0]) * scaler.scales()[0];
        assert_abs_diff_eq!(scored.features[[0, 0]], expected_age, epsilon = 1e-12);
        let female = (0.0 - scaler.offsets()[3]) * scaler.scales()[3];
        assert_abs_diff_eq!(scored.features[[0, 3]], female, epsilon = 1e-12);
        assert_abs_diff_eq!(scored.features[[1, 3]], female, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_rejects_type_change() {
        let (preprocessor, _) =
            prepare_for_clustering(&customers(), &PreprocessConfig::default()).unwrap();
        let new = vec![record(&[("Age", "old".into())])];
        assert!(matches!(
            preprocessor.transform(&new),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_semantic_roles() {
        let names: Vec<String> = ["Age", "annual_income", "Monetary"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let roles = SemanticRoles::resolve(&names);
        assert_eq!(roles.income_and_spending(), Some((1, 2)));
        assert_eq!(SemanticRoles::resolve(&names[..1]).income_and_spending(), None);
    }
}
