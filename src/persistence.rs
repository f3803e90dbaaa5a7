//! Versioned JSON blobs for fitted preprocessing and segmentation state

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::model::SegmentationModel;
use crate::preprocess::Preprocessor;

/// Version written into every blob; older or newer blobs are rejected
pub const FORMAT_VERSION: u32 = 1;

/// Which fitted state a blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    Preprocessor,
    Segmentation,
}

/// Fitted state that can be stored as a blob
pub trait Persisted: Serialize + DeserializeOwned {
    const KIND: BlobKind;
}

impl Persisted for Preprocessor {
    const KIND: BlobKind = BlobKind::Preprocessor;
}

impl Persisted for SegmentationModel {
    const KIND: BlobKind = BlobKind::Segmentation;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    kind: BlobKind,
    fitted_at: DateTime<Utc>,
    state: T,
}

/// Metadata of a stored blob
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub kind: BlobKind,
    pub fitted_at: DateTime<Utc>,
}

/// Serialize `state` into a self-describing blob
pub fn to_blob<T: Persisted>(state: &T) -> crate::Result<Vec<u8>> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        kind: T::KIND,
        fitted_at: Utc::now(),
        state,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decode a blob written by [`to_blob`], checking its kind and version
pub fn from_blob<T: Persisted>(bytes: &[u8]) -> crate::Result<T> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(bytes)?;
    open_envelope(envelope).map(|(state, _)| state)
}

/// Write `state` to `path`, replacing any previous blob
pub fn save<T: Persisted>(state: &T, path: impl AsRef<Path>) -> crate::Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&to_blob(state)?)?;
    writer.flush()?;
    debug!(kind = ?T::KIND, path = %path.display(), "saved fitted state");
    Ok(())
}

/// Read a blob from `path`
pub fn load<T: Persisted>(path: impl AsRef<Path>) -> crate::Result<T> {
    load_with_info(path).map(|(state, _)| state)
}

/// Read a blob from `path` together with its metadata
pub fn load_with_info<T: Persisted>(path: impl AsRef<Path>) -> crate::Result<(T, BlobInfo)> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let envelope: Envelope<serde_json::Value> = serde_json::from_reader(reader)?;
    let loaded = open_envelope(envelope)?;
    debug!(
        kind = ?T::KIND,
        path = %path.display(),
        fitted_at = %loaded.1.fitted_at,
        "loaded fitted state"
    );
    Ok(loaded)
}

fn open_envelope<T: Persisted>(
    envelope: Envelope<serde_json::Value>,
) -> crate::Result<(T, BlobInfo)> {
    if envelope.kind != T::KIND {
        return Err(Error::invalid(format!(
            "expected a {:?} blob, found {:?}",
            T::KIND,
            envelope.kind
        )));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(Error::invalid(format!(
            "unsupported blob format version {} (expected {})",
            envelope.format_version, FORMAT_VERSION
        )));
    }

    let state = serde_json::from_value(envelope.state)?;
    Ok((
        state,
        BlobInfo {
            kind: envelope.kind,
            fitted_at: envelope.fitted_at,
        },
    ))
}

/// Whether a preprocessor and a model were fitted on the same feature columns
///
/// A mismatch is logged, not rejected; prediction still fails on a column count mismatch.
pub fn check_pairing(preprocessor: &Preprocessor, model: &SegmentationModel) -> bool {
    let paired = model.matches_features(preprocessor.feature_names());
    if !paired {
        warn!(
            preprocessor = ?preprocessor.feature_names(),
            model = ?model.feature_names(),
            "preprocessor and segmentation model were fitted on different features"
        );
    }
    paired
}
