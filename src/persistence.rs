//! JSON persistence of trained models.
//!
//! Models are written with `serde_json`; every loaded model is validated
//! before it is returned, so a hand-edited file cannot produce a GMM with
//! unnormalized weights or an indefinite covariance.

use crate::{
    errors::{GmmError, GmmResult},
    gmm::Gmm,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

fn io_error(operation: String, source: std::io::Error) -> GmmError {
    GmmError::IoError {
        operation,
        source: Some(Arc::new(source)),
    }
}

fn json_error(e: serde_json::Error) -> GmmError {
    GmmError::SerializationError {
        format: "JSON".to_string(),
        reason: e.to_string(),
    }
}

/// Serializes `gmm` to a JSON string.
pub fn to_json(gmm: &Gmm) -> GmmResult<String> {
    serde_json::to_string_pretty(gmm).map_err(json_error)
}

/// Parses and validates a GMM from a JSON string.
pub fn from_json(json: &str) -> GmmResult<Gmm> {
    let gmm: Gmm = serde_json::from_str(json).map_err(json_error)?;
    gmm.validate()?;
    Ok(gmm)
}

/// Writes `gmm` to `path` as JSON.
pub fn save_json<P: AsRef<Path>>(path: P, gmm: &Gmm) -> GmmResult<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| io_error(format!("create {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, gmm).map_err(json_error)?;
    writer
        .flush()
        .map_err(|e| io_error(format!("write {}", path.display()), e))?;
    log::info!("saved {} Gaussians to {}", gmm.n(), path.display());
    Ok(())
}

/// Reads and validates a GMM from a JSON file.
pub fn load_json<P: AsRef<Path>>(path: P) -> GmmResult<Gmm> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| io_error(format!("open {}", path.display()), e))?;
    let gmm: Gmm = serde_json::from_reader(BufReader::new(file)).map_err(json_error)?;
    gmm.validate()?;
    log::info!("loaded {} Gaussians from {}", gmm.n(), path.display());
    Ok(gmm)
}
