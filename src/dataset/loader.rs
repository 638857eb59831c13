use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::RawDatapoint;
use crate::error::{EvalError, Result};

/// Load a newline-delimited JSON dataset fully into memory, preserving line order.
///
/// Blank lines are skipped. A missing file or a line that is not a JSON object with a
/// string `id` fails the whole load.
pub fn load_data(path: &Path) -> Result<Vec<RawDatapoint>> {
    let file = File::open(path).map_err(|e| EvalError::load(path, e))?;
    let reader = BufReader::new(file);

    let mut data = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line =
            line.map_err(|e| EvalError::load(path, format!("line {}: {}", line_num + 1, e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let datapoint: RawDatapoint = serde_json::from_str(&line)
            .map_err(|e| EvalError::load(path, format!("line {}: {}", line_num + 1, e)))?;
        data.push(datapoint);
    }

    log::debug!("Loaded {} datapoints from {}", data.len(), path.display());
    Ok(data)
}

/// Compute SHA256 hash of file contents
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let content = std::fs::read(path).map_err(|e| EvalError::load(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}
