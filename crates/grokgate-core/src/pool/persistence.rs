//! On-disk credential status: a JSON mapping of session identity → model
//! family → status record, written through after every pool mutation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::entry::TokenStatus;
use crate::AppResult;

pub type StatusMap = HashMap<String, HashMap<String, TokenStatus>>;

/// Best-effort load: a missing file is an empty pool, a corrupt file is
/// logged and treated as empty rather than blocking startup.
pub fn load(path: &Path) -> StatusMap {
    if !path.exists() {
        return StatusMap::new();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(map) => {
                info!(path = %path.display(), "loaded credential status");
                map
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "corrupt credential status file, starting empty");
                StatusMap::new()
            }
        },
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read credential status file");
            StatusMap::new()
        }
    }
}

/// Atomic save: write a sibling temp file, then rename over the target so
/// a crash mid-write never leaves a truncated status file.
pub fn save(path: &Path, map: &StatusMap) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
