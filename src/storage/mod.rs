//! On-disk persistence.
//!
//! A project directory holds one subdirectory per saved frame (per-column
//! binary files plus a JSON manifest of roles, units and subroles), one
//! subdirectory per saved pipeline (descriptor JSON), and the two project
//! encodings as JSON files:
//!
//! ```text
//! {projects_root}/{name}/
//!   data/{frame}/manifest.json + {ix}.f64 / {ix}.i32
//!   pipelines/{pipeline}/pipeline.json
//!   categories.json
//!   join_keys_encoding.json
//! ```

pub mod csv;
pub mod frame_store;
pub mod pipeline_store;

pub use csv::{read_csv, write_csv, CsvOptions};
pub use frame_store::{load_frame, save_frame};
pub use pipeline_store::{load_pipeline, save_pipeline};

use std::path::Path;

use crate::containers::encoding::Encoding;
use crate::error::{Error, Result};

/// Writes an encoding as JSON.
pub fn save_encoding(path: &Path, encoding: &Encoding) -> Result<()> {
    let json = serde_json::to_string(encoding)
        .map_err(|e| Error::Io(format!("cannot serialize encoding: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads an encoding from JSON, rebuilding its lookup map.
pub fn load_encoding(path: &Path) -> Result<Encoding> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", path.display())))?;
    let mut encoding: Encoding = serde_json::from_str(&json)
        .map_err(|e| Error::Io(format!("malformed encoding in '{}': {e}", path.display())))?;
    encoding.rebuild_map();
    Ok(encoding)
}
