//! Pipeline persistence: the full descriptor (feature templates, trees,
//! preprocessor registrations, predictor weights) as one JSON document.

use std::path::Path;

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

pub fn save_pipeline(dir: &Path, pipeline: &Pipeline) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(pipeline)
        .map_err(|e| Error::Io(format!("cannot serialize pipeline: {e}")))?;
    std::fs::write(dir.join("pipeline.json"), json)?;
    Ok(())
}

pub fn load_pipeline(dir: &Path) -> Result<Pipeline> {
    let path = dir.join("pipeline.json");
    let json = std::fs::read_to_string(&path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", path.display())))?;
    serde_json::from_str(&json)
        .map_err(|e| Error::Io(format!("malformed pipeline in '{}': {e}", path.display())))
}
