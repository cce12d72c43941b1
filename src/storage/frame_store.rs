//! Per-frame persistence: one binary file per column plus a JSON manifest.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, Role};
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct ManifestColumn {
    name: String,
    role: Role,
    unit: String,
    #[serde(default)]
    subroles: Vec<String>,
    file: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    name: String,
    nrows: usize,
    columns: Vec<ManifestColumn>,
}

fn write_floats(path: &Path, values: impl Iterator<Item = f64>) -> Result<()> {
    let mut bytes = Vec::new();
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

fn write_ints(path: &Path, values: impl Iterator<Item = i32>) -> Result<()> {
    let mut bytes = Vec::new();
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_floats(path: &Path) -> Result<Vec<f64>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", path.display())))?;
    if bytes.len() % 8 != 0 {
        return Err(Error::Io(format!(
            "'{}' is not a float column file",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().expect("chunk of 8")))
        .collect())
}

fn read_ints(path: &Path) -> Result<Vec<i32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", path.display())))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Io(format!(
            "'{}' is not an int column file",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().expect("chunk of 4")))
        .collect())
}

/// Saves a frame into `dir`, replacing whatever was there.
pub fn save_frame(dir: &Path, frame: &DataFrame) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;

    let mut manifest = Manifest {
        name: frame.name.clone(),
        nrows: frame.nrows(),
        columns: Vec::new(),
    };
    let mut ix = 0usize;

    macro_rules! save_floats {
        ($bucket:ident, $role:expr) => {
            for col in &frame.$bucket {
                let file = format!("{ix}.f64");
                write_floats(&dir.join(&file), col.iter())?;
                manifest.columns.push(ManifestColumn {
                    name: col.name.clone(),
                    role: $role,
                    unit: col.unit.clone(),
                    subroles: col.subroles.clone(),
                    file,
                });
                ix += 1;
            }
        };
    }
    macro_rules! save_ints {
        ($bucket:ident, $role:expr) => {
            for col in &frame.$bucket {
                let file = format!("{ix}.i32");
                write_ints(&dir.join(&file), col.iter())?;
                manifest.columns.push(ManifestColumn {
                    name: col.name.clone(),
                    role: $role,
                    unit: col.unit.clone(),
                    subroles: col.subroles.clone(),
                    file,
                });
                ix += 1;
            }
        };
    }

    save_ints!(categoricals, Role::Categorical);
    save_floats!(discretes, Role::Discrete);
    save_ints!(join_keys, Role::JoinKey);
    save_floats!(numericals, Role::Numerical);
    save_floats!(targets, Role::Target);
    save_ints!(texts, Role::Text);
    save_floats!(time_stamps, Role::TimeStamp);
    save_floats!(unused_floats, Role::UnusedFloat);
    save_ints!(unused_strings, Role::UnusedString);

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| Error::Io(format!("cannot serialize manifest: {e}")))?;
    std::fs::write(dir.join("manifest.json"), json)?;
    Ok(())
}

/// Loads a frame saved by [`save_frame`].
pub fn load_frame(dir: &Path) -> Result<DataFrame> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", manifest_path.display())))?;
    let manifest: Manifest = serde_json::from_str(&json)
        .map_err(|e| Error::Io(format!("malformed manifest: {e}")))?;

    let mut frame = DataFrame::new(manifest.name);
    for entry in manifest.columns {
        if entry.role.is_float() {
            let values = read_floats(&dir.join(&entry.file))?;
            let col = Column::new(entry.name, values)
                .with_unit(entry.unit)
                .with_subroles(entry.subroles);
            frame.add_float_column(entry.role, col)?;
        } else {
            let values = read_ints(&dir.join(&entry.file))?;
            let col = Column::new(entry.name, values)
                .with_unit(entry.unit)
                .with_subroles(entry.subroles);
            frame.add_int_column(entry.role, col)?;
        }
    }
    frame.check_lengths()?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades");

        let mut frame = DataFrame::new("trades");
        frame
            .add_int_column(Role::JoinKey, Column::new("jk", vec![1, -1, 2]))
            .unwrap();
        frame
            .add_float_column(
                Role::Numerical,
                Column::new("v", vec![1.0, f64::NAN, 3.0]).with_unit("EUR"),
            )
            .unwrap();
        frame
            .add_float_column(Role::TimeStamp, Column::new("ts", vec![1.0, 2.0, 3.0]))
            .unwrap();

        save_frame(&path, &frame).unwrap();
        let back = load_frame(&path).unwrap();

        assert_eq!(back.name, "trades");
        assert_eq!(back.nrows(), 3);
        assert_eq!(back.role_of("jk"), Some(Role::JoinKey));
        let v = back.float_column("v").unwrap();
        assert_eq!(v.unit, "EUR");
        assert!(v.is_null(1));
        assert_eq!(v.get(2), 3.0);
        assert!(back.int_column("jk").unwrap().is_null(1));
    }

    #[test]
    fn test_save_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");

        let mut a = DataFrame::new("f");
        a.add_float_column(Role::Numerical, Column::new("x", vec![1.0]))
            .unwrap();
        save_frame(&path, &a).unwrap();

        let mut b = DataFrame::new("f");
        b.add_float_column(Role::Numerical, Column::new("y", vec![2.0, 3.0]))
            .unwrap();
        save_frame(&path, &b).unwrap();

        let back = load_frame(&path).unwrap();
        assert!(back.float_column("x").is_none());
        assert_eq!(back.nrows(), 2);
    }
}
