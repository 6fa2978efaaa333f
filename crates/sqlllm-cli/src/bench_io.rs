//! Benchmark files: dataset in, sample/prediction JSON and gold SQL out.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlllm_core::DatasetRecord;

pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRecord>> {
    let text = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read dataset {}: {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow!("dataset {} is not a JSON array of records: {e}", path.display()))
}

/// Pretty-printed with a 4-space indent.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| anyhow!("failed to encode {}: {e}", path.display()))?;
    write_file(path, &buf)
}

/// One line per entry, each terminated by `\n`.
pub fn save_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut buf = Vec::new();
    for line in lines {
        buf.write_all(line.as_bytes())?;
        buf.push(b'\n');
    }
    write_file(path, &buf)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("failed to create {}: {e}", parent.display()))?;
    }
    fs::write(path, bytes).map_err(|e| anyhow!("failed to write {}: {e}", path.display()))
}
