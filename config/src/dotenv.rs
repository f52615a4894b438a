//! Minimal `.env` reader. Parsed keys are applied by `lib.rs` only when the
//! process environment does not already define them.

use std::collections::HashMap;
use std::path::Path;

/// Parses `.env` content: `KEY=VALUE` lines, `#` comment lines skipped,
/// surrounding single or double quotes stripped (double quotes support `\"`).
/// No multiline values.
fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = if let Some(inner) = value.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            inner.replace("\\\"", "\"")
        } else if let Some(inner) = value.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            inner.to_string()
        } else {
            value.to_string()
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Reads `.env` from `dir` (or the current directory). A missing file is not
/// an error and yields an empty map.
pub fn load_env_map(dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let dir = match dir.map(Path::to_path_buf).or_else(|| std::env::current_dir().ok()) {
        Some(d) => d,
        None => return Ok(HashMap::new()),
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(parse_env_file(&std::fs::read_to_string(path)?))
}
