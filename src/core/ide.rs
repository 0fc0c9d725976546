//! IDE integration descriptor (`.vscode/mcp.json`).
//!
//! Publishing merges one `servers.<name>` entry into the file without
//! touching unrelated entries; removal deletes that entry only when its URL
//! still matches, and drops `servers` once it is empty.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(".vscode").join("mcp.json")
}

/// SSE URL advertised to the IDE.
pub fn sse_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/sse", host, port)
}

/// Write or update the entry for `server_name`. Returns whether the file
/// changed.
pub fn publish(base_dir: &Path, server_name: &str, url: &str) -> io::Result<bool> {
    let path = config_path(base_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut data = match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                let backup = path.with_extension("json.bak");
                warn!("Unreadable {}, moving it to {}: {}", path.display(), backup.display(), e);
                std::fs::rename(&path, &backup)?;
                Map::new()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e),
    };

    let entry = json!({"type": "sse", "url": url});
    let has_inputs = data.contains_key("inputs");
    let servers = data
        .entry("servers")
        .or_insert_with(|| Value::Object(Map::new()));
    if !servers.is_object() {
        *servers = Value::Object(Map::new());
    }
    let Some(servers) = servers.as_object_mut() else {
        return Ok(false);
    };
    if servers.get(server_name) == Some(&entry) && has_inputs {
        return Ok(false);
    }
    servers.insert(server_name.to_string(), entry);

    data.entry("inputs").or_insert_with(|| {
        json!([{"id": "args", "type": "promptString", "description": "Extra arguments"}])
    });

    write_json(&path, &Value::Object(data))?;
    debug!("Published MCP server '{}' to {}", server_name, path.display());
    Ok(true)
}

/// Remove the entry for `server_name` if it still points at `url`. A missing
/// file counts as success.
pub fn remove(base_dir: &Path, server_name: &str, url: &str) -> io::Result<bool> {
    let path = config_path(base_dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let Ok(Value::Object(mut data)) = serde_json::from_str::<Value>(&text) else {
        return Ok(false);
    };

    let mut changed = false;
    let prune = if let Some(Value::Object(servers)) = data.get_mut("servers") {
        let matches = servers
            .get(server_name)
            .and_then(|s| s.get("url"))
            .and_then(Value::as_str)
            == Some(url);
        if matches {
            servers.remove(server_name);
            changed = true;
        }
        servers.is_empty()
    } else {
        false
    };
    if prune {
        data.remove("servers");
        changed = true;
    }

    if changed {
        write_json(&path, &Value::Object(data))?;
        debug!("Removed MCP server '{}' from {}", server_name, path.display());
    }
    Ok(changed)
}

fn write_json(path: &Path, value: &Value) -> io::Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(base: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(config_path(base)).unwrap()).unwrap()
    }

    #[test]
    fn publish_creates_file_with_entry_and_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let url = sse_url("10.0.0.5", 6274);
        assert!(publish(dir.path(), "demo", &url).unwrap());

        let data = read(dir.path());
        assert_eq!(data["servers"]["demo"], json!({"type": "sse", "url": "http://10.0.0.5:6274/sse"}));
        assert_eq!(data["inputs"][0]["id"], "args");
        assert!(!publish(dir.path(), "demo", &url).unwrap());
    }

    #[test]
    fn publish_keeps_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".vscode")).unwrap();
        std::fs::write(
            config_path(dir.path()),
            r#"{"servers": {"other": {"type": "stdio", "command": "x"}}, "inputs": []}"#,
        )
        .unwrap();

        publish(dir.path(), "demo", "http://h:1/sse").unwrap();
        let data = read(dir.path());
        assert_eq!(data["servers"]["other"]["command"], "x");
        assert_eq!(data["servers"]["demo"]["url"], "http://h:1/sse");
        assert_eq!(data["inputs"], json!([]));
    }

    #[test]
    fn publish_backs_up_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".vscode")).unwrap();
        std::fs::write(config_path(dir.path()), "{broken").unwrap();

        publish(dir.path(), "demo", "http://h:1/sse").unwrap();
        assert!(dir.path().join(".vscode/mcp.json.bak").exists());
        assert_eq!(read(dir.path())["servers"]["demo"]["type"], "sse");
    }

    #[test]
    fn remove_deletes_matching_entry_and_prunes_servers() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "demo", "http://h:1/sse").unwrap();

        assert!(!remove(dir.path(), "demo", "http://other:2/sse").unwrap());
        assert!(read(dir.path())["servers"]["demo"].is_object());

        assert!(remove(dir.path(), "demo", "http://h:1/sse").unwrap());
        let data = read(dir.path());
        assert!(data.get("servers").is_none());
        assert!(data.get("inputs").is_some());
    }

    #[test]
    fn remove_leaves_other_servers() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "other", "http://o:1/sse").unwrap();
        publish(dir.path(), "demo", "http://h:1/sse").unwrap();
        remove(dir.path(), "demo", "http://h:1/sse").unwrap();
        let data = read(dir.path());
        assert!(data["servers"].get("demo").is_none());
        assert_eq!(data["servers"]["other"]["url"], "http://o:1/sse");
    }

    #[test]
    fn remove_without_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove(dir.path(), "demo", "http://h:1/sse").unwrap());
    }
}
