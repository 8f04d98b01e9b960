/// Dataset Loader - Heterogeneous Rows → Task
///
/// Reads a local JSONL export of one dataset split. Source rows use several
/// field spellings; they are normalized here so nothing downstream ever
/// branches on raw field names.

use anyhow::{Context, Result};
use ibench_common::types::{Split, Task};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Default location of a split export: `<datasets_dir>/<dataset split>.jsonl`
pub fn default_dataset_path(datasets_dir: &Path, split: Split) -> PathBuf {
    datasets_dir.join(format!("{}.jsonl", split.dataset_name()))
}

/// Load up to `limit` tasks, in file order
pub fn load_tasks(path: &Path, limit: Option<usize>) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;

    let mut tasks = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if limit.is_some_and(|limit| tasks.len() >= limit) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Map<String, Value> = serde_json::from_str(line)
            .with_context(|| format!("Invalid dataset row at {}:{}", path.display(), idx + 1))?;
        tasks.push(normalize(&row));
    }
    Ok(tasks)
}

/// Map a raw dataset row onto the fixed Task shape
pub fn normalize(row: &Map<String, Value>) -> Task {
    let task_id = first_field(row, &["task_id", "id"]).unwrap_or_else(|| fallback_task_id(row));

    Task {
        task_id,
        entry_point: first_field(row, &["entry_point", "function_name"]).unwrap_or_default(),
        prompt: first_field(row, &["prompt", "question"]).unwrap_or_default(),
        legitimate_harness: first_field(row, &["original_tests", "test"]).unwrap_or_default(),
        impossible_harness: first_field(row, &["impossible_tests", "impossible_test"])
            .unwrap_or_default(),
    }
}

/// Content-derived id for rows without one; stable across runs and toolchains
fn fallback_task_id(row: &Map<String, Value>) -> String {
    let digest = Sha256::digest(Value::Object(row.clone()).to_string().as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("task_{hex}")
}

/// First alias holding a non-empty value; numbers are stringified
fn first_field(row: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| match row.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_normalize_canonical_fields() {
        let task = normalize(&row(json!({
            "task_id": "lcb/12",
            "entry_point": "solve",
            "prompt": "def solve(): ...",
            "original_tests": "assert solve() == 1",
            "impossible_tests": "assert solve() == 2",
        })));
        assert_eq!(task.task_id, "lcb/12");
        assert_eq!(task.entry_point, "solve");
        assert_eq!(task.legitimate_harness, "assert solve() == 1");
        assert_eq!(task.impossible_harness, "assert solve() == 2");
    }

    #[test]
    fn test_normalize_aliases_and_empty_fallthrough() {
        let task = normalize(&row(json!({
            "task_id": "",
            "id": 7,
            "function_name": "f",
            "question": "q",
            "test": "assert f()",
            "impossible_test": "assert not f()",
        })));
        assert_eq!(task.task_id, "7");
        assert_eq!(task.entry_point, "f");
        assert_eq!(task.prompt, "q");
        assert_eq!(task.legitimate_harness, "assert f()");
        assert_eq!(task.impossible_harness, "assert not f()");
    }

    #[test]
    fn test_normalize_missing_fields() {
        let a = normalize(&row(json!({ "prompt": "only a prompt" })));
        let b = normalize(&row(json!({ "prompt": "only a prompt" })));
        assert!(a.task_id.starts_with("task_"));
        assert_eq!(a.task_id, b.task_id);
        assert_eq!(a.entry_point, "");
        assert_eq!(a.impossible_harness, "");
    }

    #[test]
    fn test_fallback_id_is_fixed_digest() {
        // First 8 bytes of SHA-256 over the compact row JSON
        let task = normalize(&row(json!({ "prompt": "p" })));
        assert_eq!(task.task_id, "task_4b3f025124f2bcf3");

        let other = normalize(&row(json!({ "prompt": "q" })));
        assert_ne!(other.task_id, task.task_id);
    }

    #[test]
    fn test_load_tasks_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oneoff.jsonl");
        std::fs::write(
            &path,
            "{\"task_id\":\"a\"}\n\n{\"task_id\":\"b\"}\n{\"task_id\":\"c\"}\n",
        )
        .unwrap();

        let all = load_tasks(&path, None).unwrap();
        assert_eq!(all.len(), 3);

        let limited = load_tasks(&path, Some(2)).unwrap();
        let ids: Vec<_> = limited.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_load_tasks_reports_bad_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"task_id\":\"a\"}\nnot json\n").unwrap();

        let err = load_tasks(&path, None).unwrap_err();
        assert!(format!("{err:#}").contains("bad.jsonl:2"));
    }

    #[test]
    fn test_default_dataset_path() {
        let path = default_dataset_path(Path::new("data/datasets"), Split::OneOff);
        assert_eq!(path, PathBuf::from("data/datasets/oneoff.jsonl"));
    }
}
