use anyhow::{Context, Result};
use bm25_core::tokenizer::tokenize;
use bm25_core::SledStore;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone)]
pub struct ImportOptions {
    /// Field-name prefixes whose text is tokenized when a record has no
    /// `tokens` field, e.g. `Narrative` or `Synopsis`.
    pub text_fields: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: usize,
    pub records: usize,
    pub tokenized: usize,
    pub skipped: usize,
}

/// JSON and JSONL files under `input`, or `input` itself when it is a file.
pub fn collect_files(input: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

pub fn import_path(store: &SledStore, input: &Path, opts: &ImportOptions) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for file in collect_files(input) {
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            import_jsonl(store, &file, opts, &mut summary).with_context(|| format!("importing {name}"))?;
        } else {
            import_json(store, &file, opts, &mut summary).with_context(|| format!("importing {name}"))?;
        }
        summary.files += 1;
    }
    tracing::info!(
        files = summary.files,
        records = summary.records,
        tokenized = summary.tokenized,
        skipped = summary.skipped,
        "import complete"
    );
    Ok(summary)
}

fn import_jsonl(store: &SledStore, file: &Path, opts: &ImportOptions, summary: &mut ImportSummary) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(v) => ingest_record(store, v, opts, summary)?,
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping unparseable line");
                summary.skipped += 1;
            }
        }
    }
    Ok(())
}

fn import_json(store: &SledStore, file: &Path, opts: &ImportOptions, summary: &mut ImportSummary) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: Value = serde_json::from_reader(reader)?;
    match json {
        Value::Array(arr) => {
            for v in arr {
                ingest_record(store, v, opts, summary)?;
            }
        }
        Value::Object(_) => ingest_record(store, json, opts, summary)?,
        _ => summary.skipped += 1,
    }
    Ok(())
}

fn ingest_record(store: &SledStore, value: Value, opts: &ImportOptions, summary: &mut ImportSummary) -> Result<()> {
    let Value::Object(mut obj) = value else {
        summary.skipped += 1;
        return Ok(());
    };
    let Some(id) = record_id(&obj) else {
        tracing::debug!("skipping record without id");
        summary.skipped += 1;
        return Ok(());
    };
    if !obj.contains_key("tokens") && !opts.text_fields.is_empty() {
        let text = combine_text_fields(&obj, &opts.text_fields);
        if !text.is_empty() {
            let tokens = tokenize(&text).into_iter().map(Value::String).collect();
            obj.insert("tokens".into(), Value::Array(tokens));
            summary.tokenized += 1;
        }
    }
    store.put(&id, &Value::Object(obj))?;
    summary.records += 1;
    Ok(())
}

/// `id` or `_id`, as a string, number, or `{"$oid": ".."}`.
pub fn record_id(obj: &Map<String, Value>) -> Option<String> {
    let raw = obj.get("id").or_else(|| obj.get("_id"))?;
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(inner) => inner.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Concatenate string fields whose names start with any prefix, in record order.
pub fn combine_text_fields(obj: &Map<String, Value>, prefixes: &[String]) -> String {
    obj.iter()
        .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p.as_str())))
        .filter_map(|(_, v)| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm25_core::DocumentStore;
    use serde_json::json;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn ids_from_common_shapes() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(record_id(&obj(json!({"id": "a1"}))), Some("a1".into()));
        assert_eq!(record_id(&obj(json!({"_id": 60001}))), Some("60001".into()));
        assert_eq!(record_id(&obj(json!({"_id": {"$oid": "65f0"}}))), Some("65f0".into()));
        assert_eq!(record_id(&obj(json!({"title": "x"}))), None);
    }

    #[test]
    fn combines_prefixed_fields_in_order() {
        let v = json!({"Synopsis": "B", "Narrative 1": "A", "Narrative 2": "C", "Place": "D"});
        let obj = v.as_object().unwrap();
        let prefixes = vec!["Narrative".to_string(), "Synopsis".to_string()];
        assert_eq!(combine_text_fields(obj, &prefixes), "B A C");
    }

    #[test]
    fn imports_json_and_jsonl() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(&input).unwrap();
        fs::write(
            input.join("a.json"),
            r#"[{"_id": "1", "tokens": ["bird"]}, {"_id": "2", "Narrative": "Engine fire on climb."}]"#,
        )
        .unwrap();
        fs::write(input.join("b.jsonl"), "{\"id\": \"3\", \"Synopsis\": \"Tire burst\"}\n\nnot json\n").unwrap();
        fs::write(input.join("notes.txt"), "ignored").unwrap();

        let store = SledStore::open(dir.path().join("store"), Duration::from_secs(5)).unwrap();
        let opts = ImportOptions { text_fields: vec!["Narrative".into(), "Synopsis".into()] };
        let summary = import_path(&store, &input, &opts).unwrap();
        assert_eq!(summary, ImportSummary { files: 2, records: 3, tokenized: 2, skipped: 1 });

        let docs = store.fetch_tokenized(0, 10).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1].tokens, Some(json!(["engine", "fire", "on", "climb"])));
    }
}
