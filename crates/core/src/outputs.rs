//! Discovery of the files a finished job left in its output directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Extensions exposed for download, grouped by artifact family.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx"];
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];
pub const PRESENTATION_EXTENSIONS: &[&str] = &["pptx"];
pub const DATA_EXTENSIONS: &[&str] = &["json"];

/// Whether `path` has one of the recognised output extensions
/// (case-insensitive).
pub fn is_recognized_output(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    [
        DOCUMENT_EXTENSIONS,
        SPREADSHEET_EXTENSIONS,
        PRESENTATION_EXTENSIONS,
        DATA_EXTENSIONS,
    ]
    .iter()
    .any(|family| family.contains(&ext.as_str()))
}

/// MIME type served for a recognised output file.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "csv" => "text/csv",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Directory owned exclusively by `job_id` under `output_root`.
pub fn job_output_dir(output_root: &Path, job_id: &str) -> PathBuf {
    output_root.join(job_id)
}

/// Retrieval reference for one output file of a job.
pub fn download_reference(download_base: &str, job_id: &str, file_name: &str) -> String {
    format!(
        "{}/{job_id}/files/{file_name}",
        download_base.trim_end_matches('/')
    )
}

/// Scan `dir` (non-recursively) and map each recognised file's stem to its
/// retrieval reference.
///
/// A missing directory yields an empty map. When two files share a stem
/// (`report.pdf`, `report.xlsx`) the one sorting last by file name wins.
pub async fn discover_outputs(
    dir: &Path,
    job_id: &str,
    download_base: &str,
) -> std::io::Result<BTreeMap<String, String>> {
    let mut found = BTreeMap::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_recognized_output(&path) {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let (Some(stem), Some(file_name)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.file_name().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        found.insert(
            stem.to_string(),
            download_reference(download_base, job_id, file_name),
        );
    }

    Ok(found)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
