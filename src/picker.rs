use std::fs;
use std::path::{Path, PathBuf};
use anyhow::Result;

pub const MAX_PDF_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

impl FileEntry {
    pub fn is_pdf(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false)
    }
}

/// List a directory for the picker panel: directories first, then files,
/// each group alphabetical, dotfiles hidden.
pub fn list_dir(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries: Vec<FileEntry> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata()?;
        entries.push(FileEntry {
            name,
            path: entry.path(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(entries)
}

/// Client-side validation before any network call. Returns the
/// user-facing message on rejection.
pub fn validate_pdf(entry: &FileEntry) -> std::result::Result<(), String> {
    if entry.is_dir || !entry.is_pdf() {
        return Err("Please upload a PDF file".to_string());
    }
    if entry.size > MAX_PDF_BYTES {
        return Err("File size should not exceed 10MB".to_string());
    }
    Ok(())
}
