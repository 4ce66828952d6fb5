//! File name handling for client-supplied names.

use crate::error::{StorageError, StorageResult};

/// Longest name kept after sanitization.
pub const MAX_FILENAME_LEN: usize = 128;

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts (either separator) are dropped, characters outside
/// `[A-Za-z0-9._-]` become `_`, and leading dots are stripped so the result
/// can never be `.`/`..` or a hidden file.
pub fn sanitize_filename(name: &str) -> StorageResult<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = truncate_keeping_extension(cleaned, MAX_FILENAME_LEN);

    if cleaned.is_empty() {
        return Err(StorageError::invalid_name(name));
    }

    Ok(cleaned)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < 16 => {
            let keep = max.saturating_sub(ext.len() + 1);
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..max].to_string(),
    }
}
