use std::path::Path;

use path_slash::PathExt;

/// Folder a directory upload lands in when no folder is given: the directory's own name
pub fn default_folder_name(source: &Path) -> Option<String> {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

/// Normalize the log output so it always uses `/`, even on Windows
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_slash_lossy().into_owned()
}

/// Hex md5 of a string, used for the path and name fingerprints of upload records
pub fn md5_hex(value: &str) -> String {
    format!("{:x}", md5::compute(value.as_bytes()))
}
