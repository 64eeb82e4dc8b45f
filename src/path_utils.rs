//! Path utilities for naming outputs and container entries.
//!
//! Container entry names always use `/` separators regardless of platform, and output file
//! names are sanitized so titles taken from source archives can't escape the output directory.

use std::path::{Component, Path, PathBuf};

/// Gets the file name from a path with fallback to lossy conversion.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the file stem from a path with fallback to lossy conversion.
pub fn file_stem_lossy(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Joins the normal components of a relative path with `/`, as container entries expect.
///
/// Root, prefix and `..` components are dropped.
pub fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Where the repacked version of `source` is written: `<dir>/<stem> [kaiso].<extension>`.
///
/// `dir` defaults to the source's own directory.
pub fn output_file_path(source: &Path, dir: Option<&Path>, extension: &str) -> PathBuf {
    let stem = sanitize_filename(&file_stem_lossy(source));
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    dir.join(format!("{} [kaiso].{}", stem, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_lossy() {
        assert_eq!(file_name_lossy(Path::new("test/file.txt")), "file.txt");
        assert_eq!(file_stem_lossy(Path::new("test/file.txt")), "file");
        assert_eq!(file_name_lossy(Path::new("/")), "unknown");
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let path = Path::new("v1").join("chapter 2").join("p10.jpg");
        assert_eq!(entry_name(&path), "v1/chapter 2/p10.jpg");
        assert_eq!(entry_name(Path::new("../p1.png")), "p1.png");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test<file>"), "test-file-");
        assert_eq!(sanitize_filename("test|file"), "test-file");
        assert_eq!(sanitize_filename("test:file"), "test-file");
        assert_eq!(sanitize_filename("test/file"), "test-file");
        assert_eq!(sanitize_filename("normal_file.txt"), "normal_file.txt");
    }

    #[test]
    fn test_output_file_path() {
        let out = output_file_path(Path::new("books/My Book.cbz"), None, "epub");
        assert_eq!(out, Path::new("books").join("My Book [kaiso].epub"));
        let out = output_file_path(Path::new("books/My Book.cbz"), Some(Path::new("out")), "cbz");
        assert_eq!(out, Path::new("out").join("My Book [kaiso].cbz"));
    }
}
