use std::path::{Path, PathBuf};

use dirs_next::{config_dir, home_dir};

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Resolves a file inside the Weft configuration directory (`~/.config/weft` on most platforms).
pub fn config_file_path(file_name: &str) -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("weft").join(file_name)
}

/// Returns the lowercased extension of `path`, if any.
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension().map(|extension| extension.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_tilde_paths_are_untouched() {
        assert_eq!(expand_tilde(" /tmp/history.json "), PathBuf::from("/tmp/history.json"));
    }

    #[test]
    fn tilde_prefix_is_expanded() {
        let expanded = expand_tilde("~/weft/history.json");
        assert!(expanded.ends_with("weft/history.json"));
        assert!(!expanded.starts_with("~") || home_dir().is_none());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_lowercase(Path::new("doc.YAML")).as_deref(), Some("yaml"));
        assert_eq!(extension_lowercase(Path::new("doc")), None);
    }
}
