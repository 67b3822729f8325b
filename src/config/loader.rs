use std::path::{Path, PathBuf};

use crate::config::types::PageletConfig;
use crate::error::{PageletError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "pagelet", "pagelet") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        dirs_fallback().join(".pagelet").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<PageletConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(PageletConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: PageletConfig =
        toml::from_str(&content).map_err(|e| PageletError::TomlParse(e.to_string()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/pagelet.toml"))).unwrap();
        assert!(config.browser.executable.is_none());
        assert!(config.server.port.is_none());
        assert!(!config.cache.keep);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4000\n\n[cache]\nkeep = true").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.server.port, Some(4000));
        assert!(config.cache.keep);
        assert!(config.browser.executable.is_none());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, PageletError::TomlParse(_)));
    }
}
