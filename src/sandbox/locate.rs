use std::path::PathBuf;

use crate::error::{PageletError, Result};

/// Well-known binary names probed on PATH, most specific first.
const PATH_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// Locate a usable browser executable.
///
/// Search order: `PAGELET_BROWSER` env override, then the configured path,
/// then fixed per-OS install locations, then a PATH lookup. Fails fast with
/// a descriptive error when nothing is found.
pub fn locate_browser(configured: Option<&PathBuf>) -> Result<PathBuf> {
    if let Ok(overridden) = std::env::var("PAGELET_BROWSER") {
        return Ok(PathBuf::from(overridden));
    }
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    if let Some(found) = platform_install_path() {
        return Ok(found);
    }
    for candidate in PATH_CANDIDATES {
        if let Ok(found) = which::which(candidate) {
            return Ok(found);
        }
    }
    Err(PageletError::BrowserNotFound)
}

#[cfg(target_os = "macos")]
fn platform_install_path() -> Option<PathBuf> {
    let app_paths = [
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];
    for path in app_paths {
        let system = PathBuf::from(path);
        if system.exists() {
            return Some(system);
        }
        if let Ok(home) = std::env::var("HOME") {
            let user = PathBuf::from(home).join(&path[1..]);
            if user.exists() {
                return Some(user);
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn platform_install_path() -> Option<PathBuf> {
    let suffix = r"Google\Chrome\Application\chrome.exe";
    for prefix_var in ["LOCALAPPDATA", "PROGRAMFILES", "PROGRAMFILES(X86)"] {
        if let Ok(prefix) = std::env::var(prefix_var) {
            let exe = PathBuf::from(prefix).join(suffix);
            if exe.exists() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_install_path() -> Option<PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test body: the env var must not leak into parallel tests.
    #[test]
    fn search_order_is_env_then_configured() {
        let configured = PathBuf::from("/usr/local/bin/thorium");
        let located = locate_browser(Some(&configured)).unwrap();
        assert_eq!(located, configured);

        std::env::set_var("PAGELET_BROWSER", "/opt/custom/chromium");
        let located = locate_browser(Some(&configured));
        std::env::remove_var("PAGELET_BROWSER");
        assert_eq!(located.unwrap(), PathBuf::from("/opt/custom/chromium"));
    }
}
