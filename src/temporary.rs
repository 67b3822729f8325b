use std::path::Path;

use tempfile::TempDir;

use crate::error::Result;

const BLANK_PAGE: &str = "\
<!doctype html>
<html>
  <head></head>
  <body><!-- Blank page as a launch pad to inject JS scripts into --></body>
</html>";

/// Create the per-run temporary file cache holding the priming page, the
/// bundles and any extra served files. Dropped (and deleted) at run end
/// unless the caller persists it.
pub fn create_cache() -> Result<TempDir> {
    let dir = tempfile::Builder::new().prefix("pagelet-cache").tempdir()?;
    Ok(dir)
}

pub fn write_blank_html_page(file_path: &Path) -> Result<()> {
    std::fs::write(file_path, BLANK_PAGE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_holds_priming_page() {
        let cache = create_cache().unwrap();
        let index = cache.path().join("index.html");
        write_blank_html_page(&index).unwrap();

        let content = std::fs::read_to_string(&index).unwrap();
        assert!(content.starts_with("<!doctype html>"));
        assert!(content.contains("<body>"));
    }
}
