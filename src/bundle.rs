use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PageletError, Result};

/// A source unit to be bundled and executed in the sandbox.
///
/// `serve_path` is the path the bundle is reachable under relative to the
/// serving root. When unset, a unique one is derived from the source file
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    pub source_path: PathBuf,
    pub serve_path: Option<String>,
}

impl Entrypoint {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            serve_path: None,
        }
    }

    /// Parse a `<source>[:<serve-path>]` command line argument.
    pub fn parse(arg: &str) -> Self {
        match arg.split_once(':') {
            Some((source, serve)) => Self {
                source_path: PathBuf::from(source),
                serve_path: Some(serve.to_string()),
            },
            None => Self::new(arg),
        }
    }

    /// The path this entry is served under, falling back to the source
    /// file name.
    pub fn serving_path(&self) -> String {
        match &self.serve_path {
            Some(serve) => serve.clone(),
            None => self
                .source_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];

fn is_source_extension(ext: &str) -> bool {
    SOURCE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

/// Derive the serve path for a bundle: the explicit serve path if given,
/// otherwise the source file name plus a unique suffix, with source
/// extensions rewritten to `.js`.
fn bundle_serve_path(entry: &Entrypoint) -> String {
    let base = match &entry.serve_path {
        Some(serve) => serve.clone(),
        None => {
            let name = entry
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "bundle".to_string());
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", name, &id[..6])
        }
    };

    let path = Path::new(&base);
    match path.extension().map(|e| e.to_string_lossy().into_owned()) {
        Some(ext) if is_source_extension(&ext) => {
            format!("{}.js", base.trim_end_matches(&format!(".{}", ext)))
        }
        Some(_) => base,
        None => format!("{}.js", base),
    }
}

/// Locate the esbuild executable: env override, then configured path,
/// then PATH lookup.
pub fn locate_bundler(configured: Option<&Path>) -> Result<PathBuf> {
    if let Ok(overridden) = std::env::var("PAGELET_ESBUILD") {
        return Ok(PathBuf::from(overridden));
    }
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    which::which("esbuild").map_err(|_| PageletError::BundlerNotFound {
        executable: "esbuild".to_string(),
    })
}

/// Bundle one entrypoint into the cache directory and return where it is
/// served from.
///
/// The transform itself is a collaborator: an esbuild subprocess producing a
/// same-origin loadable IIFE with inline source maps.
pub async fn create_bundle(
    entry: &Entrypoint,
    cache: &Path,
    bundler: &Path,
    global_name: Option<&str>,
) -> Result<Entrypoint> {
    let serve_path = bundle_serve_path(entry);
    let bundle_file_path = cache.join(serve_path.trim_start_matches('/'));

    if let Some(parent) = bundle_file_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!(
        source = %entry.source_path.display(),
        serve = %serve_path,
        "Bundling entrypoint"
    );

    let mut command = Command::new(bundler);
    command
        .arg(&entry.source_path)
        .arg("--bundle")
        .arg("--sourcemap=inline")
        .arg("--platform=browser")
        .arg("--format=iife")
        .arg(format!("--outfile={}", bundle_file_path.display()));
    if let Some(name) = global_name {
        // Exposes the entry module's exports for the startup wrapper.
        command.arg(format!("--global-name={}", name));
    }
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PageletError::BundlerNotFound {
                executable: bundler.display().to_string(),
            },
            _ => PageletError::Bundling {
                entrypoint: entry.source_path.display().to_string(),
                stderr: e.to_string(),
            },
        })?;

    if !output.status.success() {
        return Err(PageletError::Bundling {
            entrypoint: entry.source_path.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    info!(serve = %serve_path, "Bundle written");

    Ok(Entrypoint {
        source_path: bundle_file_path,
        serve_path: Some(serve_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_colon() {
        let entry = Entrypoint::parse("./src/main.ts:main.js");
        assert_eq!(entry.source_path, PathBuf::from("./src/main.ts"));
        assert_eq!(entry.serve_path.as_deref(), Some("main.js"));

        let entry = Entrypoint::parse("./src/main.ts");
        assert_eq!(entry.source_path, PathBuf::from("./src/main.ts"));
        assert_eq!(entry.serve_path, None);
    }

    #[test]
    fn serving_path_falls_back_to_file_name() {
        assert_eq!(Entrypoint::parse("dir/file.json").serving_path(), "file.json");
        assert_eq!(
            Entrypoint::parse("dir/file.json:data/f.json").serving_path(),
            "data/f.json"
        );
    }

    #[test]
    fn bundle_serve_path_rewrites_source_extensions() {
        let entry = Entrypoint::parse("./src/main.ts:main.ts");
        assert_eq!(bundle_serve_path(&entry), "main.js");

        let entry = Entrypoint::parse("./src/main.tsx:app/main.tsx");
        assert_eq!(bundle_serve_path(&entry), "app/main.js");

        // Explicit non-source serve paths are kept as-is
        let entry = Entrypoint::parse("./src/main.ts:main.txt");
        assert_eq!(bundle_serve_path(&entry), "main.txt");
    }

    #[test]
    fn derived_serve_paths_are_unique() {
        let entry = Entrypoint::new("./src/main.ts");
        let a = bundle_serve_path(&entry);
        let b = bundle_serve_path(&entry);
        assert!(a.ends_with(".js"));
        assert_ne!(a, b);
    }
}
