use std::collections::BTreeMap;
use std::path::Path;

use crate::bundle::Entrypoint;
use crate::error::{PageletError, Result};

/// Copy files into the serving directory under their serve paths.
///
/// Rejects serve paths that would escape the destination directory.
pub async fn copy_files(files: &[Entrypoint], destination: &Path) -> Result<()> {
    for entry in files {
        let serving_path = entry.serving_path();
        let destination_file = destination.join(serving_path.trim_start_matches('/'));

        let normalized = normalize(&destination_file);
        if !normalized.starts_with(normalize(destination)) {
            return Err(PageletError::Config(format!(
                "File would be served outside of destination directory: {} => {}",
                entry.source_path.display(),
                serving_path
            )));
        }

        if let Some(parent) = destination_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if normalize(&entry.source_path) == normalized {
            continue;
        }
        tokio::fs::copy(&entry.source_path, &destination_file).await?;
    }
    Ok(())
}

// Lexical normalization; enough to catch `..` escapes in serve paths.
fn normalize(path: &Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Expand directory entrypoints to their contained files, applying
/// `filter_files` to each directory's file name list.
pub async fn resolve_directory_entrypoints(
    entrypoints: Vec<Entrypoint>,
    filter_files: impl Fn(Vec<String>) -> Vec<String>,
) -> Result<Vec<Entrypoint>> {
    let mut resolved = Vec::new();

    for entry in entrypoints {
        let metadata = tokio::fs::metadata(&entry.source_path).await?;
        if !metadata.is_dir() {
            resolved.push(entry);
            continue;
        }

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&entry.source_path).await?;
        while let Some(item) = dir.next_entry().await? {
            if item.file_type().await?.is_file() {
                names.push(item.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        for name in filter_files(names) {
            resolved.push(Entrypoint {
                source_path: entry.source_path.join(&name),
                serve_path: entry
                    .serve_path
                    .as_ref()
                    .map(|serve| format!("{}/{}", serve.trim_end_matches('/'), name)),
            });
        }
    }

    Ok(resolved)
}

/// Drop duplicate source files that only differ by extension, so a `.ts`
/// file and its transpiled `.js` sibling are not both bundled. The
/// lexicographically first extension wins.
pub fn dedupe_source_files(basenames: Vec<String>, drop_non_source_files: bool) -> Vec<String> {
    const SOURCE_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx"];

    let is_source = |name: &str| {
        SOURCE_EXTENSIONS
            .iter()
            .any(|ext| name.to_ascii_lowercase().ends_with(ext))
    };

    let mut by_stem: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut non_source = Vec::new();

    for name in basenames {
        if is_source(&name) {
            let stem = match name.rfind('.') {
                Some(index) => name[..index].to_string(),
                None => name.clone(),
            };
            by_stem.entry(stem).or_default().push(name);
        } else {
            non_source.push(name);
        }
    }

    let mut result = if drop_non_source_files {
        Vec::new()
    } else {
        non_source
    };
    for (_, mut candidates) in by_stem {
        candidates.sort();
        result.push(candidates.remove(0));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_prefers_first_extension() {
        let deduped = dedupe_source_files(
            vec![
                "main.js".to_string(),
                "main.ts".to_string(),
                "other.tsx".to_string(),
                "data.json".to_string(),
            ],
            false,
        );
        assert_eq!(deduped, vec!["data.json", "main.js", "other.tsx"]);
    }

    #[test]
    fn dedupe_can_drop_non_source_files() {
        let deduped = dedupe_source_files(
            vec!["data.json".to_string(), "main.ts".to_string()],
            true,
        );
        assert_eq!(deduped, vec!["main.ts"]);
    }

    #[tokio::test]
    async fn copy_rejects_escaping_serve_paths() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let destination = tempfile::tempdir().unwrap();

        let entry = Entrypoint {
            source_path: source.path().to_path_buf(),
            serve_path: Some("../escape.txt".to_string()),
        };

        let err = copy_files(&[entry], destination.path()).await.unwrap_err();
        assert!(err.to_string().contains("outside of destination directory"));
    }

    #[tokio::test]
    async fn copy_places_files_under_serve_path() {
        let mut source = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(source, "{{}}").unwrap();

        let destination = tempfile::tempdir().unwrap();
        let entry = Entrypoint {
            source_path: source.path().to_path_buf(),
            serve_path: Some("/data/test.json".to_string()),
        };

        copy_files(&[entry], destination.path()).await.unwrap();
        assert!(destination.path().join("data/test.json").exists());
    }

    #[tokio::test]
    async fn directories_expand_to_contained_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "").unwrap();
        std::fs::write(dir.path().join("b.js"), "").unwrap();

        let entries = resolve_directory_entrypoints(
            vec![Entrypoint {
                source_path: dir.path().to_path_buf(),
                serve_path: Some("lib".to_string()),
            }],
            |names| names,
        )
        .await
        .unwrap();

        let serve_paths: Vec<_> = entries.iter().map(|e| e.serving_path()).collect();
        assert_eq!(serve_paths, vec!["lib/a.js", "lib/b.js"]);
    }
}
