use std::fs;
use std::path::{Path, PathBuf};

use doc::Document;

use crate::{Error, Result};

/// Largest document the gate will admit, in bytes.
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Fetcher is the single chokepoint through which every cross-file load
/// passes. It maps reference text to a canonical file key (a normalized
/// absolute forward-slash path), enforcing the search-root allow list,
/// the extension set, and the size limit as it goes. The rest of the
/// resolver can assume any key it holds came out of this gate.
pub struct Fetcher {
    roots: Vec<PathBuf>,
}

impl Fetcher {
    /// Build a Fetcher over the given search roots.
    /// Roots which cannot be canonicalized are rejected up front.
    pub fn new(search_roots: &[PathBuf]) -> Result<Fetcher> {
        let mut fetcher = Fetcher { roots: Vec::new() };
        for root in search_roots {
            fetcher.add_root(root)?;
        }
        Ok(fetcher)
    }

    /// Append a directory to the allow list.
    pub fn add_root(&mut self, dir: &Path) -> Result<()> {
        let canonical = dir.canonicalize().map_err(|source| Error::Io {
            path: path_key(dir),
            source,
        })?;
        if !self.roots.contains(&canonical) {
            self.roots.push(canonical);
        }
        Ok(())
    }

    /// Map |reference|, a bare filesystem path never containing `#`,
    /// to a canonical file key.
    ///
    /// The reference is normalized (null bytes stripped, surrounding
    /// whitespace trimmed, backslashes folded to forward slashes) and
    /// resolved against |base| when given; when the base-relative
    /// candidate does not exist, each configured search root is tried in
    /// order and the first existing regular file wins.
    pub fn resolve_path(&self, reference: &str, base: Option<&Path>) -> Result<String> {
        let cleaned: String = reference.chars().filter(|c| *c != '\0').collect();
        let cleaned = cleaned.trim().replace('\\', "/");
        if cleaned.is_empty() {
            return Err(Error::NotFound { reference: reference.to_string() });
        }

        let mut candidates = Vec::new();
        if let Some(base) = base {
            candidates.push(base.join(&cleaned));
        }
        for root in &self.roots {
            candidates.push(root.join(&cleaned));
        }

        let mut irregular = None;
        for candidate in candidates {
            let canonical = match candidate.canonicalize() {
                Ok(canonical) => canonical,
                Err(_) => continue,
            };
            if !canonical.is_file() {
                irregular.get_or_insert(canonical);
                continue;
            }
            // The first existing regular file decides; policy rejections
            // on it are final rather than a reason to keep searching.
            return self.admit(&canonical);
        }

        match irregular {
            Some(path) => Err(Error::NotRegular { path: path_key(&path) }),
            None => Err(Error::NotFound { reference: cleaned }),
        }
    }

    /// Apply the gate's policy checks to an already-canonical path,
    /// returning its file key.
    pub(crate) fn admit(&self, canonical: &Path) -> Result<String> {
        let key = path_key(canonical);

        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(Error::Escapes { path: key });
        }

        match canonical.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ALLOWED_EXTENSIONS.iter().any(|allowed| ext.eq_ignore_ascii_case(allowed)) => {}
            _ => return Err(Error::Extension { path: key }),
        }

        let size = fs::metadata(canonical)
            .map_err(|source| Error::Io { path: key.clone(), source })?
            .len();
        if size > MAX_FILE_SIZE {
            return Err(Error::TooLarge { path: key, size });
        }

        Ok(key)
    }

    /// Read the document at a file key produced by this gate.
    pub fn fetch(&self, key: &str) -> Result<Document> {
        tracing::debug!(%key, "reading resource");
        Ok(doc::read(Path::new(key))?)
    }
}

/// Canonical textual form of a path: forward slashes throughout.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_base_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "pet.yaml", "type: object\n");

        let fetcher = Fetcher::new(&[dir.path().to_path_buf()]).unwrap();

        // Relative to the base directory, with normalization applied.
        let key = fetcher.resolve_path("  pet.yaml\t", Some(dir.path())).unwrap();
        assert!(key.ends_with("/pet.yaml"));

        // Backslashes fold to forward slashes.
        fs::create_dir(dir.path().join("models")).unwrap();
        write_file(&dir.path().join("models"), "toy.yaml", "type: object\n");
        let key = fetcher.resolve_path(r"models\toy.yaml", Some(dir.path())).unwrap();
        assert!(key.ends_with("/models/toy.yaml"));
    }

    #[test]
    fn test_search_root_fallback() {
        let base = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        write_file(shared.path(), "common.yaml", "type: object\n");

        let fetcher =
            Fetcher::new(&[base.path().to_path_buf(), shared.path().to_path_buf()]).unwrap();

        // Not present under |base|; found under the second root.
        let key = fetcher.resolve_path("common.yaml", Some(base.path())).unwrap();
        assert!(key.ends_with("/common.yaml"));

        match fetcher.resolve_path("absent.yaml", Some(base.path())) {
            Err(Error::NotFound { reference }) => assert_eq!(reference, "absent.yaml"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write_file(outside.path(), "secret.yaml", "leaked: true\n");

        let fetcher = Fetcher::new(&[dir.path().to_path_buf()]).unwrap();

        let reference = format!("{}/secret.yaml", outside.path().display());
        match fetcher.resolve_path(&reference, Some(dir.path())) {
            Err(Error::Escapes { .. }) => (),
            other => panic!("expected Escapes, got {other:?}"),
        }
    }

    #[test]
    fn test_extension_and_size_limits() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "notes.txt", "not a spec\n");

        let fetcher = Fetcher::new(&[dir.path().to_path_buf()]).unwrap();

        match fetcher.resolve_path("notes.txt", Some(dir.path())) {
            Err(Error::Extension { .. }) => (),
            other => panic!("expected Extension, got {other:?}"),
        }

        let oversized = "#".repeat((MAX_FILE_SIZE + 1) as usize);
        write_file(dir.path(), "big.yaml", &oversized);
        match fetcher.resolve_path("big.yaml", Some(dir.path())) {
            Err(Error::TooLarge { size, .. }) => assert_eq!(size, MAX_FILE_SIZE + 1),
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_directories_are_not_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("models.yaml")).unwrap();

        let fetcher = Fetcher::new(&[dir.path().to_path_buf()]).unwrap();
        match fetcher.resolve_path("models.yaml", Some(dir.path())) {
            Err(Error::NotRegular { .. }) => (),
            other => panic!("expected NotRegular, got {other:?}"),
        }
    }
}
