use std::path::Path;

use serde_yaml::Value;

use crate::{Document, Error};

enum Format {
    Yaml,
    Json,
}

/// Read a single YAML or JSON file into a [`Document`].
///
/// The format is chosen by file extension. When the extension is neither
/// `.json` nor `.yaml`/`.yml`, the first non-whitespace byte decides: a
/// `{` selects JSON, anything else YAML. YAML documents have their `<<`
/// merge keys expanded before anything else sees them.
pub fn read(path: &Path) -> Result<Document, Error> {
    let key = path.to_string_lossy().replace('\\', "/");

    let content = std::fs::read(path).map_err(|source| Error::Io {
        path: key.clone(),
        source,
    })?;

    let root = match detect_format(path, &content) {
        Format::Json => {
            serde_json::from_slice::<Value>(&content).map_err(|source| Error::Json {
                path: key.clone(),
                source,
            })?
        }
        Format::Yaml => {
            let parsed: Value = serde_yaml::from_slice(&content).map_err(|source| Error::Yaml {
                path: key.clone(),
                source,
            })?;
            yaml_merge_keys::merge_keys_serde(parsed).map_err(|source| Error::YamlMerge {
                path: key.clone(),
                source,
            })?
        }
    };

    Document::new(root, key)
}

fn detect_format(path: &Path, content: &[u8]) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            Format::Yaml
        }
        // Ambiguous extension: sniff the first non-whitespace byte.
        _ => match content.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Format::Json,
            _ => Format::Yaml,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::get;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "api.yaml", "openapi: 3.0.0\ninfo: {title: t, version: 1.0.0}\n");

        let document = read(&path).unwrap();
        assert_eq!(get(document.root(), "openapi").unwrap().as_str(), Some("3.0.0"));
    }

    #[test]
    fn test_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "api.json", r#"{"swagger": "2.0", "paths": {}}"#);

        let document = read(&path).unwrap();
        assert_eq!(get(document.root(), "swagger").unwrap().as_str(), Some("2.0"));
    }

    #[test]
    fn test_ambiguous_extension_sniffs_content() {
        let dir = tempfile::tempdir().unwrap();

        // Leading '{' selects JSON.
        let path = write_file(&dir, "api.spec", "  {\"openapi\": \"3.0.0\"}");
        let document = read(&path).unwrap();
        assert_eq!(get(document.root(), "openapi").unwrap().as_str(), Some("3.0.0"));

        // Anything else is parsed as YAML.
        let path = write_file(&dir, "api2.spec", "openapi: 3.0.0\n");
        let document = read(&path).unwrap();
        assert_eq!(get(document.root(), "openapi").unwrap().as_str(), Some("3.0.0"));
    }

    #[test]
    fn test_merge_keys_are_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "merged.yaml",
            r#"
base: &base
  type: object
Pet:
  <<: *base
  properties: {}
"#,
        );

        let document = read(&path).unwrap();
        let pet = get(document.root(), "Pet").unwrap().as_mapping().unwrap();
        assert_eq!(get(pet, "type").unwrap().as_str(), Some("object"));
        assert!(get(pet, "<<").is_none());
    }

    #[test]
    fn test_parse_failures_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.json", "{not json");

        match read(&path) {
            Err(Error::Json { path, .. }) => assert!(path.ends_with("bad.json")),
            other => panic!("expected Json error, got {other:?}"),
        }

        let path = write_file(&dir, "scalar.yaml", "just a string");
        match read(&path) {
            Err(Error::RootNotMapping { .. }) => (),
            other => panic!("expected RootNotMapping, got {other:?}"),
        }
    }
}
