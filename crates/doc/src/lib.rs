//! Document trees for OpenAPI sources.
//!
//! A document is a tree of insertion-ordered mappings, sequences, and
//! scalars, parsed from a YAML or JSON file. `serde_yaml::Value` is the
//! node type; [`Document`] wraps it with the guarantee that the root is
//! a mapping and that every key in the tree is a string.

pub mod ptr;
mod read;

pub use ptr::Pointer;
pub use read::read;

use serde_yaml::{Mapping, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML document {path}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON document {path}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to merge YAML alias nodes of {path}")]
    YamlMerge {
        path: String,
        #[source]
        source: yaml_merge_keys::MergeKeyError,
    },
    #[error("document {path} must hold a mapping at its root")]
    RootNotMapping { path: String },
    #[error("document {path} holds a non-string key at {location}")]
    NonStringKey { path: String, location: String },
}

/// Document is a parsed YAML or JSON file: a mapping at the root, string
/// keys throughout, and the path it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
    source: String,
}

impl Document {
    /// Wrap |root| as a Document originating at |source|.
    /// The root must be a mapping and every key of the tree a string.
    pub fn new(root: Value, source: impl Into<String>) -> Result<Document, Error> {
        let source = source.into();

        if !matches!(root, Value::Mapping(_)) {
            return Err(Error::RootNotMapping { path: source });
        }
        check_string_keys(&root, &mut String::new(), &source)?;

        Ok(Document { root, source })
    }

    /// Path this document was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Mapping {
        match &self.root {
            Value::Mapping(map) => map,
            _ => unreachable!("Document root is always a mapping"),
        }
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Query the node at |ptr|, if present.
    pub fn get(&self, ptr: &Pointer) -> Option<&Value> {
        ptr.query(&self.root)
    }
}

/// Fetch the value at string key |key| of |map|.
pub fn get<'m>(map: &'m Mapping, key: &str) -> Option<&'m Value> {
    map.get(&Value::String(key.to_string()))
}

fn check_string_keys(value: &Value, location: &mut String, path: &str) -> Result<(), Error> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter() {
                let key = match key {
                    Value::String(key) => key,
                    _ => {
                        return Err(Error::NonStringKey {
                            path: path.to_string(),
                            location: if location.is_empty() {
                                "/".to_string()
                            } else {
                                location.clone()
                            },
                        })
                    }
                };

                let len = location.len();
                location.push('/');
                location.push_str(key);
                check_string_keys(child, location, path)?;
                location.truncate(len);
            }
        }
        Value::Sequence(seq) => {
            for (index, child) in seq.iter().enumerate() {
                let len = location.len();
                location.push('/');
                location.push_str(&index.to_string());
                check_string_keys(child, location, path)?;
                location.truncate(len);
            }
        }
        _ => (),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_root_must_be_mapping() {
        let root: Value = serde_yaml::from_str("[1, 2, 3]").unwrap();
        match Document::new(root, "seq.yaml") {
            Err(Error::RootNotMapping { path }) => assert_eq!(path, "seq.yaml"),
            other => panic!("expected RootNotMapping, got {other:?}"),
        }
    }

    #[test]
    fn test_non_string_keys_are_rejected() {
        let root: Value = serde_yaml::from_str("paths:\n  pets:\n    responses:\n      200: {}\n").unwrap();
        match Document::new(root, "codes.yaml") {
            Err(Error::NonStringKey { location, .. }) => {
                assert_eq!(location, "/paths/pets/responses");
            }
            other => panic!("expected NonStringKey, got {other:?}"),
        }
    }

    #[test]
    fn test_pointer_access() {
        let root: Value =
            serde_yaml::from_str("components:\n  schemas:\n    Pet:\n      type: object\n").unwrap();
        let document = Document::new(root, "pet.yaml").unwrap();

        let pet = document
            .get(&Pointer::from_str("/components/schemas/Pet"))
            .unwrap();
        assert_eq!(get(pet.as_mapping().unwrap(), "type").unwrap().as_str(), Some("object"));

        assert!(document.get(&Pointer::from_str("/components/schemas/Toy")).is_none());
    }
}
