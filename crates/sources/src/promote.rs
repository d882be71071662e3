use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_yaml::{Mapping, Value};

use doc::{Document, Pointer};

use crate::resolve::WHOLE_FILE;

const COMPONENT_KINDS: &[&str] = &["parameters", "requestBodies", "responses"];

/// Merge components used from transitively-loaded files into the root
/// document, so every schema reachable by name from those files can be
/// looked up under `components.schemas` without re-reading anything.
///
/// Runs once, after the resolution walk. Cached documents are already
/// resolved, so promoted entries are structurally equal to the content
/// that was materialized inline.
pub(crate) fn promote(
    root: &mut Document,
    cache: &BTreeMap<String, Document>,
    touched: &BTreeMap<String, BTreeSet<String>>,
) {
    for (key, document) in cache {
        let fragments = match touched.get(key) {
            Some(fragments) => fragments,
            None => continue,
        };
        let basename = file_stem(key);

        // Parameters, requestBodies, and responses reference schemas by
        // name, so using any of them pulls in every schema of the file.
        let merge_all = fragments.contains(WHOLE_FILE)
            || fragments.iter().any(|fragment| {
                COMPONENT_KINDS
                    .iter()
                    .any(|kind| fragment.starts_with(&format!("components/{kind}/")))
            });

        if is_schema_definition(document) {
            // A bare schema body is a single schema named for its file,
            // promoted only when the whole file was referenced directly.
            if fragments.contains(WHOLE_FILE) {
                insert_schema(root, &basename, Value::Mapping(document.root().clone()), true);
            }
            continue;
        }

        if let Some(schemas) = component_section(document, "schemas") {
            let recorded: BTreeSet<&str> = fragments
                .iter()
                .filter_map(|fragment| fragment.strip_prefix("components/schemas/"))
                .collect();

            for (name, schema) in schemas.iter() {
                let name = match name.as_str() {
                    Some(name) => name,
                    None => continue,
                };
                if !(merge_all || recorded.contains(name)) {
                    continue;
                }
                // The file carrying a schema's namesake basename is its
                // canonical source and replaces any stub already present;
                // every other merge only fills absent names.
                insert_schema(root, name, schema.clone(), name == basename);
            }
        }

        for kind in COMPONENT_KINDS {
            let section = match component_section(document, kind) {
                Some(section) => section,
                None => continue,
            };
            for (name, component) in section.iter() {
                let name = match name.as_str() {
                    Some(name) => name,
                    None => continue,
                };
                let recorded = fragments.contains(&format!("components/{kind}/{name}"));
                if merge_all || recorded {
                    insert_component(root, kind, name, component.clone());
                }
            }
        }
    }
}

/// A top-level mapping with `type` or `properties` is a bare schema
/// body, not an OpenAPI document.
fn is_schema_definition(document: &Document) -> bool {
    doc::get(document.root(), "type").is_some() || doc::get(document.root(), "properties").is_some()
}

fn component_section<'d>(document: &'d Document, kind: &str) -> Option<&'d Mapping> {
    doc::get(document.root(), "components")?
        .as_mapping()
        .and_then(|components| doc::get(components, kind))?
        .as_mapping()
}

fn insert_schema(root: &mut Document, name: &str, schema: Value, overwrite: bool) {
    if let Some(section) = section_mut(root, "schemas") {
        let key = Value::String(name.to_string());
        if overwrite || !section.contains_key(&key) {
            section.insert(key, schema);
        }
    }
}

fn insert_component(root: &mut Document, kind: &str, name: &str, component: Value) {
    if let Some(section) = section_mut(root, kind) {
        let key = Value::String(name.to_string());
        if !section.contains_key(&key) {
            section.insert(key, component);
        }
    }
}

/// Mutable access to the root's `components.<kind>` mapping, created on
/// demand. None when a non-mapping value squats on the location.
fn section_mut<'d>(root: &'d mut Document, kind: &str) -> Option<&'d mut Mapping> {
    let mut ptr = Pointer::empty();
    ptr.push("components").push(kind);

    let slot = ptr.create(root.value_mut())?;
    if let Value::Null = slot {
        *slot = Value::Mapping(Mapping::new());
    }
    slot.as_mapping_mut()
}

fn file_stem(key: &str) -> String {
    Path::new(key)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn document(source: &str, fixture: &str) -> Document {
        Document::new(serde_yaml::from_str(fixture).unwrap(), source).unwrap()
    }

    fn touched(entries: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        entries
            .iter()
            .map(|(key, fragments)| {
                (
                    key.to_string(),
                    fragments.iter().map(|f| f.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_schema_definition_file_overwrites_at_its_own_name() {
        let mut root = document(
            "/spec/api.yaml",
            "components: {schemas: {User: {type: string}}}",
        );
        let mut cache = BTreeMap::new();
        cache.insert(
            "/spec/User.yaml".to_string(),
            document("/spec/User.yaml", "{type: object, properties: {}}"),
        );

        // Referenced whole: the file replaces the root's differing stub.
        promote(&mut root, &cache, &touched(&[("/spec/User.yaml", &["/"])]));
        assert_eq!(
            root.get(&Pointer::from_str("/components/schemas/User")),
            Some(&serde_yaml::from_str("{type: object, properties: {}}").unwrap()),
        );

        // Never referenced whole: a bare schema file is not promoted.
        let mut untouched = document("/spec/api.yaml", "components: {schemas: {}}");
        promote(
            &mut untouched,
            &cache,
            &touched(&[("/spec/User.yaml", &["components/schemas/User"])]),
        );
        assert_eq!(
            untouched.get(&Pointer::from_str("/components/schemas/User")),
            None,
        );
    }

    #[test]
    fn test_recorded_fragments_select_what_merges() {
        let mut root = document("/spec/api.yaml", "openapi: 3.0.0");
        let mut cache = BTreeMap::new();
        cache.insert(
            "/spec/common.yaml".to_string(),
            document(
                "/spec/common.yaml",
                r#"
components:
  schemas:
    Page: {type: object}
    Unused: {type: integer}
  parameters:
    Limit: {name: limit, in: query}
"#,
            ),
        );

        // Only the recorded schema merges; parameters were not referenced.
        promote(
            &mut root,
            &cache,
            &touched(&[("/spec/common.yaml", &["components/schemas/Page"])]),
        );
        assert!(root.get(&Pointer::from_str("/components/schemas/Page")).is_some());
        assert!(root.get(&Pointer::from_str("/components/schemas/Unused")).is_none());
        assert!(root.get(&Pointer::from_str("/components/parameters/Limit")).is_none());

        // A parameter fragment triggers the full schema merge, and merges
        // the parameter without overwriting existing root entries.
        let mut root = document(
            "/spec/api.yaml",
            "components: {parameters: {Limit: {name: limit, in: header}}}",
        );
        promote(
            &mut root,
            &cache,
            &touched(&[("/spec/common.yaml", &["components/parameters/Limit"])]),
        );
        assert!(root.get(&Pointer::from_str("/components/schemas/Page")).is_some());
        assert!(root.get(&Pointer::from_str("/components/schemas/Unused")).is_some());
        assert_eq!(
            root.get(&Pointer::from_str("/components/parameters/Limit/in")),
            Some(&Value::String("header".to_string())),
        );
    }
}
