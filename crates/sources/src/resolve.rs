use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use doc::{Document, Pointer};

use crate::fetch::{path_key, Fetcher};
use crate::promote;
use crate::{Error, Result};

/// Sentinel fragment recorded when an external file is used whole.
pub(crate) const WHOLE_FILE: &str = "/";

/// Conventional shared-objects file consulted when a components pointer
/// dangles: specs organized as `<domain>/models/<ver>/<leaf>/` keep their
/// common parameters and schemas in this sibling.
const CONVENTION_FILE: &str = "KnowledgeCommonObjects.yaml";

const REF: &str = "$ref";
const RESOLVED_REF: &str = "x-resolved-ref";

/// Read the document at |path| and resolve every reference reachable
/// from it, returning the flattened document.
///
/// |search_roots| is the allow list for cross-file loads; the root
/// document's own directory is always permitted.
pub fn load_and_resolve(path: &Path, search_roots: &[PathBuf]) -> Result<Document> {
    let (fetcher, key) = open_root(path, search_roots)?;
    let document = fetcher.fetch(&key)?;
    Resolver::new(fetcher, key, document).run()
}

/// Resolve references of an already-read |document|, in place.
///
/// |path| names the file the document was read from: every relative
/// reference is resolved against the directory of the file that holds
/// it, never against the process working directory.
pub fn resolve_references(
    document: Document,
    path: &Path,
    search_roots: &[PathBuf],
) -> Result<Document> {
    let (fetcher, key) = open_root(path, search_roots)?;
    Resolver::new(fetcher, key, document).run()
}

fn open_root(path: &Path, search_roots: &[PathBuf]) -> Result<(Fetcher, String)> {
    let mut fetcher = Fetcher::new(search_roots)?;
    let canonical = path.canonicalize().map_err(|source| Error::Io {
        path: path_key(path),
        source,
    })?;
    if let Some(parent) = canonical.parent() {
        fetcher.add_root(parent)?;
    }
    let key = fetcher.admit(&canonical)?;
    Ok((fetcher, key))
}

/// One step of a path from a document root down to a node.
#[derive(Clone, Debug)]
enum Step {
    Key(String),
    Index(usize),
}

/// Resolver performs one depth-first walk of the root document,
/// rewriting each eligible `$ref` mapping in place with its resolved
/// content. External files are read once through the gate, cached under
/// their canonical key, and themselves resolved at load so that a
/// fragment fetched from them is already materialized.
///
/// All state is owned by one resolution: nothing is shared across calls
/// and nothing needs locking.
struct Resolver {
    fetcher: Fetcher,
    root_key: String,
    /// Parsed documents keyed on canonical file key. The root document
    /// lives here too and is split back out when resolution finishes.
    documents: BTreeMap<String, Document>,
    /// In-flight (file key, pointer) pairs. Membership marks a cycle:
    /// the back-edge `$ref` is left intact and not descended into.
    resolving: HashSet<(String, String)>,
    /// Addresses of mappings the walk has already entered. Mapping
    /// entries are heap-allocated nodes, so a live mapping's address is
    /// stable for the duration of one resolution.
    visited: HashSet<usize>,
    /// File key => fragments actually used from that file. Drives the
    /// component promotion pass.
    touched: BTreeMap<String, BTreeSet<String>>,
}

enum Action {
    Skip,
    Descend(Vec<Step>),
    Substitute(String),
}

impl Resolver {
    fn new(fetcher: Fetcher, root_key: String, document: Document) -> Resolver {
        let mut documents = BTreeMap::new();
        documents.insert(root_key.clone(), document);

        Resolver {
            fetcher,
            root_key,
            documents,
            resolving: HashSet::new(),
            visited: HashSet::new(),
            touched: BTreeMap::new(),
        }
    }

    fn run(mut self) -> Result<Document> {
        let root_key = self.root_key.clone();
        self.resolve_document(&root_key)?;

        let mut root = self.documents.remove(&root_key).unwrap();
        promote::promote(&mut root, &self.documents, &self.touched);
        Ok(root)
    }

    /// Walk one cached document, rewriting its eligible references.
    fn resolve_document(&mut self, file: &str) -> Result<()> {
        self.resolve_node(file, &mut Vec::new())
    }

    fn resolve_node(&mut self, file: &str, path: &mut Vec<Step>) -> Result<()> {
        let action = match lookup(&self.documents, file, path) {
            Some(Value::Sequence(seq)) => Action::Descend((0..seq.len()).map(Step::Index).collect()),
            Some(Value::Mapping(map)) => {
                if !self.visited.insert(identity(map)) {
                    // Already rewritten (or mid-rewrite) through another path.
                    Action::Skip
                } else if let Some(reference) = eligible_ref(map) {
                    Action::Substitute(reference)
                } else {
                    Action::Descend(snapshot_keys(map))
                }
            }
            _ => Action::Skip,
        };

        match action {
            Action::Skip => Ok(()),
            Action::Descend(steps) => self.descend(file, path, steps),
            Action::Substitute(reference) => self.apply_ref(file, path, &reference),
        }
    }

    fn descend(&mut self, file: &str, path: &mut Vec<Step>, steps: Vec<Step>) -> Result<()> {
        for step in steps {
            path.push(step);
            self.resolve_node(file, path)?;
            path.pop();
        }
        Ok(())
    }

    /// Replace the `$ref` mapping at |path| of |file| with its resolved
    /// target, then resolve references inside the substituted content.
    fn apply_ref(&mut self, file: &str, path: &mut Vec<Step>, reference: &str) -> Result<()> {
        let reference = clean_reference(reference);
        let (file_part, pointer) = match reference.split_once('#') {
            Some((file_part, pointer)) => (file_part, pointer),
            None => (reference.as_str(), ""),
        };
        if file_part.is_empty() && pointer.is_empty() {
            return Err(Error::EmptyReference { file: file.to_string() });
        }

        // Identify the physical target. Internal pointers stay within the
        // *current* file: while recursing inside an external document,
        // its internal references must keep resolving inside it.
        let norm_ptr = normalize_pointer(pointer);
        let target_key = if file_part.is_empty() {
            file.to_string()
        } else {
            let base = Path::new(file).parent().map(Path::to_path_buf);
            self.fetcher.resolve_path(file_part, base.as_deref())?
        };

        // The ref-key is registered before the target file is loaded, so
        // that a cross-file cycle re-entering this reference is caught.
        let ref_key = (target_key.clone(), norm_ptr.clone());
        if self.resolving.contains(&ref_key) {
            tracing::debug!(file, %reference, "reference cycle; leaving $ref in place");
            return Ok(());
        }
        self.resolving.insert(ref_key.clone());

        let resolved = if file_part.is_empty() {
            self.lookup_fragment(&target_key, &norm_ptr)?
        } else {
            self.ensure_loaded(&target_key)?;
            self.touch(&target_key, &norm_ptr);

            let value = self.lookup_fragment(&target_key, &norm_ptr)?;
            self.record_nested_schema_refs(&target_key, &value);
            value
        };

        let resolved = match resolved {
            Value::Mapping(map) => map,
            _ => return Err(Error::NotAMapping { reference: reference.clone() }),
        };
        let name = schema_name(file_part, &norm_ptr);

        // Rewrite the mapping in place: the physical node observed by any
        // other parent keeps its identity, only its entries change.
        let steps = match lookup_mut(&mut self.documents, file, path) {
            Some(Value::Mapping(map)) => {
                *map = Mapping::new();
                for (key, value) in resolved {
                    map.insert(key, value);
                }
                map.remove(&Value::String(REF.to_string()));
                if let Some(name) = &name {
                    map.insert(
                        Value::String(RESOLVED_REF.to_string()),
                        Value::String(format!("#/components/schemas/{name}")),
                    );
                }
                snapshot_keys(map)
            }
            _ => unreachable!("the node held an eligible $ref moments ago"),
        };

        self.descend(file, path, steps)?;

        self.resolving.remove(&ref_key);
        Ok(())
    }

    /// Read, cache, and resolve an external file, exactly once per key.
    /// The newly loaded document is resolved with the same in-flight
    /// state, so cycles spanning files are detected.
    fn ensure_loaded(&mut self, key: &str) -> Result<()> {
        if self.documents.contains_key(key) {
            return Ok(());
        }
        let document = self.fetcher.fetch(key)?;
        self.documents.insert(key.to_string(), document);
        self.resolve_document(key)
    }

    /// Walk |norm_ptr| within the cached document |file|, cloning the
    /// value found. A failed walk under `components/` falls back to the
    /// recovery path before the failure is reported.
    fn lookup_fragment(&mut self, file: &str, norm_ptr: &str) -> Result<Value> {
        if norm_ptr == WHOLE_FILE {
            if let Some(document) = self.documents.get(file) {
                return Ok(document.value().clone());
            }
        }
        let ptr = Pointer::from_str(norm_ptr);
        if let Some(value) = self.documents.get(file).and_then(|d| d.get(&ptr)) {
            return Ok(value.clone());
        }
        if norm_ptr.starts_with("components/") {
            if let Some(value) = self.recover_component(file, norm_ptr, &ptr) {
                return Ok(value);
            }
        }
        Err(Error::PointerNotFound {
            file: file.to_string(),
            pointer: format!("/{norm_ptr}"),
        })
    }

    /// A dangling `components/...` pointer is frequently defined by an
    /// adjacent file rather than the document that references it. Scan
    /// the already-cached documents for the exact pointer, then try the
    /// conventional shared-objects sibling. On a hit the component is
    /// also copied into the root document at the same pointer, so that
    /// subsequent identical references resolve directly.
    fn recover_component(&mut self, file: &str, norm_ptr: &str, ptr: &Pointer) -> Option<Value> {
        tracing::debug!(file, pointer = %ptr, "pointer not in document; attempting recovery");

        let mut found = None;
        for (key, document) in &self.documents {
            if let Some(value) = document.get(ptr) {
                found = Some((key.clone(), value.clone()));
                break;
            }
        }
        if found.is_none() {
            if let Some(key) = self.load_convention_file(file) {
                found = self
                    .documents
                    .get(&key)
                    .and_then(|document| document.get(ptr))
                    .map(|value| (key.clone(), value.clone()));
            }
        }
        let (source, value) = found?;

        tracing::warn!(file, pointer = %ptr, source = %source, "recovered dangling component reference");
        self.touch(&source, norm_ptr);

        let root = self.documents.get_mut(&self.root_key)?;
        if root.get(ptr).is_none() {
            if let Some(slot) = ptr.create(root.value_mut()) {
                *slot = value.clone();
            }
        }
        Some(value)
    }

    /// Load the conventional shared-objects file next to |file|.
    /// Recovery is best-effort: any failure here leaves the original
    /// lookup failure to be reported instead.
    fn load_convention_file(&mut self, file: &str) -> Option<String> {
        let base = Path::new(file).parent()?.to_path_buf();
        let key = self.fetcher.resolve_path(CONVENTION_FILE, Some(&base)).ok()?;
        match self.ensure_loaded(&key) {
            Ok(()) => Some(key),
            Err(err) => {
                tracing::debug!(%key, %err, "conventional objects file could not be loaded");
                None
            }
        }
    }

    /// Record `#/components/schemas/...` references nested inside a
    /// fetched fragment. The target document is resolved before fragments
    /// are fetched from it, so a nested reference usually survives either
    /// as a cycle back-edge (`$ref`) or as the marker stamped onto its
    /// materialized content (`x-resolved-ref`); both keep the named
    /// schema promotable.
    fn record_nested_schema_refs(&mut self, file: &str, fragment: &Value) {
        match fragment {
            Value::Mapping(map) => {
                for marker in [REF, RESOLVED_REF] {
                    if let Some(Value::String(reference)) = doc::get(map, marker) {
                        if let Some(name) = reference.strip_prefix("#/components/schemas/") {
                            let fragment = format!("components/schemas/{name}");
                            self.touch(file, &fragment);
                        }
                    }
                }
                for (_, value) in map.iter() {
                    self.record_nested_schema_refs(file, value);
                }
            }
            Value::Sequence(seq) => {
                for value in seq {
                    self.record_nested_schema_refs(file, value);
                }
            }
            _ => (),
        }
    }

    fn touch(&mut self, file: &str, fragment: &str) {
        self.touched
            .entry(file.to_string())
            .or_default()
            .insert(fragment.to_string());
    }
}

fn lookup<'d>(
    documents: &'d BTreeMap<String, Document>,
    file: &str,
    path: &[Step],
) -> Option<&'d Value> {
    let mut node = documents.get(file)?.value();
    for step in path {
        node = match (node, step) {
            (Value::Mapping(map), Step::Key(key)) => map.get(&Value::String(key.clone()))?,
            (Value::Sequence(seq), Step::Index(index)) => seq.get(*index)?,
            _ => return None,
        };
    }
    Some(node)
}

fn lookup_mut<'d>(
    documents: &'d mut BTreeMap<String, Document>,
    file: &str,
    path: &[Step],
) -> Option<&'d mut Value> {
    let mut node = documents.get_mut(file)?.value_mut();
    for step in path {
        node = match (node, step) {
            (Value::Mapping(map), Step::Key(key)) => map.get_mut(&Value::String(key.clone()))?,
            (Value::Sequence(seq), Step::Index(index)) => seq.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(node)
}

fn identity(map: &Mapping) -> usize {
    map as *const Mapping as usize
}

/// A `$ref` is replaced when it is the mapping's only key, or when it
/// targets an external file. External fragments are whole bodies and
/// overwrite sibling keys; internal references may be used as composition
/// hints (`{$ref, description, nullable}`) and are left alone when
/// accompanied.
fn eligible_ref(map: &Mapping) -> Option<String> {
    let reference = match doc::get(map, REF) {
        Some(Value::String(reference)) => reference,
        _ => return None,
    };
    if map.len() == 1 || is_external(reference) {
        Some(reference.clone())
    } else {
        None
    }
}

/// True when the file part of |reference| names a data file on disk.
fn is_external(reference: &str) -> bool {
    if reference.starts_with('#') {
        return false;
    }
    let file_part = reference.split('#').next().unwrap_or("");
    let lower = file_part.trim().to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml") || lower.ends_with(".json")
}

fn clean_reference(reference: &str) -> String {
    let cleaned: String = reference.chars().filter(|c| *c != '\0').collect();
    cleaned.trim().replace('\\', "/")
}

/// Strip the optional leading `/`; an empty pointer becomes the
/// whole-file sentinel. Textually distinct spellings of one target
/// normalize to one ref-key.
fn normalize_pointer(pointer: &str) -> String {
    let trimmed = pointer.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        WHOLE_FILE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive the schema name a resolved node should be marked with: the
/// last segment of a `components/schemas` pointer when the reference
/// carried one, otherwise the file's basename for whole-file references.
fn schema_name(file_part: &str, norm_ptr: &str) -> Option<String> {
    if norm_ptr != WHOLE_FILE {
        let ptr = Pointer::from_str(norm_ptr);
        let tokens: Vec<&str> = ptr.iter().collect();
        match tokens.as_slice() {
            [.., kind, section, name] if *kind == "components" && *section == "schemas" => {
                Some((*name).to_string())
            }
            _ => None,
        }
    } else if !file_part.is_empty() {
        let stem = Path::new(file_part).file_stem()?.to_str()?;
        Some(stem.to_string())
    } else {
        None
    }
}

/// Snapshot a mapping's keys before descending, so in-place rewrites of
/// its entries cannot disturb the iteration.
fn snapshot_keys(map: &Mapping) -> Vec<Step> {
    map.iter()
        .filter_map(|(key, _)| key.as_str().map(|key| Step::Key(key.to_string())))
        .collect()
}
