use serde_yaml::{Mapping, Value};

/// Pointer is a parsed JSON pointer: a sequence of mapping keys.
///
/// OpenAPI references only ever traverse mappings
/// (`/components/schemas/Pet`), so every token is a property name and a
/// pointer step into a sequence or scalar is simply a miss. RFC 6901
/// escaping (`~0` for `~`, `~1` for `/`) is honored; the leading `/` is
/// optional.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer(Vec<String>);

impl Pointer {
    /// Builds an empty Pointer which references the document root.
    pub fn empty() -> Pointer {
        Pointer(Vec::new())
    }

    /// Builds a Pointer from the given string, which is an encoded JSON pointer.
    pub fn from_str(s: &str) -> Pointer {
        if s.is_empty() {
            return Pointer(Vec::new());
        }
        Pointer(
            s.split('/')
                .skip(if s.starts_with('/') { 1 } else { 0 })
                .map(|token| token.replace("~1", "/").replace("~0", "~"))
                .collect(),
        )
    }

    /// Iterate over pointer tokens.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    // Push a new token onto the Pointer.
    pub fn push(&mut self, token: impl Into<String>) -> &mut Pointer {
        self.0.push(token.into());
        self
    }

    /// Query an existing value at the pointer location within |root|.
    /// Returns None if the pointed location (or a parent thereof) does not
    /// exist or is not a mapping.
    pub fn query<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let mut node = root;
        for token in self.iter() {
            node = match node {
                Value::Mapping(map) => map.get(&Value::String(token.to_string()))?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Locate the pointer within |root|, creating any missing intermediate
    /// mappings. A freshly created location is Null. Returns None only if
    /// an existing location along the path is neither a mapping nor Null.
    pub fn create<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        let mut node = root;
        for token in self.iter() {
            if let Value::Null = node {
                *node = Value::Mapping(Mapping::new());
            }
            node = match node {
                Value::Mapping(map) => {
                    let key = Value::String(token.to_string());
                    if !map.contains_key(&key) {
                        map.insert(key.clone(), Value::Null);
                    }
                    map.get_mut(&key)?
                }
                _ => return None,
            };
        }
        Some(node)
    }
}

impl<S: AsRef<str>> From<S> for Pointer {
    fn from(s: S) -> Self {
        Pointer::from_str(s.as_ref())
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for token in self.iter() {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}
