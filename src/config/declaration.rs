//! The generic declaration model.
//!
//! A declaration is one block of the configuration file: a mapping from field
//! name to an arbitrary value. The decoder keeps both the order of the blocks
//! and the order of the fields inside each block.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

/// One configuration block.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    index: usize,
    fields: Mapping,
}

impl Declaration {
    /// Create a declaration at the given position in the source sequence.
    pub fn new(index: usize, fields: Mapping) -> Self {
        Self { index, fields }
    }

    /// Position of this declaration in the configuration file (zero based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// True if the declaration carries `field`, whatever its value.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Raw value of `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field names in source order. Non-string keys are skipped.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().filter_map(Value::as_str)
    }

    /// Remap the whole declaration into a typed structure.
    ///
    /// Field names must match exactly. Fields the target does not declare are
    /// ignored; a value of the wrong type is an error.
    pub fn remap<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_value(Value::Mapping(self.fields.clone()))
    }
}

impl std::fmt::Display for Declaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {{", self.index)?;
        for (i, name) in self.field_names().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", name)?;
        }
        write!(f, "}}")
    }
}

/// The ordered sequence of declarations decoded from one configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declarations(Vec<Declaration>);

impl Declarations {
    pub fn new(items: Vec<Mapping>) -> Self {
        Self(
            items
                .into_iter()
                .enumerate()
                .map(|(index, fields)| Declaration::new(index, fields))
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Declaration> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Declarations {
    type Item = &'a Declaration;
    type IntoIter = std::slice::Iter<'a, Declaration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
