//! Attribute values, local attribute maps, and the inherited-value
//! resolver.
//!
//! Resolution is lazy and uncached: every query walks local values, then
//! the ancestor chain in lattice order, then the model-wide defaults.
//! Set-valued attributes are special: instead of the nearest value
//! shadowing the rest, sets union across the whole chain, which is what
//! lets relation subtypes accumulate properties from several supertypes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lattice::TypeLattice;
use crate::registry::ObjectId;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A color name or `#rrggbb` string; kept distinct from `Text` so
    /// display layers can validate it.
    Color(String),
    /// An unordered set of strings. Unions across the inheritance chain.
    Set(BTreeSet<String>),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }

    pub fn color(value: impl Into<String>) -> Self {
        AttrValue::Color(value.into())
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(value) | AttrValue::Color(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttrValue::Set(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(value) | AttrValue::Color(value) => write!(f, "{value}"),
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Float(value) => write!(f, "{value}"),
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Set(items) => {
                write!(f, "{{")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrSource {
    /// Set directly on the queried object.
    Local,
    /// Inherited from the named ancestor (for sets, the nearest
    /// contributing ancestor).
    Inherited(ObjectId),
    /// From the model-wide defaults.
    Default,
}

/// An object's local attribute bindings. Deterministically ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrMap {
    entries: BTreeMap<String, AttrValue>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.entries.insert(name.into(), value);
    }

    /// Remove a local binding. Returns whether one existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve one attribute for `id`: local value first, then ancestors in
/// lattice order, then `defaults`. Set values union across every holder in
/// the chain (including a set default); the first non-set value found wins
/// outright. `locals` maps any object id to its local attribute map.
pub fn resolve_with<'a, F>(
    id: ObjectId,
    name: &str,
    lattice: &TypeLattice,
    locals: F,
    defaults: &'a BTreeMap<String, AttrValue>,
) -> Result<(AttrValue, AttrSource)>
where
    F: Fn(ObjectId) -> Option<&'a AttrMap>,
{
    let mut chain: Vec<(ObjectId, AttrSource)> = vec![(id, AttrSource::Local)];
    chain.extend(
        lattice
            .ancestors_of(id)
            .into_iter()
            .map(|ancestor| (ancestor, AttrSource::Inherited(ancestor))),
    );

    let mut merged: Option<(BTreeSet<String>, AttrSource)> = None;
    for (holder, source) in chain {
        let Some(value) = locals(holder).and_then(|attrs| attrs.get(name)) else {
            continue;
        };
        match value {
            AttrValue::Set(items) => {
                if let Some((union, _)) = &mut merged {
                    union.extend(items.iter().cloned());
                } else {
                    merged = Some((items.clone(), source));
                }
            }
            // a non-set value further up is shadowed by the accumulating set
            other => {
                if merged.is_none() {
                    return Ok((other.clone(), source));
                }
            }
        }
    }

    if let Some((mut union, source)) = merged {
        if let Some(AttrValue::Set(items)) = defaults.get(name) {
            union.extend(items.iter().cloned());
        }
        return Ok((AttrValue::Set(union), source));
    }
    if let Some(value) = defaults.get(name) {
        return Ok((value.clone(), AttrSource::Default));
    }
    Err(Error::UndefinedAttribute {
        id,
        name: name.to_string(),
    })
}

/// Every attribute name visible on `id`: local names, then inherited names
/// in chain order, then default names, deduplicated keeping the first.
pub fn effective_keys<'a, F>(
    id: ObjectId,
    lattice: &TypeLattice,
    locals: F,
    defaults: &'a BTreeMap<String, AttrValue>,
) -> Vec<String>
where
    F: Fn(ObjectId) -> Option<&'a AttrMap>,
{
    let mut keys: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut holders = vec![id];
    holders.extend(lattice.ancestors_of(id));
    for holder in holders {
        let Some(attrs) = locals(holder) else { continue };
        for name in attrs.keys() {
            if seen.insert(name.to_string()) {
                keys.push(name.to_string());
            }
        }
    }
    for name in defaults.keys() {
        if seen.insert(name.clone()) {
            keys.push(name.clone());
        }
    }
    keys
}
