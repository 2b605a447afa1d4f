//! Dispatch registry: operation name + type tag -> implementation

use crate::hierarchy::{TypeHierarchy, OBJECT};
use crate::RegistryError;
use std::collections::{BTreeMap, HashMap};

/// A registered entry: either an implementation or an explicit marker that
/// the operation is unsupported for the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<F> {
    Implemented(F),
    LookupBound(String),
}

impl<F> Dispatch<F> {
    pub fn implemented(&self) -> Result<&F, RegistryError> {
        match self {
            Dispatch::Implemented(f) => Ok(f),
            Dispatch::LookupBound(msg) => Err(RegistryError::LookupBound(msg.clone())),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Dispatch::LookupBound(_))
    }

    pub fn map<G>(self, f: impl FnOnce(F) -> G) -> Dispatch<G> {
        match self {
            Dispatch::Implemented(x) => Dispatch::Implemented(f(x)),
            Dispatch::LookupBound(msg) => Dispatch::LookupBound(msg),
        }
    }

    pub fn by_ref(&self) -> Dispatch<&F> {
        match self {
            Dispatch::Implemented(x) => Dispatch::Implemented(x),
            Dispatch::LookupBound(msg) => Dispatch::LookupBound(msg.clone()),
        }
    }
}

/// Operation table keyed by name, then by type tag.
#[derive(Debug, Clone)]
pub struct DispatchRegistry<F> {
    context: String,
    types: TypeHierarchy,
    table: BTreeMap<String, HashMap<String, Dispatch<F>>>,
}

impl<F> DispatchRegistry<F> {
    pub fn new(context: impl Into<String>, types: TypeHierarchy) -> Self {
        Self {
            context: context.into(),
            types,
            table: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn types(&self) -> &TypeHierarchy {
        &self.types
    }

    fn check_tag(&self, tag: &str) -> Result<(), RegistryError> {
        if self.types.contains(tag) {
            Ok(())
        } else {
            Err(RegistryError::UnknownType(tag.to_string()))
        }
    }

    /// Register (or replace) the implementation of `name` for `tag`.
    pub fn register(&mut self, name: &str, tag: &str, imp: F) -> Result<(), RegistryError> {
        self.insert(name, tag, Dispatch::Implemented(imp))
    }

    /// Mark `name` as unsupported for `tag`.
    pub fn register_bound(&mut self, name: &str, tag: &str, msg: impl Into<String>) -> Result<(), RegistryError> {
        self.insert(name, tag, Dispatch::LookupBound(msg.into()))
    }

    pub fn insert(&mut self, name: &str, tag: &str, entry: Dispatch<F>) -> Result<(), RegistryError> {
        self.check_tag(tag)?;
        self.table
            .entry(name.to_string())
            .or_default()
            .insert(tag.to_string(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str, tag: &str) -> Option<Dispatch<F>> {
        let by_tag = self.table.get_mut(name)?;
        let removed = by_tag.remove(tag);
        if by_tag.is_empty() {
            self.table.remove(name);
        }
        removed
    }

    /// Most specific entry along the ancestry of `tag`, if any.
    pub fn resolve(&self, name: &str, tag: &str) -> Result<Option<&Dispatch<F>>, RegistryError> {
        let Some(by_tag) = self.table.get(name) else {
            return Ok(None);
        };
        for ancestor in self.types.mro(tag)? {
            if let Some(entry) = by_tag.get(&ancestor) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Implementation of `name` for `tag`, falling back along the ancestry to
    /// `object`.
    pub fn dispatch(&self, name: &str, tag: &str) -> Result<&F, RegistryError> {
        match self.resolve(name, tag)? {
            Some(entry) => entry.implemented(),
            None => Err(RegistryError::FunctionLookup {
                name: name.to_string(),
                context: self.context.clone(),
            }),
        }
    }

    /// Tag the entry resolved for `name` was registered under.
    pub fn owner(&self, name: &str, tag: &str) -> Result<Option<String>, RegistryError> {
        let Some(by_tag) = self.table.get(name) else {
            return Ok(None);
        };
        Ok(self.types.mro(tag)?.into_iter().find(|t| by_tag.contains_key(t)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn is_registered(&self, name: &str, tag: &str) -> bool {
        self.table.get(name).is_some_and(|t| t.contains_key(tag))
    }

    /// Register `imp` as the fallback for every type.
    pub fn register_default(&mut self, name: &str, imp: F) -> Result<(), RegistryError> {
        self.register(name, OBJECT, imp)
    }
}
