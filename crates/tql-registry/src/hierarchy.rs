//! Type tags and their ancestry

use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root of every hierarchy.
pub const OBJECT: &str = "object";

/// Named dispatch classes with ordered parent lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeHierarchy {
    parents: HashMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tag` under `parents` (none means directly under `object`).
    pub fn add(&mut self, tag: &str, parents: &[&str]) -> Result<(), RegistryError> {
        if tag == OBJECT {
            return Err(RegistryError::InvalidHierarchy(format!("{} is implicit", OBJECT)));
        }
        for parent in parents {
            if !self.contains(parent) {
                return Err(RegistryError::UnknownType(parent.to_string()));
            }
        }

        let previous = self
            .parents
            .insert(tag.to_string(), parents.iter().map(|p| p.to_string()).collect());

        // reject orders C3 cannot linearize
        if let Err(e) = self.mro(tag) {
            match previous {
                Some(old) => self.parents.insert(tag.to_string(), old),
                None => self.parents.remove(tag),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        tag == OBJECT || self.parents.contains_key(tag)
    }

    pub fn parents(&self, tag: &str) -> Option<&[String]> {
        self.parents.get(tag).map(|p| p.as_slice())
    }

    /// C3 linearization of `tag`, most specific first, ending in `object`.
    pub fn mro(&self, tag: &str) -> Result<Vec<String>, RegistryError> {
        if tag == OBJECT {
            return Ok(vec![OBJECT.to_string()]);
        }
        let parents = self
            .parents
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownType(tag.to_string()))?;

        let bases: Vec<String> = if parents.is_empty() {
            vec![OBJECT.to_string()]
        } else {
            parents.clone()
        };

        let mut sequences = bases.iter().map(|p| self.mro(p)).collect::<Result<Vec<_>, _>>()?;
        sequences.push(bases);

        let mut out = vec![tag.to_string()];
        loop {
            sequences.retain(|s| !s.is_empty());
            if sequences.is_empty() {
                return Ok(out);
            }

            // first head that does not appear in the tail of any sequence
            let head = sequences
                .iter()
                .map(|s| &s[0])
                .find(|candidate| !sequences.iter().any(|s| s[1..].contains(*candidate)))
                .cloned()
                .ok_or_else(|| {
                    RegistryError::InvalidHierarchy(format!("cannot linearize ancestry of {}", tag))
                })?;

            for seq in sequences.iter_mut() {
                if seq[0] == head {
                    seq.remove(0);
                }
            }
            out.push(head);
        }
    }
}
