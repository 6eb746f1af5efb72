//! Param/const symbol binding.
//!
//! A [`SymbolicContext`] maps variable names onto two disjoint, numbered sets:
//!
//! - params, one value per fit instance, rendered as `params[<index>]`
//! - consts, one row per data point, rendered as `consts[i*nconst+<index>]`
//!
//! The array names, the row expression (`i`) and the row stride (`nconst`) come from
//! [`SymbolNames`]. The context is only read while rendering kernel text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::SymbolError;

/// Which set a name is bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Param,
    Const,
}

impl SymbolKind {
    fn label(self) -> &'static str {
        match self {
            SymbolKind::Param => "param",
            SymbolKind::Const => "const",
        }
    }
}

/// Identifiers used when rendering bound names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolNames {
    /// Array holding the params of the current instance
    pub params: String,
    /// Array holding the consts of all data rows
    pub consts: String,
    /// Expression selecting the current data row
    pub consts_iterable_by: String,
    /// Name of the number of consts per row
    pub nconst: String,
}

impl Default for SymbolNames {
    fn default() -> Self {
        SymbolNames {
            params: "params".to_string(),
            consts: "consts".to_string(),
            consts_iterable_by: "i".to_string(),
            nconst: "nconst".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicContext {
    names: SymbolNames,
    params: HashMap<String, usize>,
    consts: HashMap<String, usize>,
    kinds: HashMap<String, SymbolKind>,
}

impl SymbolicContext {
    pub fn new() -> Self {
        SymbolicContext::default()
    }

    pub fn with_names(names: SymbolNames) -> Self {
        SymbolicContext {
            names,
            ..SymbolicContext::default()
        }
    }

    pub fn names(&self) -> &SymbolNames {
        &self.names
    }

    /// Binds `name` to const index `index`.
    pub fn insert_const(&mut self, name: &str, index: usize) -> Result<(), SymbolError> {
        self.insert(name, index, SymbolKind::Const)
    }

    /// Binds `name` to param index `index`.
    pub fn insert_param(&mut self, name: &str, index: usize) -> Result<(), SymbolError> {
        self.insert(name, index, SymbolKind::Param)
    }

    // Names are stored lowercase, matching normalized expression text.
    fn insert(&mut self, name: &str, index: usize, kind: SymbolKind) -> Result<(), SymbolError> {
        let name = name.to_lowercase();
        if let Some(existing) = self.kinds.get(&name) {
            return Err(SymbolError::DuplicateName {
                name,
                kind: existing.label().to_string(),
            });
        }

        let set = match kind {
            SymbolKind::Param => &mut self.params,
            SymbolKind::Const => &mut self.consts,
        };
        if let Some((existing, _)) = set.iter().find(|(_, i)| **i == index) {
            return Err(SymbolError::DuplicateIndex {
                kind: kind.label().to_string(),
                index,
                existing: existing.clone(),
            });
        }

        set.insert(name.clone(), index);
        self.kinds.insert(name, kind);
        Ok(())
    }

    pub fn kind(&self, name: &str) -> Option<SymbolKind> {
        self.kinds.get(name).copied()
    }

    /// Renders a bound name as a GLSL buffer access.
    pub fn get_glsl_var_name(&self, name: &str) -> Result<String, SymbolError> {
        match self.kind(name) {
            Some(SymbolKind::Param) => Ok(format!(
                "{}[{}]",
                self.names.params,
                self.get_params_index(name)?
            )),
            Some(SymbolKind::Const) => Ok(format!(
                "{}[{}*{}+{}]",
                self.names.consts,
                self.names.consts_iterable_by,
                self.names.nconst,
                self.get_consts_index(name)?
            )),
            None => Err(SymbolError::UnknownName(name.to_string())),
        }
    }

    pub fn get_params_index(&self, name: &str) -> Result<usize, SymbolError> {
        self.params
            .get(name)
            .copied()
            .ok_or_else(|| SymbolError::UnknownName(name.to_string()))
    }

    pub fn get_consts_index(&self, name: &str) -> Result<usize, SymbolError> {
        self.consts
            .get(name)
            .copied()
            .ok_or_else(|| SymbolError::UnknownName(name.to_string()))
    }

    pub fn get_params_name(&self, index: usize) -> Result<&str, SymbolError> {
        Self::name_at(&self.params, index, SymbolKind::Param)
    }

    pub fn get_consts_name(&self, index: usize) -> Result<&str, SymbolError> {
        Self::name_at(&self.consts, index, SymbolKind::Const)
    }

    fn name_at(
        set: &HashMap<String, usize>,
        index: usize,
        kind: SymbolKind,
    ) -> Result<&str, SymbolError> {
        set.iter()
            .find(|(_, i)| **i == index)
            .map(|(name, _)| name.as_str())
            .ok_or(SymbolError::UnknownIndex {
                kind: kind.label().to_string(),
                index,
            })
    }

    /// Param names ordered by index.
    pub fn params(&self) -> Vec<&str> {
        Self::ordered(&self.params)
    }

    /// Const names ordered by index.
    pub fn consts(&self) -> Vec<&str> {
        Self::ordered(&self.consts)
    }

    fn ordered(set: &HashMap<String, usize>) -> Vec<&str> {
        let mut entries: Vec<(&String, &usize)> = set.iter().collect();
        entries.sort_by_key(|(_, index)| **index);
        entries.into_iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn nparams(&self) -> usize {
        self.params.len()
    }

    pub fn nconsts(&self) -> usize {
        self.consts.len()
    }
}
