//! Core variables (options) declared through `SET_VARIABLES`
//!
//! A declaration value reads `"Description; first|second|third"`. The first
//! choice is the default.

use std::collections::BTreeMap;
use std::ffi::{CString, c_char};

use hashbrown::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    #[error("no variable named \"{0}\"")]
    UnknownKey(String),

    #[error("\"{value}\" is not a choice of \"{key}\"")]
    UnknownValue { key: String, value: String },
}

/// One core option and its current selection.
#[derive(Debug, Clone)]
pub struct RetroVariable {
    key: String,
    description: String,
    choices: Vec<String>,
    c_choices: Vec<CString>,
    current: usize,
    changed: bool,
}

impl RetroVariable {
    /// Parse a declaration. A value without `"; "` becomes a single choice
    /// described as `invalid: <value>`.
    pub fn parse(key: &str, value: &str) -> Self {
        let (description, choices) = match value.split_once("; ") {
            Some((desc, list)) => (desc.to_string(), list.split('|').map(str::to_string).collect()),
            None => {
                warn!("invalid set_var: \"{}\" = \"{}\"", key, value);
                (format!("invalid: {value}"), vec![value.to_string()])
            }
        };
        let c_choices = choices
            .iter()
            .map(|c: &String| CString::new(c.as_str()).unwrap_or_default())
            .collect();
        Self {
            key: key.to_string(),
            description,
            choices,
            c_choices,
            current: 0,
            changed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn value(&self) -> &str {
        self.choices.get(self.current).or(self.choices.first()).map_or("", String::as_str)
    }

    fn value_ptr(&self) -> *const c_char {
        self.c_choices
            .get(self.current)
            .or(self.c_choices.first())
            .map_or(std::ptr::null(), |c| c.as_ptr())
    }

    fn select(&mut self, index: usize) {
        self.current = index;
        self.changed = true;
    }

    fn select_value(&mut self, value: &str) -> bool {
        match self.choices.iter().position(|c| c == value) {
            Some(i) => {
                self.select(i);
                true
            }
            None => false,
        }
    }
}

/// All variables of one core, keyed by name.
#[derive(Debug, Default)]
pub struct Variables {
    vars: BTreeMap<String, RetroVariable>,
    overrides: HashMap<String, String>,
}

impl Variables {
    /// Create an empty set. `overrides` preselect values as variables are declared.
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self {
            vars: BTreeMap::new(),
            overrides,
        }
    }

    /// Declare a variable. Returns false (and keeps the first) on a duplicate key.
    pub fn declare(&mut self, key: &str, value: &str) -> bool {
        if self.vars.contains_key(key) {
            warn!("SET_VARIABLES: duplicate variable \"{}\"", key);
            return false;
        }
        let mut var = RetroVariable::parse(key, value);
        if let Some(wanted) = self.overrides.get(key)
            && !var.select_value(wanted)
        {
            warn!("override \"{}\" to \"{}\": not in choices", key, wanted);
        }
        self.vars.insert(key.to_string(), var);
        true
    }

    pub fn get(&self, key: &str) -> Option<&RetroVariable> {
        self.vars.get(key)
    }

    /// C string of the current value of `key`, valid until the set changes.
    pub(crate) fn value_ptr(&self, key: &str) -> Option<*const c_char> {
        self.vars.get(key).map(RetroVariable::value_ptr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetroVariable> {
        self.vars.values()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), VariableError> {
        let var = self
            .vars
            .get_mut(key)
            .ok_or_else(|| VariableError::UnknownKey(key.to_string()))?;
        if var.select_value(value) {
            Ok(())
        } else {
            Err(VariableError::UnknownValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
    }

    /// Advance `key` to its next choice, wrapping to the first.
    pub fn set_to_next(&mut self, key: &str) -> Result<(), VariableError> {
        let var = self
            .vars
            .get_mut(key)
            .ok_or_else(|| VariableError::UnknownKey(key.to_string()))?;
        let next = var.current + 1;
        var.select(if next >= var.choices.len() { 0 } else { next });
        Ok(())
    }

    /// Answer `GET_VARIABLE_UPDATE`: true if any variable changed since the
    /// last query (clearing the flags), or if `after_reset` and any variable
    /// is away from its default.
    pub fn take_update(&mut self, after_reset: bool) -> bool {
        let mut changed = false;
        for var in self.vars.values_mut() {
            if var.changed {
                changed = true;
                var.changed = false;
            }
            if after_reset && var.current != 0 {
                changed = true;
            }
        }
        changed
    }
}
