//! Coercion problem types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single coercion problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Path to the offending value (object keys and array indices)
    pub path: Vec<String>,
    /// The predicate that failed (e.g., "integer?", "required-key")
    pub predicate: String,
    /// The offending value (`null` when a required key is missing)
    pub value: Value,
}

impl Problem {
    /// Create a new problem.
    pub fn new(path: Vec<String>, predicate: impl Into<String>, value: Value) -> Self {
        Self {
            path,
            predicate: predicate.into(),
            value,
        }
    }

    /// Dotted rendering of the path, `"."` for the root.
    pub fn field(&self) -> String {
        if self.path.is_empty() {
            ".".to_string()
        } else {
            self.path.join(".")
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: failed {} with {}", self.field(), self.predicate, self.value)
    }
}

/// All problems found while coercing one value.
///
/// Serializes transparently as a list of [`Problem`]s.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, thiserror::Error)]
#[serde(transparent)]
#[error("coercion failed: {} problem(s)", .0.len())]
pub struct Problems(pub Vec<Problem>);

impl Problems {
    /// Create from a list of problems.
    pub fn new(problems: Vec<Problem>) -> Self {
        Self(problems)
    }

    /// Check if there are any problems.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of problems.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Add a problem.
    pub fn add(&mut self, problem: Problem) {
        self.0.push(problem);
    }

    /// Iterate over the problems.
    pub fn iter(&self) -> std::slice::Iter<'_, Problem> {
        self.0.iter()
    }

    /// Problems reported for the given dotted field path.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Problem> + 'a {
        self.0.iter().filter(move |p| p.field() == field)
    }
}

impl IntoIterator for Problems {
    type Item = Problem;
    type IntoIter = std::vec::IntoIter<Problem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
