//! Instrumentation filter over declaring class names.
//!
//! Decides which frames count as profiled code. Frames of classes that fail
//! the filter stay in the live tree but are merged into their caller when a
//! presentation tree is frozen, and sampled stacks are trimmed to the first
//! passing frame.
//!
//! # Pattern Syntax
//!
//! - `java.util.*` → every class whose name starts with `java.util.`
//! - `com.acme.Service` → exactly that class
//!
//! Class names may use either `.` or `/` as the package separator.

use serde::{Deserialize, Serialize};

/// Whether the patterns select or reject classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Every class passes
    #[default]
    None,
    /// Only matching classes pass
    Include,
    /// Matching classes are rejected
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstrumentationFilter {
    #[serde(default)]
    kind: FilterKind,
    #[serde(default)]
    patterns: Vec<String>,
}

impl InstrumentationFilter {
    /// Filter that passes every class
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn include<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_kind(FilterKind::Include, patterns)
    }

    #[must_use]
    pub fn exclude<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_kind(FilterKind::Exclude, patterns)
    }

    fn with_kind<I, S>(kind: FilterKind, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            kind,
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().replace('/', "."))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// True if no class can be rejected
    #[must_use]
    pub fn is_pass_all(&self) -> bool {
        match self.kind {
            FilterKind::None => true,
            FilterKind::Exclude => self.patterns.is_empty(),
            FilterKind::Include => false,
        }
    }

    /// Whether frames of `class_name` count as profiled code
    #[must_use]
    pub fn passes(&self, class_name: &str) -> bool {
        if self.kind == FilterKind::None {
            return true;
        }

        let normalized;
        let name = if class_name.contains('/') {
            normalized = class_name.replace('/', ".");
            normalized.as_str()
        } else {
            class_name
        };

        let matched = self.patterns.iter().any(|p| pattern_matches(p, name));
        match self.kind {
            FilterKind::Include => matched,
            FilterKind::Exclude => !matched,
            FilterKind::None => true,
        }
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}
