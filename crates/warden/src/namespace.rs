//! The fixed registry of collectible entity categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A category of collectible entity and its policy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Organization,
    Enterprise,
    Repository,
    Member,
    Actions,
    RunnerGroup,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Namespace::Organization,
        Namespace::Enterprise,
        Namespace::Repository,
        Namespace::Member,
        Namespace::Actions,
        Namespace::RunnerGroup,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Organization => "organization",
            Namespace::Enterprise => "enterprise",
            Namespace::Repository => "repository",
            Namespace::Member => "member",
            Namespace::Actions => "actions",
            Namespace::RunnerGroup => "runner_group",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("invalid namespace {0}")]
    Invalid(String),
}

impl FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| NamespaceError::Invalid(s.to_string()))
    }
}

/// Validate a caller-selected namespace list.
///
/// Fails on the first unknown name. Duplicates are dropped, first occurrence
/// wins; an empty selection means every namespace.
pub fn validate_namespaces<S: AsRef<str>>(names: &[S]) -> Result<Vec<Namespace>, NamespaceError> {
    if names.is_empty() {
        return Ok(Namespace::ALL.to_vec());
    }

    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let ns: Namespace = name.as_ref().trim().parse()?;
        if !selected.contains(&ns) {
            selected.push(ns);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_display_and_from_str() {
        for ns in Namespace::ALL {
            assert_eq!(ns.to_string().parse::<Namespace>(), Ok(ns));
        }
        assert_eq!(
            serde_json::to_string(&Namespace::RunnerGroup).expect("serialize"),
            r#""runner_group""#
        );
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let err = validate_namespaces(&["organization", "pipelines"]).expect_err("invalid");
        assert_eq!(err, NamespaceError::Invalid("pipelines".to_string()));
        assert_eq!(err.to_string(), "invalid namespace pipelines");
    }

    #[test]
    fn empty_selection_means_all_and_duplicates_collapse() {
        let none: [&str; 0] = [];
        assert_eq!(validate_namespaces(&none).expect("valid"), Namespace::ALL.to_vec());
        assert_eq!(
            validate_namespaces(&["member", "member", "actions"]).expect("valid"),
            vec![Namespace::Member, Namespace::Actions]
        );
    }
}
