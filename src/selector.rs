//! Label selectors
//!
//! A selector is a conjunction of exact label matches and set-based
//! requirements. Construction is validated separately from matching so that a
//! malformed selector surfaces as [`Error::InvalidSelector`] instead of
//! silently matching nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Set-based requirement operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// Label value is one of `values`
    In,
    /// Label is absent or its value is not one of `values`
    NotIn,
    /// Label is present
    Exists,
    /// Label is absent
    DoesNotExist,
}

/// A single set-based requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    /// Label key
    pub key: String,
    /// Operator
    pub operator: SelectorOperator,
    /// Values for `In`/`NotIn`
    #[serde(default)]
    pub values: Vec<String>,
}

/// Label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Selector with no requirements; matches everything.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Add an exact label match.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Add a set-based requirement.
    #[must_use]
    pub fn with_requirement(
        mut self,
        key: impl Into<String>,
        operator: SelectorOperator,
        values: Vec<String>,
    ) -> Self {
        self.match_expressions.push(SelectorRequirement {
            key: key.into(),
            operator,
            values,
        });
        self
    }

    /// Check that the selector is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] for empty keys, `In`/`NotIn` without
    /// values, or `Exists`/`DoesNotExist` with values.
    pub fn validate(&self) -> Result<()> {
        if self.match_labels.keys().any(String::is_empty) {
            return Err(Error::InvalidSelector("empty label key".to_string()));
        }
        for req in &self.match_expressions {
            if req.key.is_empty() {
                return Err(Error::InvalidSelector("empty requirement key".to_string()));
            }
            match req.operator {
                SelectorOperator::In | SelectorOperator::NotIn if req.values.is_empty() => {
                    return Err(Error::InvalidSelector(format!(
                        "{:?} requirement on {} needs at least one value",
                        req.operator, req.key
                    )));
                }
                SelectorOperator::Exists | SelectorOperator::DoesNotExist
                    if !req.values.is_empty() =>
                {
                    return Err(Error::InvalidSelector(format!(
                        "{:?} requirement on {} must not have values",
                        req.operator, req.key
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether the labels satisfy every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let exact = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        exact
            && self.match_expressions.iter().all(|req| {
                let value = labels.get(&req.key);
                match req.operator {
                    SelectorOperator::In => value.is_some_and(|v| req.values.contains(v)),
                    SelectorOperator::NotIn => value.map_or(true, |v| !req.values.contains(v)),
                    SelectorOperator::Exists => value.is_some(),
                    SelectorOperator::DoesNotExist => value.is_none(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(LabelSelector::everything().matches(&labels(&[("a", "b")])));
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
    }

    #[test]
    fn test_match_labels() {
        let sel = LabelSelector::default().with_label("app", "web");
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(!sel.matches(&labels(&[("app", "db")])));
        assert!(!sel.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_match_expressions() {
        let sel = LabelSelector::default()
            .with_requirement("tier", SelectorOperator::In, vec!["front".into(), "edge".into()])
            .with_requirement("canary", SelectorOperator::DoesNotExist, vec![]);
        assert!(sel.matches(&labels(&[("tier", "edge")])));
        assert!(!sel.matches(&labels(&[("tier", "edge"), ("canary", "1")])));
        assert!(!sel.matches(&labels(&[("tier", "back")])));

        let not_in = LabelSelector::default().with_requirement(
            "role",
            SelectorOperator::NotIn,
            vec!["trialSetup".into()],
        );
        assert!(not_in.matches(&BTreeMap::new()));
        assert!(!not_in.matches(&labels(&[("role", "trialSetup")])));
    }

    #[test]
    fn test_validate_rejects_malformed_requirements() {
        let missing_values =
            LabelSelector::default().with_requirement("a", SelectorOperator::In, vec![]);
        assert!(matches!(missing_values.validate(), Err(Error::InvalidSelector(_))));

        let extra_values = LabelSelector::default().with_requirement(
            "a",
            SelectorOperator::Exists,
            vec!["x".into()],
        );
        assert!(extra_values.validate().is_err());

        let empty_key = LabelSelector::default().with_label("", "x");
        assert!(empty_key.validate().is_err());

        assert!(LabelSelector::default().with_label("a", "b").validate().is_ok());
    }
}
