//! Equality-based label selectors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A set of `key=value` requirements, all of which must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector(BTreeMap<String, String>);

/// Error parsing a `key=value,...` selector string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid label selector term {0:?}, expected key=value")]
pub struct SelectorParseError(pub String);

impl Selector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Combines two selectors; on key conflicts `self` wins.
    #[must_use]
    pub fn merged(&self, extra: &Selector) -> Selector {
        let mut labels = extra.0.clone();
        labels.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Selector(labels)
    }

    /// Whether an object carrying `labels` is selected.
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

impl From<&BTreeMap<String, String>> for Selector {
    fn from(labels: &BTreeMap<String, String>) -> Self {
        Self(labels.clone())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&terms.join(","))
    }
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    /// Parses `key=value,key2=value2`. The empty string is the empty selector.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = BTreeMap::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .filter(|(k, _)| !k.trim().is_empty())
                .ok_or_else(|| SelectorParseError(term.to_string()))?;
            labels.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let selector: Selector = "release=test-env-42, app=api".parse().unwrap();
        assert_eq!(selector.to_string(), "app=api,release=test-env-42");
        assert!("".parse::<Selector>().unwrap().is_empty());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let selector: Selector = "a=b=c".parse().unwrap();
        assert_eq!(selector.labels()["a"], "b=c");
    }

    #[test]
    fn test_parse_rejects_bad_terms() {
        assert!("app".parse::<Selector>().is_err());
        assert!("=api".parse::<Selector>().is_err());
    }

    #[test]
    fn test_merged_prefers_own_labels() {
        let own: Selector = "app=api".parse().unwrap();
        let extra: Selector = "app=other,release=r1".parse().unwrap();
        assert_eq!(own.merged(&extra).to_string(), "app=api,release=r1");
    }

    #[test]
    fn test_matches() {
        let selector: Selector = "app=api".parse().unwrap();
        let labels = BTreeMap::from([
            ("app".to_string(), "api".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        assert!(selector.matches(Some(&labels)));
        assert!(!selector.matches(None));
        assert!(Selector::default().matches(None));
    }
}
