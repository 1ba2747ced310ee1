use serde::{
    Deserialize,
    Serialize,
};

/// Label every value outside the allow-list collapses into.
pub const OTHER_CATEGORY: &str = "other";

/// Adducts with more than 100 examples in the reference CCS database.
pub const DEFAULT_COMMON_ADDUCTS: [&str; 6] = [
    "[M+NH4]+",
    "[M+Na-2H]-",
    "[M+K]+",
    "[M-H]-",
    "[M+Na]+",
    "[M+H]+",
];

/// Maps categorical values outside a fixed allow-list to [`OTHER_CATEGORY`].
///
/// Stateless apart from the allow-list, so the same instance is used at
/// training and inference time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCollapser {
    allowed: Vec<String>,
}

impl Default for CategoryCollapser {
    fn default() -> Self {
        Self::new(DEFAULT_COMMON_ADDUCTS.iter().map(|s| s.to_string()))
    }
}

impl CategoryCollapser {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        let mut allowed: Vec<String> = allowed.into_iter().collect();
        allowed.sort_unstable();
        allowed.dedup();
        Self { allowed }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn collapse_one<'a>(&self, value: &'a str) -> &'a str {
        if value == OTHER_CATEGORY || self.allowed.iter().any(|a| a == value) {
            value
        } else {
            OTHER_CATEGORY
        }
    }

    pub fn collapse<S: AsRef<str>>(&self, values: &[S]) -> Vec<String> {
        values
            .iter()
            .map(|v| self.collapse_one(v.as_ref()).to_string())
            .collect()
    }

    /// Every label the collapser can emit: the allow-list plus [`OTHER_CATEGORY`].
    pub fn vocabulary(&self) -> Vec<String> {
        let mut vocab = self.allowed.clone();
        if !vocab.iter().any(|v| v == OTHER_CATEGORY) {
            vocab.push(OTHER_CATEGORY.to_string());
        }
        vocab
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_uncommon_adducts() {
        let collapser = CategoryCollapser::default();
        let out = collapser.collapse(&["[M+H]+", "[M+2H]2+", "[M-H]-", "[M+Li]+"]);
        assert_eq!(out, vec!["[M+H]+", "other", "[M-H]-", "other"]);
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let collapser = CategoryCollapser::default();
        let once = collapser.collapse(&["[M+H]+", "[M+2H]2+", "[M+Na]+", "weird"]);
        let twice = collapser.collapse(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_vocabulary_contains_other_once() {
        let collapser = CategoryCollapser::new(vec!["a".to_string(), "other".to_string()]);
        let vocab = collapser.vocabulary();
        assert_eq!(vocab.iter().filter(|v| *v == OTHER_CATEGORY).count(), 1);
        assert_eq!(CategoryCollapser::default().vocabulary().len(), 7);
    }
}
