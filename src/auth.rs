//! Sender authorization against a static allow-list.

use std::collections::HashSet;

/// Allow-list of sender identifiers (phone numbers or UUIDs), loaded once at
/// startup from a comma-separated string. Membership is case-insensitive and
/// ignores surrounding whitespace. An empty list denies everyone.
#[derive(Debug, Clone)]
pub struct Allowlist {
    entries: HashSet<String>,
}

impl Allowlist {
    pub fn from_csv(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_allowed(&self, candidate: &str) -> bool {
        self.entries.contains(&candidate.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_everyone() {
        let list = Allowlist::from_csv("");
        assert!(list.is_empty());
        assert!(!list.is_allowed("+15550001"));
        assert!(!list.is_allowed(""));
    }

    #[test]
    fn membership_is_case_insensitive() {
        let list = Allowlist::from_csv("ABCD-uuid,+15550001");
        assert!(list.is_allowed("abcd-UUID"));
        assert!(list.is_allowed("+15550001"));
    }

    #[test]
    fn membership_trims_whitespace() {
        let list = Allowlist::from_csv(" +15550001 , +15550002");
        assert_eq!(list.len(), 2);
        assert!(list.is_allowed("  +15550001  "));
        assert!(list.is_allowed("+15550002"));
    }

    #[test]
    fn unknown_sender_denied() {
        let list = Allowlist::from_csv("+15550001");
        assert!(!list.is_allowed("+15559999"));
    }

    #[test]
    fn exact_match_not_substring() {
        let list = Allowlist::from_csv("+15550001");
        assert!(!list.is_allowed("+1555000"));
        assert!(!list.is_allowed("+155500011"));
    }

    #[test]
    fn stray_commas_ignored() {
        let list = Allowlist::from_csv(",+15550001,,");
        assert_eq!(list.len(), 1);
        assert!(list.is_allowed("+15550001"));
    }
}
