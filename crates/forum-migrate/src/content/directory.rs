//! Resolution of mention display names to target usernames.

use std::collections::HashMap;

use crate::model::UserName;

/// Resolves the display name carried by a mention tag to a target username.
pub trait MentionResolver: Send + Sync {
    fn resolve(&self, display_name: &str) -> Option<&str>;
}

/// Case-insensitive index of target users by username and display name.
///
/// Usernames take precedence over display names.
#[derive(Debug, Default, Clone)]
pub struct UserDirectory {
    by_username: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from existing target users.
    pub fn from_users<I: IntoIterator<Item = UserName>>(users: I) -> Self {
        let mut directory = Self::new();
        for user in users {
            directory.insert(&user.username, user.name.as_deref());
        }
        directory
    }

    /// Add a user. The first user claiming a display name keeps it.
    pub fn insert(&mut self, username: &str, name: Option<&str>) {
        self.by_username
            .insert(username.to_lowercase(), username.to_string());
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.by_name
                .entry(name.trim().to_lowercase())
                .or_insert_with(|| username.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }
}

impl MentionResolver for UserDirectory {
    fn resolve(&self, display_name: &str) -> Option<&str> {
        let key = display_name.trim().to_lowercase();
        self.by_username
            .get(&key)
            .or_else(|| self.by_name.get(&key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_username_case_insensitively() {
        let mut directory = UserDirectory::new();
        directory.insert("Alice", None);
        assert_eq!(directory.resolve("alice"), Some("Alice"));
        assert_eq!(directory.resolve("ALICE"), Some("Alice"));
    }

    #[test]
    fn test_resolves_display_name() {
        let mut directory = UserDirectory::new();
        directory.insert("bob_smith", Some("Bob Smith"));
        assert_eq!(directory.resolve("Bob Smith"), Some("bob_smith"));
    }

    #[test]
    fn test_username_wins_over_display_name() {
        let mut directory = UserDirectory::new();
        directory.insert("carol", Some("dave"));
        directory.insert("dave", None);
        assert_eq!(directory.resolve("dave"), Some("dave"));
    }

    #[test]
    fn test_unknown_is_none() {
        let directory = UserDirectory::from_users(vec![UserName {
            username: "erin".into(),
            name: None,
        }]);
        assert_eq!(directory.resolve("frank"), None);
        assert_eq!(directory.len(), 1);
    }
}
