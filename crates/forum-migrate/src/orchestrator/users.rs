//! Users pass.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::batch::{RecordOutcome, RecordSink, SkipReason};
use crate::content::UserDirectory;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapper;
use crate::model::{EntityKind, NewUser, SourceUser};
use crate::target::TargetStore;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern must compile"));

/// Whether an address is plausible enough for the target to accept.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Target user for a source user, or why it can't have one.
pub(crate) fn new_user(user: &SourceUser) -> std::result::Result<NewUser, String> {
    let username = user.username.as_deref().map(str::trim).unwrap_or_default();
    if username.is_empty() {
        return Err("blank username".into());
    }
    let email = user.email.as_deref().map(str::trim).unwrap_or_default();
    if !is_valid_email(email) {
        return Err(format!("invalid email {:?}", email));
    }
    let name = user
        .nickname
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username);

    Ok(NewUser {
        username: username.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        created_at: user.joined_at,
        last_seen_at: user.last_seen_at,
        suspended_till: user.suspended_until,
        bio_raw: user.bio.clone().filter(|b| !b.trim().is_empty()),
        approved: user.is_email_confirmed,
    })
}

/// Imports source users and their avatars.
pub(crate) struct UserImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a mut IdentityMapper,
    pub directory: &'a mut UserDirectory,
    pub uploads_dir: Option<&'a Path>,
}

impl UserImporter<'_> {
    /// Upload the avatar. A failure leaves the user without one.
    async fn upload_avatar(&self, user: &SourceUser, target_id: i64) -> Result<()> {
        let (Some(dir), Some(file)) = (
            self.uploads_dir,
            user.avatar_url.as_deref().filter(|f| !f.trim().is_empty()),
        ) else {
            return Ok(());
        };

        let path = dir.join(file.trim());
        match self.target.upload_avatar(target_id, &path).await {
            Ok(()) => {
                debug!("Uploaded avatar {} for user {}", path.display(), user.id);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Failed to upload avatar for user {}: {}", user.id, e);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RecordSink<SourceUser> for UserImporter<'_> {
    async fn import(&mut self, user: &SourceUser) -> Result<RecordOutcome> {
        if self.identity.contains(EntityKind::User, user.id) {
            return Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported));
        }
        let draft = match new_user(user) {
            Ok(draft) => draft,
            Err(reason) => return Ok(RecordOutcome::skipped_invalid(reason)),
        };

        let target_id = match self.target.create_user(user.id, &draft).await {
            Ok(id) => id,
            Err(MigrateError::Validation(reason)) => {
                return Ok(RecordOutcome::skipped_invalid(reason))
            }
            Err(e) => return Err(e),
        };
        self.identity
            .register(EntityKind::User, user.id, target_id)
            .await?;
        self.directory.insert(&draft.username, Some(&draft.name));

        self.upload_avatar(user, target_id).await?;
        Ok(RecordOutcome::Created)
    }

    fn describe(&self, user: &SourceUser) -> String {
        format!("user {}", user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_user(id: i64, username: &str, email: &str) -> SourceUser {
        SourceUser {
            id,
            username: Some(username.into()),
            email: Some(email.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("amy@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.org"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("amy@localhost"));
        assert!(!is_valid_email("amy example@example.com"));
        assert!(!is_valid_email("amy@@example.com"));
    }

    #[test]
    fn test_name_falls_back_to_username() {
        let mut user = source_user(1, " amy ", "amy@example.com");
        assert_eq!(new_user(&user).unwrap().name, "amy");
        user.nickname = Some("Amy Pond".into());
        let draft = new_user(&user).unwrap();
        assert_eq!(draft.username, "amy");
        assert_eq!(draft.name, "Amy Pond");
    }

    #[test]
    fn test_invalid_users_are_rejected() {
        assert_eq!(
            new_user(&source_user(1, "  ", "amy@example.com")).unwrap_err(),
            "blank username"
        );
        assert!(new_user(&source_user(1, "amy", "not-an-email"))
            .unwrap_err()
            .starts_with("invalid email"));
    }
}
