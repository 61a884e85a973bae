//! Reactive nickname reconciliation against committed links.

use std::sync::Arc;

use tau_link_store::LinkStore;

use crate::platform::{ChatPlatform, MemberRef};

pub const NICKNAME_MAX_CHARS: usize = 32;

const ANNOTATION_OPEN: &str = "(@";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Display-name change notification for one guild member.
pub struct DisplayNameChange {
    pub member: MemberRef,
    pub account_name: String,
    /// `None` when the previous nickname is unknown or unset.
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NicknameSyncOutcome {
    Unchanged,
    NotLinked,
    AlreadyCanonical,
    Updated(String),
    Failed(String),
}

/// Removes a trailing ` (@...)` profile annotation from a display name.
pub fn strip_annotation(name: &str) -> &str {
    let trimmed = name.trim();
    if !trimmed.ends_with(')') {
        return trimmed;
    }
    match trimmed.rfind(ANNOTATION_OPEN) {
        Some(index) => trimmed[..index].trim_end(),
        None => trimmed,
    }
}

/// Builds `"<base> (@<profile_label>)"` capped at `max_chars` characters.
///
/// The base name is shortened first; the annotation is only shortened when it
/// cannot fit on its own. Feeding the result back through [`strip_annotation`]
/// yields the same label.
pub fn canonical_label(base: &str, profile_label: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(ANNOTATION_OPEN.len() + 2);
    let label_room = max_chars - ANNOTATION_OPEN.len() - 1;
    let label = profile_label.trim().chars().take(label_room).collect::<String>();
    let annotation = format!("{ANNOTATION_OPEN}{label})");

    let base = strip_annotation(base);
    let annotation_chars = annotation.chars().count();
    // One extra character for the separating space.
    let base_room = max_chars.saturating_sub(annotation_chars + 1);
    let base = base.chars().take(base_room).collect::<String>();
    let base = base.trim_end();
    if base.is_empty() {
        return annotation;
    }
    format!("{base} {annotation}")
}

/// Re-applies the canonical label whenever a linked member's nickname drifts.
///
/// Edits issued here come back as change notifications; they are recognised as
/// already canonical and produce no further edit.
pub struct NicknameSynchronizer {
    store: Arc<dyn LinkStore>,
    platform: Arc<dyn ChatPlatform>,
    max_chars: usize,
}

impl NicknameSynchronizer {
    pub fn new(
        store: Arc<dyn LinkStore>,
        platform: Arc<dyn ChatPlatform>,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            platform,
            max_chars,
        }
    }

    pub async fn reconcile(&self, change: &DisplayNameChange) -> NicknameSyncOutcome {
        if change.before == change.after {
            return NicknameSyncOutcome::Unchanged;
        }

        let record = match self.store.lookup_profile(&change.member.principal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return NicknameSyncOutcome::NotLinked,
            Err(error) => {
                tracing::error!(
                    principal_id = %change.member.principal_id,
                    error = %error,
                    "nickname sync could not read link"
                );
                return NicknameSyncOutcome::Failed(error.to_string());
            }
        };

        let base = change
            .after
            .as_deref()
            .map(strip_annotation)
            .filter(|base| !base.is_empty())
            .unwrap_or(change.account_name.as_str());
        let canonical = canonical_label(base, &record.profile_label, self.max_chars);
        if change.after.as_deref() == Some(canonical.as_str()) {
            return NicknameSyncOutcome::AlreadyCanonical;
        }

        match self
            .platform
            .set_nickname(&change.member, Some(&canonical))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    principal_id = %change.member.principal_id,
                    guild_id = %change.member.guild_id,
                    nickname = %canonical,
                    "re-applied canonical nickname"
                );
                NicknameSyncOutcome::Updated(canonical)
            }
            Err(error) => {
                tracing::error!(
                    principal_id = %change.member.principal_id,
                    guild_id = %change.member.guild_id,
                    error = %error,
                    "failed to re-apply canonical nickname"
                );
                NicknameSyncOutcome::Failed(error.to_string())
            }
        }
    }
}
