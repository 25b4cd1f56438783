use crate::{
    domain::{Backend, Filter, Query, Row, SortDirection, Table},
    errors::{BackendError, StoreError},
    models::{Meme, MemeRow, ProfileRow, ProfileSummary, VoteDirection, VoteRow},
    notices::{Notice, Notices},
    session::SessionContext,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::watch;
use uuid::Uuid;

pub const BLOCKED_MESSAGE: &str = "Network request blocked - check browser extensions";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FeedState {
    pub memes: Vec<Meme>,
    pub loading: bool,
    pub connection_error: Option<String>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            memes: Vec::new(),
            loading: true,
            connection_error: None,
        }
    }
}

/// Decodes backend rows into typed rows, failing on the first malformed one.
pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(BackendError::from))
        .collect()
}

/// Reads all profiles into an id → summary map. A failed read yields an empty map.
pub(crate) async fn profile_map(backend: &dyn Backend) -> HashMap<Uuid, ProfileSummary> {
    let rows = backend
        .select(&Query::table(Table::Profiles).columns("id, username, avatar_url"))
        .await
        .and_then(decode_rows::<ProfileRow>);
    match rows {
        Ok(profiles) => profiles.into_iter().map(|p| (p.id, ProfileSummary::from(p))).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not fetch profiles, continuing without them");
            HashMap::new()
        }
    }
}

fn connection_error(err: &BackendError) -> String {
    match err {
        BackendError::Transport(_) => BLOCKED_MESSAGE.to_string(),
        BackendError::Rejected { message, .. } => format!("Database error: {}", message),
        BackendError::Decode(msg) => format!("Database error: {}", msg),
    }
}

fn connection_notice(err: &BackendError) -> Notice {
    if err.is_transport() {
        Notice::destructive(
            "Connection Failed",
            "Can't connect to server. Check your internet connection.",
        )
    } else {
        Notice::destructive("Connection Issue", "Having trouble loading memes. Check your connection.")
    }
}

// Trims tags, drops empties and keeps the first occurrence of each.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

/// The feed of memes, enriched with author profiles and the viewer's own votes.
///
/// Displayed counts are never adjusted locally: every mutation is followed by a full
/// `fetch_all`, so the feed always shows what the backend last reported. Overlapping
/// fetches are not sequenced; whichever completes last is what the feed shows.
pub struct FeedStore {
    backend: Arc<dyn Backend>,
    session: SessionContext,
    notices: Notices,
    state: watch::Sender<FeedState>,
    closed: AtomicBool,
}

impl FeedStore {
    pub fn new(backend: Arc<dyn Backend>, session: SessionContext, notices: Notices) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            backend,
            session,
            notices,
            state,
            closed: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Detaches the store from its consumer; later completions are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn apply(&self, update: impl FnOnce(&mut FeedState)) {
        if self.is_closed() {
            tracing::debug!("Feed store closed, discarding result");
            return;
        }
        self.state.send_modify(update);
    }

    /// Reloads memes, then enriches them with profiles and (when signed in) the viewer's votes.
    ///
    /// Only the meme read can fail the fetch; a failed profile or vote read leaves that
    /// enrichment absent.
    pub async fn fetch_all(&self) {
        self.apply(|s| {
            s.loading = true;
            s.connection_error = None;
        });

        let rows = self
            .backend
            .select(&Query::table(Table::Memes).order("created_at", SortDirection::Descending))
            .await
            .and_then(decode_rows::<MemeRow>);

        let memes = match rows {
            Ok(memes) => memes,
            Err(e) => {
                tracing::error!(error = %e, "Error fetching memes");
                let message = connection_error(&e);
                // Keep whatever the feed showed before.
                self.apply(|s| {
                    s.loading = false;
                    s.connection_error = Some(message);
                });
                self.notices.publish(connection_notice(&e));
                return;
            }
        };

        let profiles = profile_map(self.backend.as_ref()).await;
        let votes = match self.session.current_user() {
            Some(user) => self.vote_map(user.id).await,
            None => HashMap::new(),
        };

        let merged: Vec<Meme> = memes
            .into_iter()
            .map(|row| {
                let profile = profiles.get(&row.user_id).cloned();
                let user_vote = votes.get(&row.id).copied();
                Meme::from_row(row, profile, user_vote)
            })
            .collect();

        tracing::debug!(count = merged.len(), "Feed refreshed");
        self.apply(move |s| {
            s.memes = merged;
            s.loading = false;
        });
    }

    async fn vote_map(&self, user_id: Uuid) -> HashMap<Uuid, VoteDirection> {
        let rows = self
            .backend
            .select(
                &Query::table(Table::Votes)
                    .columns("meme_id, vote_type")
                    .eq("user_id", user_id.to_string()),
            )
            .await
            .and_then(decode_rows::<VoteRow>);
        match rows {
            Ok(votes) => votes.into_iter().map(|v| (v.meme_id, v.vote_type)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Could not fetch user votes, continuing without them");
                HashMap::new()
            }
        }
    }

    /// Casts, switches or withdraws the viewer's vote on a meme.
    ///
    /// No existing vote inserts one; the same direction again deletes it; the other
    /// direction updates it in place. Whether that write succeeded is logged, not
    /// returned: the feed is re-fetched either way. Errors are returned only when no
    /// write was attempted (no session, or the existing vote could not be read).
    pub async fn vote(&self, meme_id: Uuid, direction: VoteDirection) -> Result<(), StoreError> {
        let Some(user) = self.session.current_user() else {
            self.notices.publish(Notice::auth_required("Please sign in to vote on memes"));
            return Err(StoreError::AuthRequired);
        };

        let owner = [
            Filter::eq("user_id", user.id.to_string()),
            Filter::eq("meme_id", meme_id.to_string()),
        ];

        let existing = self
            .backend
            .select(
                &Query::table(Table::Votes)
                    .columns("meme_id, vote_type")
                    .eq("user_id", user.id.to_string())
                    .eq("meme_id", meme_id.to_string())
                    .limit(1),
            )
            .await
            .and_then(decode_rows::<VoteRow>);
        let existing = match existing {
            Ok(mut rows) => rows.pop(),
            Err(e) => {
                tracing::error!(%meme_id, error = %e, "Error reading existing vote");
                self.notices.publish(Notice::error("Failed to vote on meme"));
                return Err(e.into());
            }
        };

        let result = match existing {
            None => {
                tracing::debug!(%meme_id, %direction, "Casting new vote");
                let mut row = Row::new();
                row.insert("user_id".into(), json!(user.id));
                row.insert("meme_id".into(), json!(meme_id));
                row.insert("vote_type".into(), json!(direction));
                self.backend.insert(Table::Votes, row).await.map(|_| ())
            }
            Some(vote) if vote.vote_type == direction => {
                tracing::debug!(%meme_id, %direction, "Withdrawing vote");
                self.backend.delete(Table::Votes, &owner).await
            }
            Some(vote) => {
                tracing::debug!(%meme_id, from = %vote.vote_type, to = %direction, "Switching vote");
                let mut patch = Row::new();
                patch.insert("vote_type".into(), json!(direction));
                self.backend.update(Table::Votes, &owner, patch).await
            }
        };

        if let Err(e) = result {
            tracing::error!(%meme_id, error = %e, "Error voting on meme");
            self.notices.publish(Notice::error("Failed to vote on meme"));
        }

        self.fetch_all().await;
        Ok(())
    }

    /// Posts a new meme owned by the viewer, with zero votes.
    pub async fn create(&self, title: &str, image_url: &str, tags: Vec<String>) -> Result<(), StoreError> {
        let Some(user) = self.session.current_user() else {
            self.notices.publish(Notice::auth_required("Please sign in to create memes"));
            return Err(StoreError::AuthRequired);
        };

        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidInput("title cannot be empty".to_string()));
        }
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(StoreError::InvalidInput("image reference cannot be empty".to_string()));
        }

        let mut row = Row::new();
        row.insert("title".into(), json!(title));
        row.insert("image_url".into(), json!(image_url));
        row.insert("user_id".into(), json!(user.id));
        row.insert("tags".into(), json!(normalize_tags(tags)));
        row.insert("upvotes".into(), json!(0));
        row.insert("downvotes".into(), json!(0));
        row.insert("comments_count".into(), json!(0));

        if let Err(e) = self.backend.insert(Table::Memes, row).await {
            tracing::error!(error = %e, "Error creating meme");
            self.notices.publish(Notice::error("Failed to create meme"));
            return Err(e.into());
        }

        tracing::info!(user_id = %user.id, %title, "Meme created");
        self.notices.publish(Notice::info("Success", "Meme created successfully!"));
        self.fetch_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated_in_order() {
        let tags = vec![" cats ".into(), "".into(), "dogs".into(), "cats".into(), "  ".into()];
        assert_eq!(normalize_tags(tags), vec!["cats".to_string(), "dogs".to_string()]);
    }

    #[test]
    fn connection_errors_tell_blocked_from_rejected() {
        let blocked = BackendError::Transport("Failed to fetch".into());
        assert_eq!(connection_error(&blocked), BLOCKED_MESSAGE);
        assert_eq!(connection_notice(&blocked).title, "Connection Failed");
        assert_eq!(
            connection_notice(&BackendError::rejected("permission denied", "42501")).title,
            "Connection Issue"
        );
        assert_eq!(
            connection_error(&BackendError::rejected("relation \"memes\" does not exist", "42P01")),
            "Database error: relation \"memes\" does not exist"
        );
    }
}
