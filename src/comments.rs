use crate::{
    domain::{Backend, Filter, Query, Row, SortDirection, Table},
    errors::StoreError,
    feed::{decode_rows, profile_map},
    models::{Comment, CommentRow},
    notices::{Notice, Notices},
    session::SessionContext,
};
use serde::Serialize;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CommentState {
    pub comments: Vec<Comment>,
    pub loading: bool,
}

impl Default for CommentState {
    fn default() -> Self {
        Self {
            comments: Vec::new(),
            loading: true,
        }
    }
}

/// Comments under one meme, oldest first, with author profiles attached.
pub struct CommentStore {
    backend: Arc<dyn Backend>,
    session: SessionContext,
    notices: Notices,
    meme_id: Uuid,
    state: watch::Sender<CommentState>,
    closed: AtomicBool,
}

impl CommentStore {
    pub fn new(backend: Arc<dyn Backend>, session: SessionContext, notices: Notices, meme_id: Uuid) -> Self {
        let (state, _) = watch::channel(CommentState::default());
        Self {
            backend,
            session,
            notices,
            meme_id,
            state,
            closed: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> CommentState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommentState> {
        self.state.subscribe()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn apply(&self, update: impl FnOnce(&mut CommentState)) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(meme_id = %self.meme_id, "Comment store closed, discarding result");
            return;
        }
        self.state.send_modify(update);
    }

    pub async fn fetch_all(&self) {
        self.apply(|s| s.loading = true);

        let rows = self
            .backend
            .select(
                &Query::table(Table::Comments)
                    .eq("meme_id", self.meme_id.to_string())
                    .order("created_at", SortDirection::Ascending),
            )
            .await
            .and_then(decode_rows::<CommentRow>);

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(meme_id = %self.meme_id, error = %e, "Error fetching comments");
                self.apply(|s| s.loading = false);
                return;
            }
        };

        let profiles = profile_map(self.backend.as_ref()).await;
        let comments: Vec<Comment> = rows
            .into_iter()
            .map(|row| {
                let profile = profiles.get(&row.user_id).cloned();
                Comment::from_row(row, profile)
            })
            .collect();

        tracing::debug!(meme_id = %self.meme_id, count = comments.len(), "Comments refreshed");
        self.apply(move |s| {
            s.comments = comments;
            s.loading = false;
        });
    }

    pub async fn create(&self, content: &str) -> Result<(), StoreError> {
        let Some(user) = self.session.current_user() else {
            self.notices.publish(Notice::auth_required("Please sign in to comment"));
            return Err(StoreError::AuthRequired);
        };

        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidInput("comment cannot be empty".to_string()));
        }

        let mut row = Row::new();
        row.insert("content".into(), json!(content));
        row.insert("user_id".into(), json!(user.id));
        row.insert("meme_id".into(), json!(self.meme_id));

        if let Err(e) = self.backend.insert(Table::Comments, row).await {
            tracing::error!(meme_id = %self.meme_id, error = %e, "Error creating comment");
            self.notices.publish(Notice::error("Failed to create comment"));
            return Err(e.into());
        }

        self.fetch_all().await;
        Ok(())
    }

    /// Deletes a comment, scoped by owner in the request itself so the backend
    /// can only ever remove the viewer's own rows.
    pub async fn delete(&self, comment_id: Uuid) -> Result<(), StoreError> {
        let Some(user) = self.session.current_user() else {
            tracing::debug!(%comment_id, "Delete attempted without a session");
            return Err(StoreError::AuthRequired);
        };

        let filters = [
            Filter::eq("id", comment_id.to_string()),
            Filter::eq("user_id", user.id.to_string()),
        ];
        let result = self.backend.delete(Table::Comments, &filters).await;
        if let Err(e) = &result {
            tracing::error!(%comment_id, error = %e, "Error deleting comment");
            self.notices.publish(Notice::error("Failed to delete comment"));
        }

        self.fetch_all().await;
        result.map_err(StoreError::from)
    }
}
