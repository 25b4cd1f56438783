#![allow(dead_code)]

use memehub_feed::{
    comments::CommentStore,
    domain::Table,
    feed::FeedStore,
    memory::{MemoryBackend, Operation},
    models::User,
    notices::{Notice, Notices},
    session::SessionStore,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub session: SessionStore,
    pub notices: Notices,
    pub notice_rx: broadcast::Receiver<Notice>,
}

pub async fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let session = SessionStore::new(backend.clone());
    session.init().await;
    let notices = Notices::new();
    let notice_rx = notices.subscribe();
    Harness {
        backend,
        session,
        notices,
        notice_rx,
    }
}

impl Harness {
    pub async fn sign_up(&self, email: &str, username: &str) -> User {
        self.session
            .sign_up(email, "hunter22", username)
            .await
            .expect("sign up")
            .expect("session")
            .user
    }

    pub async fn sign_in(&self, email: &str) -> User {
        self.session.sign_in(email, "hunter22").await.expect("sign in").user
    }

    pub fn feed(&self) -> FeedStore {
        FeedStore::new(self.backend.clone(), self.session.context(), self.notices.clone())
    }

    pub fn comments(&self, meme_id: Uuid) -> CommentStore {
        CommentStore::new(self.backend.clone(), self.session.context(), self.notices.clone(), meme_id)
    }

    pub fn seed_meme(&self, owner: Uuid, title: &str, created_at: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.backend
            .seed(
                Table::Memes,
                &json!({
                    "id": id, "title": title, "image_url": format!("https://img.example/{}.png", title),
                    "user_id": owner, "upvotes": 0, "downvotes": 0, "comments_count": 0, "tags": [],
                    "created_at": created_at, "updated_at": created_at
                }),
            )
            .expect("seed meme");
        id
    }

    pub fn seed_profile(&self, id: Uuid, username: &str) {
        self.backend
            .seed(Table::Profiles, &json!({ "id": id, "username": username, "avatar_url": null }))
            .expect("seed profile");
    }

    /// Number of meme-table reads, i.e. feed fetches, since the call log was last cleared.
    pub fn meme_reads(&self) -> usize {
        self.backend
            .calls()
            .iter()
            .filter(|c| c.table == Table::Memes && c.operation == Operation::Select)
            .count()
    }

    pub fn next_notice(&mut self) -> Option<Notice> {
        self.notice_rx.try_recv().ok()
    }
}
