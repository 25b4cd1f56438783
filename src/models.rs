use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// --- Backend rows (as stored in the hosted tables) ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemeRow {
    pub id: Uuid,
    pub title: String,
    pub image_url: String,
    pub user_id: Uuid,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub downvotes: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProfileRow {
    pub id: Uuid,
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The projection of a `votes` row the aggregator reads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteRow {
    pub meme_id: Uuid,
    pub vote_type: VoteDirection,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub id: Uuid,
    pub content: String,
    pub user_id: Uuid,
    pub meme_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- View records (merged client-side) ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<ProfileRow> for ProfileSummary {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            avatar_url: row.avatar_url,
        }
    }
}

/// A meme as the feed renders it: the backend row plus the author's profile
/// and the viewer's own vote, either of which may be absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Meme {
    pub id: Uuid,
    pub title: String,
    pub image_url: String,
    pub user_id: Uuid,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comments_count: i64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub profile: Option<ProfileSummary>,
    pub user_vote: Option<VoteDirection>,
}

impl Meme {
    pub fn from_row(row: MemeRow, profile: Option<ProfileSummary>, user_vote: Option<VoteDirection>) -> Self {
        Self {
            id: row.id,
            title: row.title,
            image_url: row.image_url,
            user_id: row.user_id,
            upvotes: row.upvotes,
            downvotes: row.downvotes,
            comments_count: row.comments_count,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
            profile,
            user_vote,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub user_id: Uuid,
    pub meme_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub profile: Option<ProfileSummary>,
}

impl Comment {
    pub fn from_row(row: CommentRow, profile: Option<ProfileSummary>) -> Self {
        Self {
            id: row.id,
            content: row.content,
            user_id: row.user_id,
            meme_id: row.meme_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            profile,
        }
    }
}

// --- Auth ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}
