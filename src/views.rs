use crate::models::Meme;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

impl Meme {
    /// Net score shown on a meme card.
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserStats {
    pub memes_posted: usize,
    pub total_upvotes: i64,
    pub total_comments: i64,
}

impl UserStats {
    pub fn for_user(memes: &[Meme], user_id: Uuid) -> Self {
        memes
            .iter()
            .filter(|m| m.user_id == user_id)
            .fold(UserStats::default(), |mut stats, meme| {
                stats.memes_posted += 1;
                stats.total_upvotes += meme.upvotes;
                stats.total_comments += meme.comments_count;
                stats
            })
    }
}

/// Stat values as the profile page prints them.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatLabels {
    pub memes_posted: String,
    pub total_upvotes: String,
    pub total_comments: String,
}

impl From<UserStats> for StatLabels {
    fn from(stats: UserStats) -> Self {
        Self {
            memes_posted: stats.memes_posted.to_string(),
            total_upvotes: format_count(stats.total_upvotes),
            total_comments: format_count(stats.total_comments),
        }
    }
}

/// A user's own memes, newest first as the feed orders them, with their totals.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub stats: UserStats,
    pub labels: StatLabels,
    pub memes: Vec<Meme>,
}

impl UserProfile {
    pub fn for_user(memes: &[Meme], user_id: Uuid) -> Self {
        let stats = UserStats::for_user(memes, user_id);
        Self {
            stats,
            labels: stats.into(),
            memes: memes.iter().filter(|m| m.user_id == user_id).cloned().collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendingWindow {
    #[default]
    Today,
    Week,
    Month,
    All,
}

impl TrendingWindow {
    fn span(self) -> Option<Duration> {
        match self {
            TrendingWindow::Today => Some(Duration::hours(24)),
            TrendingWindow::Week => Some(Duration::days(7)),
            TrendingWindow::Month => Some(Duration::days(30)),
            TrendingWindow::All => None,
        }
    }
}

/// Memes posted within `window` of `now`, best score first, newest first on ties.
pub fn trending(memes: &[Meme], window: TrendingWindow, now: DateTime<Utc>) -> Vec<Meme> {
    let cutoff = window.span().map(|span| now - span);
    let mut picked: Vec<Meme> = memes
        .iter()
        .filter(|m| cutoff.is_none_or(|c| m.created_at >= c))
        .cloned()
        .collect();
    picked.sort_by(|a, b| b.score().cmp(&a.score()).then(b.created_at.cmp(&a.created_at)));
    picked
}

/// Compact count for display: `999`, `1.0k`, `12.3k`.
pub fn format_count(n: i64) -> String {
    if n > 999 {
        format!("{:.1}k", n as f64 / 1000.0)
    } else {
        n.to_string()
    }
}
