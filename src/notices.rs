use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Default,
    Destructive,
}

/// A user-facing notification raised by a store alongside its return value.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    pub fn info(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            variant: NoticeVariant::Default,
        }
    }

    pub fn destructive(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            variant: NoticeVariant::Destructive,
        }
    }

    pub fn auth_required(description: &str) -> Self {
        Self::destructive("Authentication Required", description)
    }

    pub fn error(description: &str) -> Self {
        Self::destructive("Error", description)
    }
}

/// Fan-out channel for notices. Publishing with no listener is a no-op.
#[derive(Debug, Clone)]
pub struct Notices {
    sender: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn publish(&self, notice: Notice) {
        tracing::debug!(title = %notice.title, description = %notice.description, "Publishing notice");
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}
