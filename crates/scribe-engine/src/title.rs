use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scribe_core::transcript::DEFAULT_SESSION_TITLE;
use scribe_core::SessionId;
use scribe_store::SessionStore;

/// Produces a session title from the first prompt.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Option<String>;
}

/// Titles a session with the first non-empty line of its prompt.
pub struct FirstLineTitler {
    max_chars: usize,
}

impl FirstLineTitler {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(2),
        }
    }

    pub fn title_for(&self, prompt: &str) -> Option<String> {
        let line = prompt.lines().map(str::trim).find(|l| !l.is_empty())?;
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.chars().count() <= self.max_chars {
            return Some(collapsed);
        }
        let mut truncated: String = collapsed.chars().take(self.max_chars - 1).collect();
        truncated.truncate(truncated.trim_end().len());
        truncated.push('…');
        Some(truncated)
    }
}

impl Default for FirstLineTitler {
    fn default() -> Self {
        Self::new(60)
    }
}

#[async_trait]
impl TitleGenerator for FirstLineTitler {
    async fn generate(&self, prompt: &str) -> Option<String> {
        self.title_for(prompt)
    }
}

/// Title the session in the background. The record is re-read right before
/// the write, and the write itself only lands while the stored title is
/// still the default, so neither a concurrent append nor a user rename is
/// overwritten.
pub fn spawn_title_task(
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn TitleGenerator>,
    session_id: SessionId,
    prompt: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(title) = generator.generate(&prompt).await else {
            debug!(session_id = %session_id, "no title generated");
            return;
        };

        let current = match store.get(&session_id) {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                debug!(session_id = %session_id, "session gone before titling");
                return;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "title task could not load session");
                return;
            }
        };
        if !current.has_default_title() {
            debug!(session_id = %session_id, "session already titled");
            return;
        }

        match store.rename_if_title(&session_id, DEFAULT_SESSION_TITLE, &title) {
            Ok(true) => info!(session_id = %session_id, title = %title, "session titled"),
            Ok(false) => debug!(session_id = %session_id, "session renamed while titling"),
            Err(e) => warn!(session_id = %session_id, error = %e, "failed to save session title"),
        }
    })
}
