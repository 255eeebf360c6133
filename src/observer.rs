use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::session::Session;
use crate::types::Observation;

/// Snapshot the current page. Fails only when the session itself is gone.
pub fn observe(session: &dyn Session, char_limit: usize) -> Result<Observation> {
    let url = session.current_url()?;
    let text = session.visible_text()?;
    let visible_text = truncate_chars(&text, char_limit);
    debug!(%url, chars = visible_text.len(), "observed page");

    Ok(Observation {
        url,
        visible_text,
        timestamp: Utc::now(),
    })
}

/// Plain character-count truncation. No token awareness; the same page
/// yields the same cut on every run, which is what dataset reproducibility
/// needs.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
