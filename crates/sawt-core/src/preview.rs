//! Presentation helpers for card previews: thumbnail choice, YouTube links,
//! answer excerpts and the rotating "still processing" message.

use std::time::Duration;

use crate::card::{Card, CardId, Citation};

pub const MAX_CHARACTERS_PREVIEW: usize = 300;

/// Share path prefix for a single card.
pub const CARD_SHOW_PATH: &str = "/s";

/// How long each loading message stays on screen.
pub const LOADING_MESSAGE_INTERVAL: Duration = Duration::from_millis(2_500);

pub const LOADING_MESSAGES: [&str; 21] = [
    "Processing your request...",
    "About 30 seconds remaining...",
    "Processing your request...",
    "About 25 seconds remaining...",
    "About 25 seconds remaining...",
    "Processing your request...",
    "About 20 seconds remaining...",
    "About 20 seconds remaining...",
    "Processing your request...",
    "Processing your request...",
    "About 15 seconds remaining...",
    "About 15 seconds remaining...",
    "Processing your request...",
    "About 10 seconds remaining...",
    "About 10 seconds remaining...",
    "Hang tight...",
    "Hang tight...",
    "Hang tight...",
    "About 5 seconds remaining...",
    "About 5 seconds remaining...",
    "Finishing up...",
];

/// What a feed entry shows in its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Pending { message: &'static str },
    Answered { excerpt: String },
}

/// Builds the body preview for `card`, `elapsed` being how long the card has
/// been on screen (drives the loading-message rotation).
#[must_use]
pub fn preview(card: &Card, elapsed: Duration) -> Preview {
    match card.responses.first() {
        Some(first) if !card.is_pending() => Preview::Answered {
            excerpt: excerpt(&first.response, MAX_CHARACTERS_PREVIEW),
        },
        _ => Preview::Pending {
            message: loading_message(elapsed),
        },
    }
}

#[must_use]
pub fn loading_message(elapsed: Duration) -> &'static str {
    let ticks = elapsed.as_millis() / LOADING_MESSAGE_INTERVAL.as_millis();
    #[allow(clippy::cast_possible_truncation)]
    let index = (ticks % LOADING_MESSAGES.len() as u128) as usize;
    LOADING_MESSAGES[index]
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

#[must_use]
pub fn card_path(id: &CardId) -> String {
    format!("{CARD_SHOW_PATH}/{id}")
}

/// Representative citation for a card thumbnail: the first YouTube source if
/// any, otherwise the first citation.
#[must_use]
pub fn thumbnail(citations: &[Citation]) -> Option<&Citation> {
    citations
        .iter()
        .find(|c| c.source_url.as_deref().is_some_and(is_youtube_url))
        .or_else(|| citations.first())
}

#[must_use]
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com")
}

/// Value of the `v=` query parameter.
#[must_use]
pub fn youtube_video_id(url: &str) -> Option<&str> {
    query_param(url, "v").filter(|id| !id.is_empty())
}

#[must_use]
pub fn youtube_thumbnail_url(url: &str) -> Option<String> {
    youtube_video_id(url).map(|id| format!("https://img.youtube.com/vi/{id}/0.jpg"))
}

/// Embed URL starting at the cited moment.
///
/// The start offset comes from `timestamp` (`HH:MM:SS`, `MM:SS` or plain
/// seconds) when given, else from a `t=<secs>s` parameter on the URL, else 0.
#[must_use]
pub fn youtube_embed_url(url: &str, timestamp: Option<&str>) -> Option<String> {
    let id = youtube_video_id(url)?;
    let start = timestamp
        .and_then(timestamp_to_seconds)
        .or_else(|| url_start_seconds(url))
        .unwrap_or(0);
    Some(format!(
        "https://www.youtube.com/embed/{id}?autoplay=0&start={start}"
    ))
}

/// Value of the first `key=` pair in the query string of `url`.
fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

fn url_start_seconds(url: &str) -> Option<u64> {
    let rest = query_param(url, "t")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Parses `HH:MM:SS`, `MM:SS` or `SS` into seconds.
#[must_use]
pub fn timestamp_to_seconds(timestamp: &str) -> Option<u64> {
    let parts: Vec<&str> = timestamp.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    parts.iter().try_fold(0u64, |acc, part| {
        let value: u64 = part.trim().parse().ok()?;
        Some(acc * 60 + value)
    })
}
