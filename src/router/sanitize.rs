//! User-visible string sanitization
//!
//! Anything a client can make other clients render goes through here:
//! whitespace is trimmed and `& < > ' "` become HTML entities. Length
//! limits are counted on the trimmed raw text, before escaping.

use crate::error::EventError;

/// Maximum chat message length in characters.
pub const MAX_CHAT_LEN: usize = 500;
/// Maximum track title length in characters.
pub const MAX_TITLE_LEN: usize = 128;
/// Maximum display name length in characters.
pub const MAX_NAME_LEN: usize = 64;
/// Maximum reaction emoji length in characters.
pub const MAX_EMOJI_LEN: usize = 32;

/// Replace HTML-significant characters with entities.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Sanitize a chat message.
///
/// # Errors
/// `InvalidArgument` when the trimmed text is empty or longer than
/// [`MAX_CHAT_LEN`] characters.
pub fn sanitize_chat(input: &str) -> Result<String, EventError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EventError::InvalidArgument(
            "Message cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_CHAT_LEN {
        return Err(EventError::InvalidArgument(format!(
            "Message exceeds {MAX_CHAT_LEN} characters"
        )));
    }
    Ok(escape_html(trimmed))
}

/// Sanitize a track title: trim, clip to [`MAX_TITLE_LEN`] characters,
/// escape. An empty title falls back to `Untitled`.
#[must_use]
pub fn sanitize_title(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "Untitled".to_string();
    }
    let clipped: String = trimmed.chars().take(MAX_TITLE_LEN).collect();
    escape_html(&clipped)
}

/// Sanitize a display name.
///
/// # Errors
/// `InvalidArgument` when the trimmed name exceeds [`MAX_NAME_LEN`]
/// characters. An empty or missing name yields `None` and the caller picks
/// a fallback.
pub fn sanitize_display_name(input: Option<&str>) -> Result<Option<String>, EventError> {
    let Some(raw) = input else { return Ok(None) };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(EventError::InvalidArgument(format!(
            "Display name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(Some(escape_html(trimmed)))
}

/// Validate a reaction emoji.
///
/// # Errors
/// `InvalidArgument` when empty or longer than [`MAX_EMOJI_LEN`]
/// characters.
pub fn validate_emoji(input: &str) -> Result<String, EventError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_EMOJI_LEN {
        return Err(EventError::InvalidArgument("Invalid emoji".to_string()));
    }
    Ok(trimmed.to_string())
}
