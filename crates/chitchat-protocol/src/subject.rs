//! Log subject naming.
//!
//! All channels share one log namespace. A channel owns three subjects:
//!
//! - `CHITCHAT.<channel>.message` - chat text
//! - `CHITCHAT.<channel>.presence` - join/leave transitions
//! - `CHITCHAT.<channel>.*` - both of the above, used for live tailing

use std::fmt;

/// Name of the log namespace every subject lives under.
pub const STREAM_NAME: &str = "CHITCHAT";

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Single-token wildcard.
const WILDCARD: &str = "*";

/// Validate a channel name.
///
/// A channel name becomes one subject token, so it may not contain the
/// token separator or wildcard characters.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if name.contains(['.', '*', '>']) {
        return Err("Channel name cannot contain '.', '*' or '>'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && !c.is_ascii_whitespace())
    {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// A log subject, possibly containing `*` wildcard tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    fn for_channel(channel: &str, leaf: &str) -> Self {
        Self(format!("{STREAM_NAME}.{channel}.{leaf}"))
    }

    /// Subject carrying chat text for `channel`.
    #[must_use]
    pub fn message(channel: &str) -> Self {
        Self::for_channel(channel, "message")
    }

    /// Subject carrying join/leave transitions for `channel`.
    #[must_use]
    pub fn presence(channel: &str) -> Self {
        Self::for_channel(channel, "presence")
    }

    /// Wildcard subject covering everything published on `channel`.
    #[must_use]
    pub fn channel(channel: &str) -> Self {
        Self::for_channel(channel, WILDCARD)
    }

    /// Wrap an arbitrary subject string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the subject as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The channel token, if this subject is in the gateway namespace.
    #[must_use]
    pub fn channel_name(&self) -> Option<&str> {
        let mut tokens = self.0.split('.');
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(STREAM_NAME), Some(channel), Some(_), None) => Some(channel),
            _ => None,
        }
    }

    /// Whether this subject contains a wildcard token.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0.split('.').any(|t| t == WILDCARD)
    }

    /// Check whether a concrete subject matches this (possibly wildcard) subject.
    ///
    /// `*` matches exactly one token.
    #[must_use]
    pub fn matches(&self, concrete: &str) -> bool {
        let mut pattern = self.0.split('.');
        let mut candidate = concrete.split('.');
        loop {
            match (pattern.next(), candidate.next()) {
                (None, None) => return true,
                (Some(WILDCARD), Some(_)) => continue,
                (Some(p), Some(c)) if p == c => continue,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_names() {
        assert_eq!(Subject::message("general").as_str(), "CHITCHAT.general.message");
        assert_eq!(Subject::presence("general").as_str(), "CHITCHAT.general.presence");
        assert_eq!(Subject::channel("general").as_str(), "CHITCHAT.general.*");
        assert_eq!(Subject::channel("general").channel_name(), Some("general"));
        assert_eq!(Subject::from_raw("other").channel_name(), None);
    }

    #[test]
    fn test_wildcard_matching() {
        let all = Subject::channel("general");
        assert!(all.is_wildcard());
        assert!(all.matches("CHITCHAT.general.message"));
        assert!(all.matches("CHITCHAT.general.presence"));
        assert!(!all.matches("CHITCHAT.random.message"));
        assert!(!all.matches("CHITCHAT.general"));
        assert!(!all.matches("CHITCHAT.general.message.extra"));

        let exact = Subject::message("general");
        assert!(!exact.is_wildcard());
        assert!(exact.matches("CHITCHAT.general.message"));
        assert!(!exact.matches("CHITCHAT.general.presence"));
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("general").is_ok());
        assert!(validate_channel_name("team-42_ops").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("$system").is_err());
        assert!(validate_channel_name("a.b").is_err());
        assert!(validate_channel_name("all*").is_err());
        assert!(validate_channel_name("with space").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }
}
