//! Channel and event name classification.
//!
//! Names are matched against wildcard patterns containing at most one `*`,
//! which stands for any (possibly empty) substring. Matching is anchored at
//! both ends.

use serde::{Deserialize, Serialize};

/// Prefix that marks a presence channel.
pub const PRESENCE_PREFIX: &str = "presence-";

/// Kind of a channel, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Anyone may join.
    Public,
    /// Joining requires authorization.
    Private,
    /// Private channel that also keeps a member roster.
    Presence,
}

impl ChannelKind {
    /// Whether the channel requires authorization (private or presence).
    #[must_use]
    pub fn is_private(self) -> bool {
        matches!(self, ChannelKind::Private | ChannelKind::Presence)
    }

    /// Whether the channel keeps a presence roster.
    #[must_use]
    pub fn is_presence(self) -> bool {
        self == ChannelKind::Presence
    }
}

/// A single-wildcard name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    prefix: String,
    suffix: Option<String>,
}

impl Pattern {
    /// Compile a pattern string.
    ///
    /// Only the first `*` acts as a wildcard; any further `*` is matched
    /// literally as part of the suffix.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        match pattern.split_once('*') {
            Some((prefix, suffix)) => Self {
                prefix: prefix.to_string(),
                suffix: Some(suffix.to_string()),
            },
            None => Self {
                prefix: pattern.to_string(),
                suffix: None,
            },
        }
    }

    /// Check whether `name` matches this pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match &self.suffix {
            None => name == self.prefix,
            Some(suffix) => {
                name.len() >= self.prefix.len() + suffix.len()
                    && name.starts_with(&self.prefix)
                    && name.ends_with(suffix.as_str())
            }
        }
    }
}

/// Pattern configuration for channel classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPatterns {
    /// Channels that require authorization.
    #[serde(default = "default_private_channels")]
    pub private_channels: Vec<String>,

    /// Event names clients may relay to each other.
    #[serde(default = "default_client_events")]
    pub client_events: Vec<String>,
}

fn default_private_channels() -> Vec<String> {
    vec!["private-*".to_string(), "presence-*".to_string()]
}

fn default_client_events() -> Vec<String> {
    vec!["client-*".to_string()]
}

impl Default for ChannelPatterns {
    fn default() -> Self {
        Self {
            private_channels: default_private_channels(),
            client_events: default_client_events(),
        }
    }
}

/// Classifies channel and event names.
///
/// Built once from [`ChannelPatterns`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    presence: Pattern,
    private_channels: Vec<Pattern>,
    client_events: Vec<Pattern>,
}

impl PatternMatcher {
    /// Compile the configured patterns.
    #[must_use]
    pub fn new(patterns: &ChannelPatterns) -> Self {
        Self {
            presence: Pattern::new(&format!("{PRESENCE_PREFIX}*")),
            private_channels: patterns.private_channels.iter().map(|p| Pattern::new(p)).collect(),
            client_events: patterns.client_events.iter().map(|p| Pattern::new(p)).collect(),
        }
    }

    /// Classify a channel name.
    #[must_use]
    pub fn classify(&self, channel: &str) -> ChannelKind {
        if self.presence.matches(channel) {
            ChannelKind::Presence
        } else if self.private_channels.iter().any(|p| p.matches(channel)) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Check whether an event name may be relayed between clients.
    #[must_use]
    pub fn matches_client_event(&self, event: &str) -> bool {
        self.client_events.iter().any(|p| p.matches(event))
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(&ChannelPatterns::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_defaults() {
        let matcher = PatternMatcher::default();

        assert_eq!(matcher.classify("private-room1"), ChannelKind::Private);
        assert_eq!(matcher.classify("presence-lobby"), ChannelKind::Presence);
        assert_eq!(matcher.classify("lobby"), ChannelKind::Public);
        assert!(matcher.classify("presence-lobby").is_private());
    }

    #[test]
    fn test_client_events() {
        let matcher = PatternMatcher::default();

        assert!(matcher.matches_client_event("client-typing"));
        assert!(matcher.matches_client_event("client-"));
        assert!(!matcher.matches_client_event("typing"));
        assert!(!matcher.matches_client_event("my-client-typing"));
    }

    #[test]
    fn test_pattern_wildcard_positions() {
        assert!(Pattern::new("*-room").matches("chat-room"));
        assert!(Pattern::new("*-room").matches("-room"));
        assert!(!Pattern::new("*-room").matches("chat-room-2"));

        assert!(Pattern::new("team.*.private").matches("team.red.private"));
        assert!(Pattern::new("team.*.private").matches("team..private"));
        assert!(!Pattern::new("team.*.private").matches("team.private"));

        assert!(Pattern::new("exact").matches("exact"));
        assert!(!Pattern::new("exact").matches("exactly"));
        assert!(Pattern::new("*").matches(""));
    }

    #[test]
    fn test_custom_private_patterns() {
        let matcher = PatternMatcher::new(&ChannelPatterns {
            private_channels: vec!["secure.*".to_string()],
            client_events: vec!["whisper.*".to_string()],
        });

        assert_eq!(matcher.classify("secure.orders"), ChannelKind::Private);
        assert_eq!(matcher.classify("private-room1"), ChannelKind::Public);
        // Presence is recognised by prefix regardless of the configured list
        assert_eq!(matcher.classify("presence-lobby"), ChannelKind::Presence);
        assert!(matcher.matches_client_event("whisper.typing"));
        assert!(!matcher.matches_client_event("client-typing"));
    }
}
