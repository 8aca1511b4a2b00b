/// Naming — conversations to channel names and users to nicks.
///
/// Channel names are derived from conversation display names, which are
/// neither unique nor IRC-safe. [`ChannelMap`] owns the assignment: each
/// conversation gets exactly one name for the lifetime of the process, and no
/// two conversations ever share a name.
use std::collections::HashMap;

use crate::backend::{ConvId, Conversation, User};

/// Maximum channel name length, sigil included.
const MAX_CHANNEL_LEN: usize = 50;

/// Maximum derived nickname length.
const MAX_NICK_LEN: usize = 15;

/// Bidirectional conversation ↔ channel-name mapping, built lazily.
#[derive(Debug, Default)]
pub struct ChannelMap {
    by_conv: HashMap<ConvId, String>,
    by_name: HashMap<String, ConvId>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel name assigned to a conversation, assigning one on
    /// first use. Idempotent per conversation id; an assigned name is never
    /// reused or re-derived (renames do not move channels mid-process).
    pub fn assign_or_get(&mut self, conv: &Conversation) -> String {
        if let Some(name) = self.by_conv.get(&conv.id) {
            return name.clone();
        }

        let base = derive_channel_base(&conv.name);
        let mut candidate = channel_with_suffix(&base, None);
        let mut counter = 2u64;
        while self.by_name.contains_key(&candidate) {
            candidate = channel_with_suffix(&base, Some(counter));
            counter += 1;
        }

        self.by_conv.insert(conv.id.clone(), candidate.clone());
        self.by_name.insert(candidate.clone(), conv.id.clone());
        candidate
    }

    /// The name already assigned to a conversation, if any.
    pub fn name_for(&self, id: &ConvId) -> Option<&str> {
        self.by_conv.get(id).map(String::as_str)
    }

    /// Reverse lookup. Not-found is a value, not an error — callers answer
    /// the client with a "no such channel" reply.
    pub fn resolve(&self, channel: &str) -> Option<&ConvId> {
        self.by_name.get(channel)
    }
}

/// Derive the sigil-less channel name: whitespace-category characters other
/// than space are stripped along with control characters and commas, spaces
/// become underscores, and the result is cut to fit under the length cap.
fn derive_channel_base(display_name: &str) -> String {
    display_name
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            ',' => None,
            c if c.is_control() || c.is_whitespace() => None,
            c => Some(c),
        })
        .take(MAX_CHANNEL_LEN - 1)
        .collect()
}

/// Attach sigil and optional collision suffix, re-truncating the base so the
/// total stays within the cap.
fn channel_with_suffix(base: &str, suffix: Option<u64>) -> String {
    match suffix {
        None => format!("#{base}"),
        Some(n) => {
            let suffix = format!("_{n}");
            let room = MAX_CHANNEL_LEN - 1 - suffix.len();
            let cut: String = base.chars().take(room).collect();
            format!("#{cut}{suffix}")
        }
    }
}

/// Nickname for a backend user: display name filtered to IRC-safe
/// characters, capped in length.
pub fn nick_for(user: &User) -> String {
    user.full_name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '[' | ']' | '{' | '}' | '^' | '`' | '|' | '_' | '\\' | '-'))
        .take(MAX_NICK_LEN)
        .collect()
}

/// Hostmask-equivalent for a backend user.
pub fn hostmask_for(user: &User) -> String {
    format!("{}!{}@palaver", nick_for(user), user.chat_id)
}

/// Topic string presented for a conversation's channel.
pub fn topic_for(conv: &Conversation) -> String {
    format!("Conversation: {}", conv.name)
}
