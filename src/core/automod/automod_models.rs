// AutoMod domain models - data structures for the scam-ban pipeline.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway payloads into these.

use std::collections::BTreeMap;

/// One community (guild) the bot is allowed to ban in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityTarget {
    pub id: u64,
    pub display_name: String,
    /// Channel that receives per-community ban/clear notices.
    pub log_sink_id: Option<u64>,
}

/// A message AutoMod blocked somewhere we watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationEvent {
    pub source_community_id: u64,
    pub actor_id: u64,
    pub content_snippet: String,
    pub matched_rule_label: String,
}

/// Community id -> whether the actor ended up in the desired state there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnforcementOutcome {
    results: BTreeMap<u64, bool>,
}

impl EnforcementOutcome {
    pub fn record(&mut self, community_id: u64, success: bool) {
        self.results.insert(community_id, success);
    }

    pub fn get(&self, community_id: u64) -> Option<bool> {
        self.results.get(&community_id).copied()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// "3/5" style summary used in notices.
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.succeeded(), self.total())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, bool)> + '_ {
        self.results.iter().map(|(id, ok)| (*id, *ok))
    }
}

/// Which way a fan-out pushes the actor's ban state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    Ban,
    Unban,
}

impl EnforcementAction {
    /// The ban state the actor should have once the action has been applied.
    pub fn desired_ban_state(self) -> bool {
        matches!(self, EnforcementAction::Ban)
    }
}

impl std::fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementAction::Ban => write!(f, "ban"),
            EnforcementAction::Unban => write!(f, "unban"),
        }
    }
}

/// Cut a string down to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
