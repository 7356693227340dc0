use chrono::Utc;
use serde::{ Serialize, Deserialize };

/// Once the history grows past this many turns it is cut back.
pub const HISTORY_MAX_TURNS: usize = 10;
/// Number of most recent turns kept after a cut.
pub const HISTORY_KEEP_TURNS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), turns: Vec::new() }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.extend(std::iter::once(turn));
    }

    /// Appends all `turns`, then applies the length cap once.
    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        self.turns.extend(turns);
        if self.turns.len() > HISTORY_MAX_TURNS {
            let excess = self.turns.len() - HISTORY_KEEP_TURNS;
            self.turns.drain(..excess);
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(c: &Conversation) -> Vec<String> {
        c.turns().iter().map(|t| t.content.clone()).collect()
    }

    #[test]
    fn keeps_up_to_ten_turns() {
        let mut c = Conversation::new("c");
        for i in 0..10 {
            c.push(ConversationTurn::new(Role::User, i.to_string()));
        }
        assert_eq!(c.len(), 10);
    }

    #[test]
    fn eleventh_turn_cuts_back_to_eight_most_recent() {
        let mut c = Conversation::new("c");
        for i in 0..11 {
            c.push(ConversationTurn::new(Role::User, i.to_string()));
        }
        assert_eq!(contents(&c), vec!["3", "4", "5", "6", "7", "8", "9", "10"]);
    }

    #[test]
    fn exchange_is_capped_after_both_turns() {
        let mut c = Conversation::new("c");
        for i in 0..6 {
            c.extend([
                ConversationTurn::new(Role::User, format!("u{}", i)),
                ConversationTurn::new(Role::Assistant, format!("a{}", i)),
            ]);
        }
        assert_eq!(c.len(), 8);
        assert_eq!(c.turns()[0].content, "u2");
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut c = Conversation::new("c");
        c.push(ConversationTurn::new(Role::User, "a"));
        c.push(ConversationTurn::new(Role::Assistant, "b"));
        c.push(ConversationTurn::new(Role::User, "c"));
        let tail: Vec<&str> = c.recent(2).iter().map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["b", "c"]);
        assert_eq!(c.recent(10).len(), 3);
    }
}
