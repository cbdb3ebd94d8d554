//! Compose box state and `@mention` helpers.

use shared::{domain::MessageId, records::ProfileRecord};

/// Text typed after the last `@`, lower-cased, while no space follows it.
pub fn mention_query(text: &str) -> Option<String> {
    let at = text.rfind('@')?;
    let after = &text[at + 1..];
    if after.contains(' ') {
        return None;
    }
    Some(after.to_lowercase())
}

/// Replace the trailing `@query` with `@name `.
pub fn insert_mention(text: &str, name: &str) -> String {
    let before = text.rfind('@').map_or(text, |at| &text[..at]);
    format!("{before}@{name} ")
}

pub fn mention_candidates<'a>(members: &'a [ProfileRecord], query: &str) -> Vec<&'a ProfileRecord> {
    let query = query.to_lowercase();
    members
        .iter()
        .filter(|member| member.display_name().to_lowercase().contains(&query))
        .collect()
}

/// A message taken out of the compose box for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingText {
    pub content: String,
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeState {
    text: String,
    reply_to: Option<MessageId>,
    sending: bool,
}

impl ComposeState {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn reply_to(&self) -> Option<MessageId> {
        self.reply_to
    }

    pub fn set_reply_to(&mut self, message_id: Option<MessageId>) {
        self.reply_to = message_id;
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn mention_query(&self) -> Option<String> {
        mention_query(&self.text)
    }

    pub fn insert_mention(&mut self, name: &str) {
        self.text = insert_mention(&self.text, name);
    }

    /// Take the trimmed text and reply target, clearing both before the
    /// write is attempted. `None` for blank text or while a send runs.
    pub fn begin_send(&mut self) -> Option<OutgoingText> {
        if self.sending || self.text.trim().is_empty() {
            return None;
        }
        let content = self.text.trim().to_owned();
        self.text.clear();
        self.sending = true;
        Some(OutgoingText {
            content,
            reply_to: self.reply_to.take(),
        })
    }

    pub fn finish_send(&mut self) {
        self.sending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::UserId;

    fn member(name: &str, email: &str) -> ProfileRecord {
        serde_json::from_value(serde_json::json!({
            "id": UserId::new(),
            "name": name,
            "email": email,
        }))
        .expect("profile")
    }

    #[test]
    fn mention_query_tracks_last_at_until_space() {
        assert_eq!(mention_query("hi @Be"), Some("be".into()));
        assert_eq!(mention_query("hi @"), Some(String::new()));
        assert_eq!(mention_query("hi @ben there"), None);
        assert_eq!(mention_query("no mention"), None);
        assert_eq!(mention_query("a@x.io and @Cy"), Some("cy".into()));
    }

    #[test]
    fn inserting_a_mention_replaces_the_query() {
        assert_eq!(insert_mention("hi @be", "Ben"), "hi @Ben ");
        assert_eq!(insert_mention("hi", "Ben"), "hi@Ben ");
    }

    #[test]
    fn candidates_match_on_display_name() {
        let members = vec![member("Ben", "ben@x.io"), member("", "bella@x.io"), member("Cy", "cy@x.io")];
        let names: Vec<String> = mention_candidates(&members, "BE")
            .into_iter()
            .map(ProfileRecord::display_name)
            .collect();
        assert_eq!(names, vec!["Ben", "bella"]);
    }

    #[test]
    fn send_clears_compose_before_the_write() {
        let mut compose = ComposeState::default();
        let reply = MessageId::new();
        compose.set_text("  hello  ");
        compose.set_reply_to(Some(reply));

        let outgoing = compose.begin_send().expect("outgoing");

        assert_eq!(outgoing, OutgoingText { content: "hello".into(), reply_to: Some(reply) });
        assert_eq!(compose.text(), "");
        assert_eq!(compose.reply_to(), None);
        compose.set_text("again");
        assert!(compose.begin_send().is_none(), "one send at a time");
        compose.finish_send();
        assert!(compose.begin_send().is_some());
    }

    #[test]
    fn blank_text_is_not_sent() {
        let mut compose = ComposeState::default();
        compose.set_text("   ");
        assert!(compose.begin_send().is_none());
        assert!(!compose.is_sending());
    }
}
