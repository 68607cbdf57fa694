//! Presence roster and comment log for one document channel.
//!
//! Both are rebuilt from what the server sends: the roster is replaced
//! wholesale by the latest `init`/`presence` snapshot (never additively
//! merged by clients), and the comment log is append-only between `init`
//! replacements, ordered purely by arrival.

use uuid::Uuid;

use crate::protocol::{Comment, Participant};

/// Who is currently attached to the document's channel.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    participants: Vec<Participant>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster wholesale with the latest server snapshot.
    pub fn replace_all(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Comment history for one document, in arrival order.
#[derive(Debug, Default)]
pub struct CommentLog {
    comments: Vec<Comment>,
}

impl CommentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log wholesale (from an `init` snapshot).
    pub fn replace_all(&mut self, comments: Vec<Comment>) {
        self.comments = comments;
    }

    /// Append one comment. Arrival order is the only ordering guarantee.
    pub fn append(&mut self, comment: Comment) {
        self.comments.push(comment);
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn for_section<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Comment> {
        self.comments
            .iter()
            .filter(move |c| c.section_key.as_deref() == Some(key))
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_replaces_never_merges() {
        let mut roster = PresenceRoster::new();
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");

        roster.replace_all(vec![alice.clone(), bob.clone()]);
        assert_eq!(roster.len(), 2);

        // Bob dropped server-side: the new snapshot wins outright
        roster.replace_all(vec![alice.clone()]);
        assert_eq!(roster.len(), 1);
        assert!(roster.contains(alice.user_id));
        assert!(!roster.contains(bob.user_id));
    }

    #[test]
    fn test_comment_log_appends_in_arrival_order() {
        let mut log = CommentLog::new();
        log.append(Comment::new("Alice", "first", None));
        log.append(Comment::new("Bob", "second", Some("budget".into())));

        assert_eq!(log.len(), 2);
        assert_eq!(log.comments()[0].content, "first");
        assert_eq!(log.comments()[1].content, "second");
    }

    #[test]
    fn test_comment_log_init_replaces_history() {
        let mut log = CommentLog::new();
        log.append(Comment::new("Alice", "stale local view", None));
        log.replace_all(vec![Comment::new("Bob", "server history", None)]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.comments()[0].author, "Bob");
    }

    #[test]
    fn test_comments_for_section() {
        let mut log = CommentLog::new();
        log.append(Comment::new("Alice", "a", Some("budget".into())));
        log.append(Comment::new("Bob", "b", None));
        log.append(Comment::new("Cleo", "c", Some("budget".into())));

        let scoped: Vec<&str> = log.for_section("budget").map(|c| c.content.as_str()).collect();
        assert_eq!(scoped, vec!["a", "c"]);
    }
}
