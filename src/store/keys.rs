//! Namespaced datastore keys and pub/sub channel names.

/// Separator between the namespace and each key segment.
pub const KEY_SEPARATOR: &str = ":";

/// Builds every key and channel the store touches.
///
/// The first segment names the kind of entity (`handshaken`, `clients`,
/// `client`, `rooms`, `memberships`) so entities never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespacer {
    namespace: String,
}

impl KeyNamespacer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<namespace>:<segment>:<segment>...`
    pub fn key<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut key = self.namespace.clone();
        for segment in segments {
            key.push_str(KEY_SEPARATOR);
            key.push_str(segment.as_ref());
        }
        key
    }

    /// Channel carrying bus events for `topic`.
    pub fn channel(&self, topic: &str) -> String {
        self.key(&[topic])
    }

    /// Wildcard matching every channel of this namespace.
    pub fn channel_pattern(&self) -> String {
        format!("{}{}*", self.namespace, KEY_SEPARATOR)
    }

    /// Topic of a channel produced by [`channel`](Self::channel), if it
    /// belongs to this namespace.
    pub fn topic_of<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(KEY_SEPARATOR)
    }

    pub fn handshaken(&self) -> String {
        self.key(&["handshaken"])
    }

    pub fn clients(&self) -> String {
        self.key(&["clients"])
    }

    pub fn client(&self, id: &str) -> String {
        self.key(&["client", id])
    }

    pub fn room(&self, room: &str) -> String {
        self.key(&["rooms", room])
    }

    pub fn memberships(&self, id: &str) -> String {
        self.key(&["memberships", id])
    }
}
