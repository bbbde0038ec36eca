use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use parley_llm::{Message, Role};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default)]
struct Window {
    system: Option<Message>,
    messages: VecDeque<Message>,
}

/// Ordered conversation history bounded to `capacity` non-system messages.
///
/// The system message is pinned outside the window: it never counts against
/// the bound and is never evicted. Writers are serialized by a single lock;
/// readers take copies through [`MessageStore::snapshot`].
pub struct MessageStore {
    capacity: usize,
    inner: RwLock<Window>,
}

/// Immutable copy of the store taken at one instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub system: Option<Message>,
    pub messages: Vec<Message>,
}

impl Snapshot {
    /// Messages in request order: the system message first when set.
    #[must_use]
    pub fn request_messages(&self) -> Vec<Message> {
        self.system
            .iter()
            .chain(self.messages.iter())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl MessageStore {
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Window::default()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, Window> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Window> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pinned system message.
    pub fn set_system_message(&self, text: impl Into<String>) {
        self.write().system = Some(Message::system(text));
    }

    pub fn clear_system_message(&self) {
        self.write().system = None;
    }

    #[must_use]
    pub fn system_message(&self) -> Option<Message> {
        self.read().system.clone()
    }

    /// Append a message, evicting the oldest one first when the window is full.
    ///
    /// A system-role message replaces the pinned system message instead of
    /// entering the window. Returns the evicted message, if any.
    pub fn append(&self, message: Message) -> Option<Message> {
        let mut window = self.write();
        if message.role == Role::System {
            window.system = Some(message);
            return None;
        }
        let evicted = if window.messages.len() >= self.capacity {
            window.messages.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            tracing::debug!(
                role = old.role.as_str(),
                capacity = self.capacity,
                "evicted oldest message"
            );
        }
        window.messages.push_back(message);
        evicted
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let window = self.read();
        Snapshot {
            system: window.system.clone(),
            messages: window.messages.iter().cloned().collect(),
        }
    }

    /// Empty the window. The pinned system message is kept.
    pub fn clear(&self) {
        self.write().messages.clear();
    }

    /// Remove tool messages and assistant messages that carried tool calls.
    ///
    /// Returns the number of removed messages.
    pub fn prune_tool_artifacts(&self) -> usize {
        let mut window = self.write();
        let before = window.messages.len();
        window.messages.retain(|m| !m.is_tool_artifact());
        let removed = before - window.messages.len();
        if removed > 0 {
            tracing::debug!(removed, "pruned tool artifacts");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().messages.is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.read();
        f.debug_struct("MessageStore")
            .field("capacity", &self.capacity)
            .field("has_system", &window.system.is_some())
            .field("len", &window.messages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::ToolCall;
    use proptest::prelude::*;

    fn contents(store: &MessageStore) -> Vec<(Role, String)> {
        store
            .snapshot()
            .messages
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[test]
    fn oldest_message_is_evicted_at_capacity() {
        let store = MessageStore::new(2);
        assert!(store.append(Message::user("a")).is_none());
        assert!(store.append(Message::assistant("b")).is_none());
        let evicted = store.append(Message::user("c")).unwrap();
        assert_eq!(evicted.content, "a");
        assert_eq!(
            contents(&store),
            vec![
                (Role::Assistant, "b".to_owned()),
                (Role::User, "c".to_owned())
            ]
        );
    }

    #[test]
    fn system_message_is_replaced_and_pinned() {
        let store = MessageStore::new(1);
        store.set_system_message("first");
        store.append(Message::user("a"));
        store.append(Message::system("second"));
        store.append(Message::user("b"));

        let snap = store.snapshot();
        assert_eq!(snap.system.as_ref().unwrap().content, "second");
        let request = snap.request_messages();
        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role, Role::System);
        assert_eq!(request[1].content, "b");
        assert_eq!(
            request.iter().filter(|m| m.role == Role::System).count(),
            1
        );
    }

    #[test]
    fn clear_system_message_removes_it_from_requests() {
        let store = MessageStore::default();
        store.set_system_message("sys");
        store.clear_system_message();
        store.append(Message::user("hi"));
        assert!(store.system_message().is_none());
        assert_eq!(store.snapshot().request_messages().len(), 1);
    }

    #[test]
    fn clear_keeps_system_message() {
        let store = MessageStore::default();
        store.set_system_message("sys");
        store.append(Message::user("hi"));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.system_message().unwrap().content, "sys");
    }

    #[test]
    fn prune_removes_only_tool_scaffolding() {
        let store = MessageStore::default();
        store.append(Message::user("q"));
        store.append(Message::assistant_with_tools(
            "",
            vec![ToolCall::new("1", "search", "{}")],
        ));
        store.append(Message::tool("1", "result"));
        store.append(Message::assistant("answer"));

        assert_eq!(store.prune_tool_artifacts(), 2);
        assert_eq!(
            contents(&store),
            vec![
                (Role::User, "q".to_owned()),
                (Role::Assistant, "answer".to_owned())
            ]
        );
        assert_eq!(store.prune_tool_artifacts(), 0);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let store = MessageStore::new(0);
        store.append(Message::user("a"));
        store.append(Message::user("b"));
        assert_eq!(store.capacity(), 1);
        assert_eq!(contents(&store), vec![(Role::User, "b".to_owned())]);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let store = MessageStore::default();
        store.append(Message::user("a"));
        let snap = store.snapshot();
        store.append(Message::user("b"));
        assert_eq!(snap.len(), 1);
        assert_eq!(store.len(), 2);
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (0u8..4, "[a-z]{0,4}").prop_map(|(kind, text)| match kind {
            0 => Message::user(text),
            1 => Message::assistant(text),
            2 => Message::tool("id", text),
            _ => Message::system(text),
        })
    }

    proptest! {
        #[test]
        fn window_never_exceeds_capacity(
            capacity in 1usize..8,
            messages in proptest::collection::vec(arb_message(), 0..40),
        ) {
            let store = MessageStore::new(capacity);
            let mut expected: VecDeque<Message> = VecDeque::new();
            for message in messages {
                let is_system = message.role == Role::System;
                let evicted = store.append(message.clone());
                prop_assert!(store.len() <= capacity);
                if is_system {
                    prop_assert!(evicted.is_none());
                    prop_assert_eq!(store.system_message(), Some(message));
                    continue;
                }
                let oldest = if expected.len() >= capacity {
                    expected.pop_front()
                } else {
                    None
                };
                prop_assert_eq!(evicted, oldest);
                expected.push_back(message);
            }
            prop_assert_eq!(store.snapshot().messages, Vec::from(expected));
        }
    }
}
