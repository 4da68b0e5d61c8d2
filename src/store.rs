use crate::models::{Conversation, ConversationSummary};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// One conversation plus the locks that guard it.
///
/// `turn` is held for the whole of a chat turn so two turns on the same id
/// never interleave. `state` is only held for the short critical sections
/// that read or mutate the conversation, so listings and lookups never wait
/// behind a slow inference call.
#[derive(Debug)]
pub struct ConversationSlot {
    id: String,
    turn: Mutex<()>,
    state: Mutex<Conversation>,
}

impl ConversationSlot {
    fn new(conversation: Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            turn: Mutex::new(()),
            state: Mutex::new(conversation),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits until no other turn is running on this conversation.
    pub async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub async fn snapshot(&self) -> Conversation {
        self.state.lock().await.clone()
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut convo = self.state.lock().await;
        f(&mut convo)
    }
}

pub type ConversationHandle = Arc<ConversationSlot>;

/// Memory-resident conversation registry, owned by the application state
/// and shared by handle. Lost on shutdown.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: DashMap<String, ConversationHandle>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the conversation under `id`, creating it when the id is
    /// unknown. Without an id a fresh one is generated.
    pub fn get_or_create(&self, id: Option<&str>, default_model: &str) -> ConversationHandle {
        let id = match id {
            Some(id) => id.to_string(),
            None => loop {
                let candidate = Conversation::generate_id();
                if !self.conversations.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        match self.conversations.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                log::info!("Creating conversation {}", entry.key());
                let convo = Conversation::new(entry.key().clone(), default_model);
                entry.insert(Arc::new(ConversationSlot::new(convo))).clone()
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<ConversationHandle> {
        self.conversations.get(id).map(|slot| slot.value().clone())
    }

    /// Summaries of every conversation, most recently updated first.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        // Collect handles first so no map guard is held across an await.
        let handles: Vec<ConversationHandle> = self
            .conversations
            .iter()
            .map(|slot| slot.value().clone())
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.state.lock().await.summary());
        }
        summaries.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        log::debug!("Listed {} conversations", summaries.len());
        summaries
    }

    /// Removes a conversation. Returns whether anything was removed; an
    /// absent id is not an error.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.conversations.remove(id).is_some();
        if removed {
            log::info!("Deleted conversation {}", id);
        } else {
            log::warn!("Attempted to delete non-existent conversation: {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role};

    #[tokio::test]
    async fn creates_under_requested_id() {
        let store = ConversationStore::new();
        let handle = store.get_or_create(Some("abc"), "m1");
        assert_eq!(handle.id(), "abc");
        assert_eq!(handle.snapshot().await.model_id, "m1");
        assert!(store.get("abc").is_some());
    }

    /// A known id is returned unchanged, not reset.
    #[tokio::test]
    async fn known_id_is_returned_unchanged() {
        let store = ConversationStore::new();
        let first = store.get_or_create(Some("abc"), "m1");
        first
            .update(|c| c.push_message(Message::new(Role::User, "hi")))
            .await;

        let again = store.get_or_create(Some("abc"), "m2");
        let convo = again.snapshot().await;
        assert_eq!(convo.model_id, "m1");
        assert_eq!(convo.messages().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let store = ConversationStore::new();
        let a = store.get_or_create(None, "m1");
        let b = store.get_or_create(None, "m1");
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = ConversationStore::new();
        store.get_or_create(Some("x"), "m1");
        store.get_or_create(Some("y"), "m1");

        assert!(store.delete("x"));
        assert_eq!(store.len(), 1);
        assert!(!store.delete("x"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn list_reports_counts_not_bodies() {
        let store = ConversationStore::new();
        let handle = store.get_or_create(Some("x"), "m1");
        handle
            .update(|c| {
                c.push_message(Message::new(Role::User, "a"));
                c.push_message(Message::new(Role::Assistant, "b"));
            })
            .await;

        let summaries = store.list().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "x");
        assert_eq!(summaries[0].message_count, 2);
    }

    /// Listing does not wait for a turn that is in progress.
    #[tokio::test]
    async fn list_does_not_block_on_running_turn() {
        let store = ConversationStore::new();
        let handle = store.get_or_create(Some("busy"), "m1");
        let _turn = handle.begin_turn().await;

        let summaries =
            tokio::time::timeout(std::time::Duration::from_secs(1), store.list()).await;
        assert_eq!(summaries.unwrap().len(), 1);
    }
}
