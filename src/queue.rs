use crate::config::{KEY_QUEUE_CURRENT_INDEX, KEY_QUEUE_ITEMS, KeyValueStore, SharedStore};
use crate::error::AppError;
use crate::events::{EventBus, QueueEvent};
use crate::model::MediaReference;
use crate::player::PlaybackControl;
use crossbeam_channel::Receiver;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Ordered playback sequence with an optional "now playing" position.
pub struct PlayQueue {
    items: Vec<MediaReference>,
    current_index: Option<usize>,
    store: SharedStore,
    events: EventBus<QueueEvent>,
}

impl PlayQueue {
    pub fn new(store: SharedStore) -> Self {
        Self {
            items: Vec::new(),
            current_index: None,
            store,
            events: EventBus::new(),
        }
    }

    /// Rebuilds the queue from the store. An out-of-range index is dropped.
    pub fn restore(store: SharedStore) -> Self {
        let items = restored_items(store.as_ref());
        let current_index = match store.get(KEY_QUEUE_CURRENT_INDEX) {
            Ok(Some(value)) => match value.as_u64().map(|index| index as usize) {
                Some(index) if index < items.len() => Some(index),
                _ => {
                    warn!(persisted = %value, len = items.len(), "discarding invalid queue index");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("failed to read queue index: {err}");
                None
            }
        };
        debug!(len = items.len(), current = ?current_index, "restored queue");

        Self {
            items,
            current_index,
            store,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn items(&self) -> &[MediaReference] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_playing(&self) -> Option<&MediaReference> {
        self.current_index.and_then(|index| self.items.get(index))
    }

    /// Items after the current one; everything when nothing is current.
    pub fn upcoming(&self) -> &[MediaReference] {
        match self.current_index {
            Some(index) => self.items.get(index + 1..).unwrap_or_default(),
            None => &self.items,
        }
    }

    pub fn can_play_next(&self) -> bool {
        self.current_index
            .is_some_and(|index| index + 1 < self.items.len())
    }

    pub fn can_play_previous(&self) -> bool {
        self.current_index.is_some_and(|index| index > 0)
    }

    /// Swaps in a whole new sequence without starting playback.
    pub fn replace_queue(&mut self, references: Vec<MediaReference>) {
        self.items = references;
        self.current_index = (!self.items.is_empty()).then_some(0);
        info!(len = self.items.len(), "replaced queue");
        self.commit(true);
    }

    /// Appends a reference and starts it when nothing is current.
    pub fn enqueue(
        &mut self,
        reference: MediaReference,
        player: &mut dyn PlaybackControl,
    ) -> Result<(), AppError> {
        self.items.push(reference.clone());
        let index = self.items.len() - 1;
        debug!(reference = %reference, index, "enqueued");

        if self.current_index.is_some() {
            self.commit(false);
            return Ok(());
        }

        let loaded = player.load(&reference);
        if loaded.is_ok() {
            self.current_index = Some(index);
        }
        self.commit(true);
        loaded
    }

    pub fn play_next_if_available(&mut self, player: &mut dyn PlaybackControl) -> bool {
        let Some(index) = self.current_index.filter(|_| self.can_play_next()) else {
            return false;
        };
        self.jump_to(index + 1, player);
        true
    }

    pub fn play_previous_if_available(&mut self, player: &mut dyn PlaybackControl) -> bool {
        let Some(index) = self.current_index.filter(|_| self.can_play_previous()) else {
            return false;
        };
        self.jump_to(index - 1, player);
        true
    }

    /// Makes `index` current and loads it. The index moves even if the
    /// load fails, so an unplayable entry can be skipped past.
    fn jump_to(&mut self, index: usize, player: &mut dyn PlaybackControl) {
        self.current_index = Some(index);
        self.commit_index();
        if let Some(reference) = self.items.get(index).cloned() {
            let _ = player.load(&reference);
        }
    }

    pub fn remove_from_queue(&mut self, index: usize, player: &mut dyn PlaybackControl) -> bool {
        if index >= self.items.len() {
            return false;
        }
        let removed = self.items.remove(index);
        debug!(reference = %removed, index, "removed from queue");

        match self.current_index {
            Some(current) if index < current => {
                self.current_index = Some(current - 1);
            }
            Some(current) if index == current => {
                let replacement = if index < self.items.len() {
                    Some(index)
                } else {
                    index.checked_sub(1)
                };
                self.current_index = replacement;
                match replacement.and_then(|next| self.items.get(next).cloned()) {
                    Some(reference) => {
                        let _ = player.load(&reference);
                    }
                    None => player.stop(),
                }
            }
            _ => {}
        }

        self.commit(true);
        true
    }

    /// Reinserts the item at `index` right after the current one.
    pub fn move_to_next(&mut self, index: usize) -> bool {
        if index >= self.items.len() || self.current_index == Some(index) {
            return false;
        }

        let item = self.items.remove(index);
        match self.current_index {
            Some(current) => {
                let current = if index < current { current - 1 } else { current };
                self.items.insert(current + 1, item);
                self.current_index = Some(current);
            }
            None => self.items.insert(0, item),
        }

        self.commit(true);
        true
    }

    pub fn clear_queue(&mut self) {
        self.items.clear();
        self.current_index = None;
        for key in [KEY_QUEUE_ITEMS, KEY_QUEUE_CURRENT_INDEX] {
            if let Err(err) = self.store.remove(key) {
                warn!(key, "failed to clear persisted queue: {err}");
            }
        }
        self.events.publish(QueueEvent::ItemsChanged { len: 0 });
        self.events.publish(QueueEvent::CurrentChanged(None));
        self.events.publish(QueueEvent::Cleared);
        info!("cleared queue");
    }

    /// Reacts to the player finishing the current reference.
    pub fn handle_completion(&mut self, player: &mut dyn PlaybackControl) -> bool {
        let advanced = self.play_next_if_available(player);
        if !advanced {
            info!("reached end of queue");
        }
        advanced
    }

    fn commit(&mut self, index_changed: bool) {
        self.persist_items();
        self.events.publish(QueueEvent::ItemsChanged {
            len: self.items.len(),
        });
        if index_changed {
            self.commit_index();
        }
    }

    fn commit_index(&mut self) {
        self.persist_index();
        self.events
            .publish(QueueEvent::CurrentChanged(self.current_index));
    }

    fn persist_items(&self) {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| Value::String(item.to_path_string()))
            .collect();
        if let Err(err) = self.store.set(KEY_QUEUE_ITEMS, Value::Array(items)) {
            warn!("failed to persist queue items: {err}");
        }
    }

    fn persist_index(&self) {
        let result = match self.current_index {
            Some(index) => self.store.set(KEY_QUEUE_CURRENT_INDEX, json!(index)),
            None => self.store.remove(KEY_QUEUE_CURRENT_INDEX),
        };
        if let Err(err) = result {
            warn!("failed to persist queue index: {err}");
        }
    }
}

fn restored_items(store: &dyn KeyValueStore) -> Vec<MediaReference> {
    match store.get(KEY_QUEUE_ITEMS) {
        Ok(Some(Value::Array(values))) => values
            .iter()
            .filter_map(Value::as_str)
            .map(MediaReference::new)
            .collect(),
        Ok(Some(other)) => {
            warn!(persisted = %other, "ignoring malformed queue items");
            Vec::new()
        }
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!("failed to read queue items: {err}");
            Vec::new()
        }
    }
}
