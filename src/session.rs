use crate::config::{PlayerConfig, SharedStore};
use crate::engine::MediaBackend;
use crate::error::{AppError, ErrorReporter};
use crate::library::Library;
use crate::model::MediaReference;
use crate::player::Player;
use crate::queue::PlayQueue;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// One player, one queue and the library, wired to a single store.
///
/// Everything here runs on the thread that owns the session; backend
/// notifications are only applied inside [`Session::pump`].
pub struct Session {
    player: Player,
    queue: PlayQueue,
    library: Library,
    store: SharedStore,
}

impl Session {
    pub fn new(
        backend: Box<dyn MediaBackend>,
        store: SharedStore,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self::with_config(backend, store, reporter, PlayerConfig::default())
    }

    pub fn with_config(
        backend: Box<dyn MediaBackend>,
        store: SharedStore,
        reporter: Arc<dyn ErrorReporter>,
        config: PlayerConfig,
    ) -> Self {
        let player = Player::new(backend, store.clone(), reporter, config);
        let queue = PlayQueue::restore(store.clone());
        let library = Library::restore(store.as_ref());
        info!(
            queued = queue.len(),
            library = library.entries().len(),
            output = %player.output_name(),
            "session ready"
        );
        Self {
            player,
            queue,
            library,
            store,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    pub fn queue(&self) -> &PlayQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut PlayQueue {
        &mut self.queue
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Applies backend events, routes a completion to the queue and runs
    /// due follow-ups.
    pub fn pump(&mut self, now: Instant) {
        self.player.tick();
        self.player.process_backend_events();
        if self.player.take_completion().is_some() {
            self.queue.handle_completion(&mut self.player);
        }
        self.player.run_due(now);
    }

    /// Plays `reference` right away and makes it the whole queue.
    pub fn play_now(&mut self, reference: MediaReference) -> Result<(), AppError> {
        self.player.load(&reference)?;
        self.queue.replace_queue(vec![reference]);
        Ok(())
    }

    pub fn enqueue(&mut self, reference: MediaReference) -> Result<(), AppError> {
        self.queue.enqueue(reference, &mut self.player)
    }

    pub fn replace_queue(&mut self, references: Vec<MediaReference>) {
        self.queue.replace_queue(references);
    }

    pub fn play_next(&mut self) -> bool {
        self.queue.play_next_if_available(&mut self.player)
    }

    pub fn play_previous(&mut self) -> bool {
        self.queue.play_previous_if_available(&mut self.player)
    }

    pub fn remove_from_queue(&mut self, index: usize) -> bool {
        self.queue.remove_from_queue(index, &mut self.player)
    }

    pub fn move_to_next(&mut self, index: usize) -> bool {
        self.queue.move_to_next(index)
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear_queue();
    }

    pub fn add_library_folder(&mut self, folder: &Path) -> usize {
        self.library.add_folder(self.store.as_ref(), folder)
    }

    pub fn rescan_library(&mut self) {
        self.library.rescan();
    }

    /// Forgets every library folder and empties the queue.
    pub fn clear_library(&mut self) {
        self.library.clear(self.store.as_ref());
        self.queue.clear_queue();
    }
}
