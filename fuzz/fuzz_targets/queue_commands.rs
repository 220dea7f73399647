#![no_main]

use ktvplay::config::MemoryStore;
use ktvplay::engine::{BackendEvent, BackendState, ScriptedBackend};
use ktvplay::error::LogReporter;
use ktvplay::model::MediaReference;
use ktvplay::session::Session;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::{Duration, Instant};

fuzz_target!(|data: &[u8]| {
    let (backend, script) = ScriptedBackend::new();
    let mut session = Session::new(Box::new(backend), MemoryStore::shared(), Arc::new(LogReporter));
    script.set_duration_ms(5_000);
    let start = Instant::now();

    for (step, byte) in data.iter().enumerate() {
        let arg = usize::from(byte >> 3);
        match byte % 8 {
            0 => {
                let _ = session.enqueue(MediaReference::new(format!("/ktv/track_{arg}.mkv")));
            }
            1 => {
                session.play_next();
            }
            2 => {
                session.play_previous();
            }
            3 => {
                session.remove_from_queue(arg);
            }
            4 => {
                session.move_to_next(arg);
            }
            5 => script.emit(BackendEvent::StateChanged(BackendState::Ended)),
            6 => script.advance_to(i64::from(*byte) * 40),
            _ => session.clear_queue(),
        }
        session.pump(start + Duration::from_millis(step as u64 * 100));

        let queue = session.queue();
        if let Some(index) = queue.current_index() {
            assert!(index < queue.len());
        }
        assert!(queue.upcoming().len() <= queue.len());
    }
});
