use crate::config::{self, JsonFileStore, SharedStore};
use crate::engine::{MediaBackend, NullBackend, RodioBackend};
use crate::error::StatusReporter;
use crate::logging;
use crate::model::MediaReference;
use crate::session::Session;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SEEK_STEP_MS: i64 = 5_000;
const VOLUME_STEP: f32 = 0.05;

#[derive(Debug, Default)]
pub struct AppOptions {
    pub config_dir: Option<PathBuf>,
    pub null_audio: bool,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pane {
    #[default]
    Library,
    Queue,
}

/// Front-end only state: selection, focus and the message line.
#[derive(Debug, Default)]
pub struct AppState {
    pub pane: Pane,
    pub library_selected: usize,
    pub queue_selected: usize,
    pub status: String,
    pub command_mode: bool,
    pub command_buffer: String,
    pub dirty: bool,
}

impl AppState {
    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.dirty = true;
    }

    fn pane_len(&self, session: &Session) -> usize {
        match self.pane {
            Pane::Library => session.library().entries().len(),
            Pane::Queue => session.queue().len(),
        }
    }

    fn selected_mut(&mut self) -> &mut usize {
        match self.pane {
            Pane::Library => &mut self.library_selected,
            Pane::Queue => &mut self.queue_selected,
        }
    }

    fn select_next(&mut self, session: &Session) {
        let len = self.pane_len(session);
        let selected = self.selected_mut();
        if len > 0 && *selected + 1 < len {
            *selected += 1;
        }
        self.dirty = true;
    }

    fn select_prev(&mut self) {
        let selected = self.selected_mut();
        *selected = selected.saturating_sub(1);
        self.dirty = true;
    }

    /// Keeps selections inside lists that may have shrunk.
    fn clamp_selection(&mut self, session: &Session) {
        let library_len = session.library().entries().len();
        let queue_len = session.queue().len();
        self.library_selected = self.library_selected.min(library_len.saturating_sub(1));
        self.queue_selected = self.queue_selected.min(queue_len.saturating_sub(1));
    }

    fn selected_library_entry(&self, session: &Session) -> Option<MediaReference> {
        session
            .library()
            .entries()
            .get(self.library_selected)
            .map(|entry| entry.reference.clone())
    }
}

pub fn run(options: AppOptions) -> Result<()> {
    let root = match &options.config_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            dir.clone()
        }
        None => config::ensure_config_dir()?,
    };
    let log_path = logging::init_tracing(&root)?;
    info!(log = %log_path.display(), "starting ktvplay");

    let store: SharedStore = Arc::new(JsonFileStore::open(config::state_file_in(&root)));
    let reporter = StatusReporter::new();
    let mut session = Session::new(
        open_backend(options.null_audio),
        store,
        Arc::new(reporter.clone()),
    );
    let mut app = AppState::default();

    for file in &options.files {
        let _ = session.enqueue(MediaReference::new(file));
    }

    let player_events = session.player_mut().subscribe();
    let queue_events = session.queue_mut().subscribe();

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut last_draw = Instant::now();
    app.dirty = true;

    let result: Result<()> = loop {
        session.pump(Instant::now());
        if player_events.try_iter().count() > 0 || queue_events.try_iter().count() > 0 {
            app.clamp_selection(&session);
            app.dirty = true;
        }
        if let Some(report) = reporter.latest() {
            app.set_status(format!(
                "{}: {}. {}",
                report.context, report.message, report.suggestion
            ));
            reporter.clear();
        }

        if app.dirty || last_draw.elapsed() > Duration::from_millis(250) {
            terminal.draw(|frame| crate::ui::draw(frame, &session, &app))?;
            app.dirty = false;
            last_draw = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.command_mode {
            match key.code {
                KeyCode::Esc => {
                    app.command_mode = false;
                    app.command_buffer.clear();
                    app.dirty = true;
                }
                KeyCode::Enter => {
                    let raw = std::mem::take(&mut app.command_buffer);
                    app.command_mode = false;
                    run_command(&mut session, &mut app, &raw);
                }
                KeyCode::Backspace => {
                    app.command_buffer.pop();
                    app.dirty = true;
                }
                KeyCode::Char(ch) => {
                    app.command_buffer.push(ch);
                    app.dirty = true;
                }
                _ => {}
            }
            continue;
        }

        if handle_key(&mut session, &mut app, key) {
            break Ok(());
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    drop(session);
    result
}

fn open_backend(null_audio: bool) -> Box<dyn MediaBackend> {
    if null_audio {
        return Box::new(NullBackend::new());
    }
    match RodioBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(err) => {
            warn!("no audio output, using null engine: {err:#}");
            Box::new(NullBackend::new())
        }
    }
}

/// Applies one key press. Returns true when the app should quit.
fn handle_key(session: &mut Session, app: &mut AppState, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Down => app.select_next(session),
        KeyCode::Up => app.select_prev(),
        KeyCode::Tab => {
            app.pane = match app.pane {
                Pane::Library => Pane::Queue,
                Pane::Queue => Pane::Library,
            };
            app.dirty = true;
        }
        KeyCode::Enter if app.pane == Pane::Library => {
            if let Some(reference) = app.selected_library_entry(session)
                && session.play_now(reference.clone()).is_ok()
            {
                app.set_status(format!("Playing {}", reference.title()));
            }
        }
        KeyCode::Char('a') if app.pane == Pane::Library => {
            if let Some(reference) = app.selected_library_entry(session)
                && session.enqueue(reference.clone()).is_ok()
            {
                app.set_status(format!("Queued {}", reference.title()));
            }
        }
        KeyCode::Char(' ') => {
            session.player_mut().toggle_play_pause();
            app.dirty = true;
        }
        KeyCode::Char('s') => {
            session.player_mut().stop();
            app.set_status("Stopped");
        }
        KeyCode::Char('n') => {
            if !session.play_next() {
                app.set_status("No next item in queue");
            }
        }
        KeyCode::Char('b') => {
            if !session.play_previous() {
                app.set_status("No previous item in queue");
            }
        }
        KeyCode::Char('o') => {
            if !session.player_mut().select_original_track() {
                app.set_status("No original track");
            }
        }
        KeyCode::Char('k') => {
            if !session.player_mut().select_accompaniment_track() {
                app.set_status("No accompaniment track");
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') => adjust_volume(session, app, VOLUME_STEP),
        KeyCode::Char('-') => adjust_volume(session, app, -VOLUME_STEP),
        KeyCode::Left => {
            session.player_mut().seek_by(-SEEK_STEP_MS);
            app.dirty = true;
        }
        KeyCode::Right => {
            session.player_mut().seek_by(SEEK_STEP_MS);
            app.dirty = true;
        }
        KeyCode::Char('d') if app.pane == Pane::Queue => {
            if session.remove_from_queue(app.queue_selected) {
                app.clamp_selection(session);
                app.set_status("Removed from queue");
            }
        }
        KeyCode::Char('u') if app.pane == Pane::Queue => {
            if session.move_to_next(app.queue_selected) {
                app.set_status("Moved to play next");
            } else {
                app.set_status("Cannot move the current item");
            }
        }
        KeyCode::Char(':') => {
            app.command_mode = true;
            app.dirty = true;
        }
        _ => {}
    }
    false
}

fn adjust_volume(session: &mut Session, app: &mut AppState, delta: f32) {
    let next = session.player().state().volume + delta;
    session.player_mut().set_volume(next);
    let volume = session.player().state().volume;
    app.set_status(format!("Volume: {}%", (volume * 100.0).round() as u16));
}

fn run_command(session: &mut Session, app: &mut AppState, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        app.set_status("No command");
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => app.set_status("Commands: add <folder> | rescan | clear | help"),
        "add" => {
            if rest.is_empty() {
                app.set_status("Usage: add <folder>");
            } else {
                let found = session.add_library_folder(&PathBuf::from(rest));
                app.set_status(format!("Library has {found} songs"));
            }
        }
        "rescan" => {
            session.rescan_library();
            app.clamp_selection(session);
            app.set_status(format!(
                "Library has {} songs",
                session.library().entries().len()
            ));
        }
        "clear" => {
            session.clear_library();
            app.clamp_selection(session);
            app.set_status("Library and queue cleared");
        }
        _ => app.set_status("Unknown command. Use :help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::engine::{ScriptHandle, ScriptedBackend};
    use tempfile::tempdir;

    fn session() -> (Session, ScriptHandle) {
        let (backend, script) = ScriptedBackend::new();
        let session = Session::new(
            Box::new(backend),
            MemoryStore::shared(),
            Arc::new(StatusReporter::new()),
        );
        (session, script)
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn unknown_command_is_reported() {
        let (mut session, _) = session();
        let mut app = AppState::default();
        run_command(&mut session, &mut app, "wat");
        assert!(app.status.contains("Unknown command"));
    }

    #[test]
    fn add_command_accepts_paths_with_spaces() {
        let dir = tempdir().expect("tempdir");
        let folder = dir.path().join("KTV Songs");
        fs::create_dir_all(&folder).expect("mkdir");
        fs::write(folder.join("duet.mkv"), b"x").expect("write");
        let (mut session, _) = session();
        let mut app = AppState::default();

        run_command(&mut session, &mut app, &format!("add {}", folder.display()));

        assert_eq!(session.library().entries().len(), 1);
        assert!(app.status.contains("1 songs"));
    }

    #[test]
    fn enter_plays_selection_and_a_queues_it() {
        let dir = tempdir().expect("tempdir");
        for name in ["a.mkv", "b.mkv"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let (mut session, script) = session();
        session.add_library_folder(dir.path());
        let mut app = AppState::default();

        assert!(!handle_key(&mut session, &mut app, press(KeyCode::Enter)));
        handle_key(&mut session, &mut app, press(KeyCode::Down));
        handle_key(&mut session, &mut app, press(KeyCode::Char('a')));

        let titles: Vec<String> = session
            .queue()
            .items()
            .iter()
            .map(MediaReference::title)
            .collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(session.queue().current_index(), Some(0));
        assert_eq!(script.opened().len(), 1);
    }

    #[test]
    fn queue_pane_keys_edit_the_queue() {
        let dir = tempdir().expect("tempdir");
        let refs: Vec<MediaReference> = ["a.mkv", "b.mkv", "c.mkv"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, b"x").expect("write");
                MediaReference::new(path)
            })
            .collect();
        let (mut session, _) = session();
        session.replace_queue(refs.clone());
        let mut app = AppState {
            pane: Pane::Queue,
            queue_selected: 2,
            ..AppState::default()
        };

        handle_key(&mut session, &mut app, press(KeyCode::Char('u')));
        assert_eq!(session.queue().items(), &[refs[0].clone(), refs[2].clone(), refs[1].clone()]);

        handle_key(&mut session, &mut app, press(KeyCode::Char('d')));
        assert_eq!(session.queue().len(), 2);
        assert_eq!(app.queue_selected, 1);
    }

    #[test]
    fn volume_keys_step_and_clamp() {
        let (mut session, script) = session();
        let mut app = AppState::default();

        handle_key(&mut session, &mut app, press(KeyCode::Char('-')));
        assert_eq!(script.native_volume(), 95);
        handle_key(&mut session, &mut app, press(KeyCode::Char('+')));
        handle_key(&mut session, &mut app, press(KeyCode::Char('+')));
        assert_eq!(script.native_volume(), 100);
        assert_eq!(app.status, "Volume: 100%");
    }

    #[test]
    fn ctrl_c_quits() {
        let (mut session, _) = session();
        let mut app = AppState::default();
        let quit = handle_key(
            &mut session,
            &mut app,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        );
        assert!(quit);
    }

    #[test]
    fn clear_command_empties_library_and_queue() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.mkv"), b"x").expect("write");
        let (mut session, _) = session();
        session.add_library_folder(dir.path());
        let mut app = AppState::default();
        handle_key(&mut session, &mut app, press(KeyCode::Char('a')));

        run_command(&mut session, &mut app, "clear");

        assert!(session.library().entries().is_empty());
        assert!(!session.queue().has_items());
    }
}
