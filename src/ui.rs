use crate::app::{AppState, Pane};
use crate::model::{PlaybackPhase, PlayerState, TrackKind};
use crate::session::Session;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

const APP_TITLE_WITH_VERSION: &str = concat!("ktvplay v", env!("CARGO_PKG_VERSION"), "  ");
const KEY_HINTS: &str =
    "Keys: Enter play, a queue, n/b next/prev, space pause, o/k track, : command, Ctrl+C quit";

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    focus_border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    selected_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    focus_border: Color::Rgb(255, 122, 165),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    selected_bg: Color::Rgb(34, 55, 82),
};

pub fn draw(frame: &mut Frame, session: &Session, app: &AppState) {
    let colors = PALETTE;
    let state = session.player().state();
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("Library {}", session.library().entries().len()),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            phase_label(state.phase),
            Style::default().fg(colors.alert),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            format!("Now  {}", now_playing_title(state)),
            Style::default().fg(colors.text),
        ),
    ]))
    .block(panel_block(
        "Status",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(header, vertical[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(vertical[1]);

    draw_library(frame, body[0], session, app, &colors);
    draw_queue(frame, body[1], session, app, &colors);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(state, 26, 10),
        Style::default().fg(colors.text),
    ))
    .block(panel_block(
        "Timeline",
        colors.panel_bg,
        colors.text,
        colors.border,
    ))
    .wrap(Wrap { trim: true });
    frame.render_widget(timeline, vertical[2]);

    let footer = if app.command_mode {
        Paragraph::new(Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(
                app.command_buffer.as_str(),
                Style::default().fg(colors.text),
            ),
        ]))
    } else {
        Paragraph::new(Line::from(vec![
            Span::styled(KEY_HINTS, Style::default().fg(colors.muted)),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(app.status.as_str(), Style::default().fg(colors.text)),
        ]))
    };
    frame.render_widget(
        footer.block(panel_block(
            "Message",
            colors.panel_bg,
            colors.text,
            colors.border,
        )),
        vertical[3],
    );
}

fn draw_library(
    frame: &mut Frame,
    area: Rect,
    session: &Session,
    app: &AppState,
    colors: &Palette,
) {
    let current = session.player().state().current.as_ref();
    let entries = session.library().entries();
    let items: Vec<ListItem> = entries
        .iter()
        .map(|entry| {
            let marker = if current == Some(&entry.reference) {
                "  > "
            } else {
                "    "
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(entry.title.as_str(), Style::default().fg(colors.text)),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select((!entries.is_empty()).then_some(app.library_selected));

    let border = if app.pane == Pane::Library {
        colors.focus_border
    } else {
        colors.border
    };
    let list = List::new(items)
        .block(panel_block("Library", colors.panel_bg, colors.text, border))
        .highlight_style(selected_style(colors))
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_queue(
    frame: &mut Frame,
    area: Rect,
    session: &Session,
    app: &AppState,
    colors: &Palette,
) {
    let queue = session.queue();
    let current_index = queue.current_index();
    let items: Vec<ListItem> = queue
        .items()
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let (marker, style) = if current_index == Some(index) {
                ("  > ", Style::default().fg(colors.accent))
            } else if current_index.is_some_and(|current| index < current) {
                ("    ", Style::default().fg(colors.muted))
            } else {
                ("    ", Style::default().fg(colors.text))
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(format!("{:>2}. {}", index + 1, reference.title()), style),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select((!queue.is_empty()).then_some(app.queue_selected));

    let title = format!(
        "Queue {}  |  Up next {}",
        queue_position(current_index, queue.len()),
        queue.upcoming().len()
    );
    let border = if app.pane == Pane::Queue {
        colors.focus_border
    } else {
        colors.border
    };
    let list = List::new(items)
        .block(panel_block(&title, colors.panel_alt_bg, colors.text, border))
        .highlight_style(selected_style(colors))
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn selected_style(colors: &Palette) -> Style {
    Style::default()
        .bg(colors.selected_bg)
        .fg(Color::White)
        .add_modifier(Modifier::BOLD)
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn now_playing_title(state: &PlayerState) -> String {
    state
        .current
        .as_ref()
        .map(|reference| reference.title())
        .unwrap_or_else(|| String::from("-"))
}

fn phase_label(phase: PlaybackPhase) -> &'static str {
    match phase {
        PlaybackPhase::Idle => "Idle",
        PlaybackPhase::Loading => "Loading",
        PlaybackPhase::Playing => "Playing",
        PlaybackPhase::Paused => "Paused",
        PlaybackPhase::Ended => "Ended",
        PlaybackPhase::StoppedByUser => "Stopped",
    }
}

fn queue_position(current: Option<usize>, len: usize) -> String {
    match current {
        Some(index) => format!("{}/{len}", index + 1),
        None => format!("-/{len}"),
    }
}

fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn timeline_line(
    state: &PlayerState,
    timeline_bar_width: usize,
    volume_bar_width: usize,
) -> String {
    let total = if state.duration_ms > 0 {
        format_duration(state.duration_ms)
    } else {
        String::from("--:--")
    };
    let track = state
        .current_audio_track
        .and_then(|id| state.audio_tracks.iter().position(|track| track.id == id))
        .map(|position| match position {
            0 => TrackKind::Original.label(),
            1 => TrackKind::Accompaniment.label(),
            _ => "Other",
        })
        .unwrap_or("-");

    format!(
        "{} / {} {}  |  Vol {} {:>3}%  |  Track {track}",
        format_duration(state.current_time_ms),
        total,
        progress_bar(state.progress(), timeline_bar_width),
        progress_bar(
            Some(f64::from(state.volume.clamp(0.0, 1.0))),
            volume_bar_width
        ),
        (state.volume * 100.0).round() as u16,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioTrack, MediaReference};

    #[test]
    fn durations_render_as_minutes_and_seconds() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(61_999), "01:01");
        assert_eq!(format_duration(-5), "00:00");
    }

    #[test]
    fn progress_bar_clamps_ratio() {
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(Some(3.0), 4), "[####]");
        assert_eq!(progress_bar(None, 4), "[----]");
    }

    #[test]
    fn timeline_names_the_active_track() {
        let state = PlayerState {
            current: Some(MediaReference::new("/ktv/song.mkv")),
            current_time_ms: 30_000,
            duration_ms: 60_000,
            volume: 0.5,
            audio_tracks: vec![
                AudioTrack {
                    id: 1,
                    name: String::from("Track 1"),
                },
                AudioTrack {
                    id: 2,
                    name: String::from("Track 2"),
                },
            ],
            current_audio_track: Some(2),
            ..PlayerState::default()
        };

        let line = timeline_line(&state, 4, 4);
        assert!(line.starts_with("00:30 / 01:00 [##--]"));
        assert!(line.contains(" 50%"));
        assert!(line.ends_with("Track Accompaniment"));
    }

    #[test]
    fn queue_position_without_current() {
        assert_eq!(queue_position(None, 3), "-/3");
        assert_eq!(queue_position(Some(1), 3), "2/3");
    }
}
