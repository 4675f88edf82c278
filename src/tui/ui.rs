use crate::app::{AppState, Tab};
use crate::spawn::{LifecycleTracker, SpawnError, SpawnState};
use crate::tui::pane::{self, PaneView};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

pub fn draw(frame: &mut Frame, state: &AppState, lifecycle: &LifecycleTracker) {
    let layout = state.layout();
    render_tab_bar(frame, layout.tab_bar, state, lifecycle);

    for (idx, area) in layout.panes.iter().enumerate() {
        let mounted = state.panes[idx].terminal.as_ref();
        let tab = mounted.and_then(|id| state.tab(id));
        let title = match tab {
            Some(tab) => format!("{} {}", tab.kind.badge(), tab.title()),
            None => format!("Pane {}", idx + 1),
        };
        let placeholder = match mounted {
            Some(id) if !state.registry.has(id) => "Loading terminal...",
            Some(_) => "",
            None if state.tabs.is_empty() => "No terminals. Alt-n opens a shell, Alt-a an agent.",
            None => "Empty pane. Alt-1..9 shows a tab here.",
        };
        pane::render(
            frame,
            *area,
            PaneView {
                title,
                focused: idx == state.focused_pane,
                terminal: mounted.and_then(|id| state.registry.get(id)),
                placeholder,
            },
        );
    }

    render_status_bar(frame, layout.status_bar, state, lifecycle);
}

fn render_tab_bar(frame: &mut Frame, area: Rect, state: &AppState, lifecycle: &LifecycleTracker) {
    let focused = state.focused_terminal();
    let mut spans = Vec::new();
    for (idx, tab) in state.tabs.iter().enumerate() {
        let style = if Some(&tab.id) == focused {
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else if state.pane_showing(&tab.id).is_some() {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::styled(tab_label(idx, tab, lifecycle.state(&tab.id)), style));
        spans.push(Span::raw(" "));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_status_bar(frame: &mut Frame, area: Rect, state: &AppState, lifecycle: &LifecycleTracker) {
    let (text, style) = match &state.last_error {
        Some(err) => (
            error_text(err),
            Style::default().fg(Color::White).bg(Color::Red),
        ),
        None => {
            let current = state
                .focused_tab()
                .map(|tab| describe_state(tab, lifecycle.state(&tab.id)))
                .unwrap_or_else(|| "no terminal".to_string());
            (
                format!(
                    " {} | Alt-n shell  Alt-a agent  Alt-s split  Alt-r restart  Alt-w close  Alt-q quit",
                    current
                ),
                Style::default().fg(Color::White).bg(Color::DarkGray),
            )
        }
    };
    frame.render_widget(Paragraph::new(Line::from(Span::raw(text))).style(style), area);
}

fn state_marker(tab: &Tab, state: Option<SpawnState>) -> &'static str {
    if tab.exited.is_some() {
        return "x";
    }
    match state {
        None => "-",
        Some(SpawnState::Spawned) => "…",
        Some(SpawnState::Ready) => "●",
        Some(SpawnState::Failed) => "!",
    }
}

pub fn tab_label(idx: usize, tab: &Tab, state: Option<SpawnState>) -> String {
    format!(" {}:{} {} ", idx + 1, tab.title(), state_marker(tab, state))
}

fn describe_state(tab: &Tab, state: Option<SpawnState>) -> String {
    if let Some(code) = tab.exited {
        return format!("{} exited ({}), Alt-r restarts", tab.title(), code);
    }
    match state {
        None => format!("{} idle", tab.title()),
        Some(state) => format!("{} {}", tab.title(), state),
    }
}

pub fn error_text(err: &SpawnError) -> String {
    if err.is_timeout() {
        format!(" {} | press Alt-r to restart", err)
    } else if err.offers_restart() {
        format!(" {} | Alt-r to retry", err)
    } else {
        format!(" {}", err)
    }
}
