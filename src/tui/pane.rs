use crate::terminal::{TerminalEmulator, Vt100Terminal};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

pub struct PaneView<'a> {
    pub title: String,
    pub focused: bool,
    pub terminal: Option<&'a Vt100Terminal>,
    /// Shown while there is no emulator to draw.
    pub placeholder: &'a str,
}

pub fn render(frame: &mut Frame, area: Rect, view: PaneView<'_>) {
    let border_style = if view.focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .title(format!(" {} ", view.title))
        .borders(Borders::ALL)
        .border_style(border_style);
    let inner_area = block.inner(area);

    let Some(terminal) = view.terminal else {
        let lines = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("  {}", view.placeholder),
                Style::default().fg(Color::Gray),
            )),
        ];
        frame.render_widget(Paragraph::new(lines).block(block), area);
        return;
    };

    let screen = terminal.screen();
    frame.render_widget(Paragraph::new(screen_lines(screen)).block(block), area);

    let buffer = terminal.buffer();
    if buffer.base_y > 0 && !buffer.alternate_screen {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
        let mut scrollbar_state = ScrollbarState::new(buffer.base_y).position(buffer.viewport_y);
        frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }

    if view.focused && buffer.is_following_output() && !screen.hide_cursor() {
        let (row, col) = screen.cursor_position();
        if inner_area.width > 0 && row < inner_area.height {
            let x = inner_area.x + col.min(inner_area.width - 1);
            frame.set_cursor_position((x, inner_area.y + row));
        }
    }
}

/// Visible rows of `screen` as styled lines.
fn screen_lines(screen: &vt100::Screen) -> Vec<Line<'static>> {
    let (rows, cols) = screen.size();
    let mut lines = Vec::with_capacity(rows as usize);

    for row in 0..rows {
        let mut spans = Vec::new();
        let mut current_text = String::new();
        let mut current_style = Style::default();

        for col in 0..cols {
            let Some(cell) = screen.cell(row, col) else {
                continue;
            };
            if cell.is_wide_continuation() {
                continue;
            }
            let cell_style = convert_style(cell);
            if cell_style != current_style && !current_text.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut current_text), current_style));
            }
            current_style = cell_style;

            // Empty cells keep later columns aligned.
            let contents = cell.contents();
            if contents.is_empty() {
                current_text.push(' ');
            } else {
                current_text.push_str(&contents);
            }
        }

        let text = if current_style.bg.is_some() {
            current_text
        } else {
            current_text.trim_end().to_string()
        };
        if !text.is_empty() {
            spans.push(Span::styled(text, current_style));
        }
        lines.push(Line::from(spans));
    }

    lines
}

fn convert_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default();

    let fg = cell.fgcolor();
    if !matches!(fg, vt100::Color::Default) {
        style = style.fg(convert_color(fg));
    }
    let bg = cell.bgcolor();
    if !matches!(bg, vt100::Color::Default) {
        style = style.bg(convert_color(bg));
    }

    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }

    style
}

fn convert_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(i) => Color::Indexed(i),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}
