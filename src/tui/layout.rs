use ratatui::layout::{Constraint, Direction, Layout, Rect};

pub const MIN_SPLIT_RATIO: f32 = 0.2;
pub const MAX_SPLIT_RATIO: f32 = 0.8;

/// Screen regions for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenLayout {
    pub tab_bar: Rect,
    pub panes: Vec<Rect>,
    pub status_bar: Rect,
}

/// Tab bar on top, status bar at the bottom, one or two panes side by side.
pub fn compute(area: Rect, split: bool, ratio: f32) -> ScreenLayout {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    let panes = if split {
        let main = rows[1];
        let left = ((main.width as f32) * ratio.clamp(MIN_SPLIT_RATIO, MAX_SPLIT_RATIO)).round() as u16;
        let left = left.min(main.width);
        vec![
            Rect::new(main.x, main.y, left, main.height),
            Rect::new(main.x + left, main.y, main.width - left, main.height),
        ]
    } else {
        vec![rows[1]]
    };

    ScreenLayout {
        tab_bar: rows[0],
        panes,
        status_bar: rows[2],
    }
}

/// Content area of a bordered pane.
pub fn inner(area: Rect) -> Rect {
    Rect::new(
        area.x.saturating_add(1),
        area.y.saturating_add(1),
        area.width.saturating_sub(2),
        area.height.saturating_sub(2),
    )
}

pub fn contains(area: Rect, x: u16, y: u16) -> bool {
    x >= area.x && x < area.x + area.width && y >= area.y && y < area.y + area.height
}
