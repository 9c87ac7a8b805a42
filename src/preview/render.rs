//! Drawing the camera frame and status with ratatui

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::capture::Frame;
use crate::orchestrator::{InteractionState, Status};
use crate::session::Mode;

/// Upper half block: foreground is the top pixel, background the bottom one
const HALF_BLOCK: &str = "▀";

const HELP: &str = " Space=ask  f=follow-up  1/2/3=mode  q=quit ";

/// Draw the whole preview
pub fn draw(f: &mut ratatui::Frame<'_>, frame: Option<&Frame>, status: &Status) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(6)])
        .split(f.area());

    let camera = Block::default()
        .borders(Borders::ALL)
        .title(" lookout ")
        .title_bottom(HELP);
    let inner = camera.inner(chunks[0]);
    f.render_widget(camera, chunks[0]);

    match frame {
        Some(frame) if status.camera_ok => {
            f.render_widget(Paragraph::new(frame_lines(frame, inner.width, inner.height)), inner);
        }
        _ => {
            let message = if status.camera_ok {
                "waiting for camera..."
            } else {
                "camera unavailable"
            };
            f.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    message,
                    Style::default().fg(Color::Yellow),
                ))),
                centered(inner),
            );
        }
    }

    f.render_widget(
        Paragraph::new(status_lines(status))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL)),
        chunks[1],
    );
}

/// Scale a frame into `cols` x `rows` cells, two pixel rows per cell
#[must_use]
pub fn frame_lines(frame: &Frame, cols: u16, rows: u16) -> Vec<Line<'static>> {
    if cols == 0 || rows == 0 {
        return Vec::new();
    }

    let (width, height) = fit(frame.width(), frame.height(), u32::from(cols), u32::from(rows) * 2);
    let sample = |x: u32, y: u32| {
        let [r, g, b] = frame.pixel(x * frame.width() / width, y * frame.height() / height);
        Color::Rgb(r, g, b)
    };

    (0..height.div_ceil(2))
        .map(|row| {
            let spans = (0..width)
                .map(|x| {
                    let top = sample(x, row * 2);
                    let bottom = sample(x, (row * 2 + 1).min(height - 1));
                    Span::styled(HALF_BLOCK, Style::default().fg(top).bg(bottom))
                })
                .collect::<Vec<_>>();
            Line::from(spans)
        })
        .collect()
}

/// Largest size with the frame's aspect ratio inside `max_w` x `max_h`
fn fit(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scaled_h = (u64::from(height) * u64::from(max_w) / u64::from(width.max(1))).max(1);
    if scaled_h <= u64::from(max_h) {
        (max_w, u32::try_from(scaled_h).unwrap_or(max_h))
    } else {
        let scaled_w = (u64::from(width) * u64::from(max_h) / u64::from(height.max(1))).max(1);
        (u32::try_from(scaled_w).unwrap_or(max_w), max_h)
    }
}

fn status_lines(status: &Status) -> Vec<Line<'static>> {
    let state_style = match status.state {
        InteractionState::Idle => Style::default().fg(Color::Green),
        InteractionState::Listening => Style::default().fg(Color::Red),
        InteractionState::Stopped => Style::default().fg(Color::DarkGray),
        _ => Style::default().fg(Color::Yellow),
    }
    .add_modifier(Modifier::BOLD);

    let modes = Mode::ALL
        .iter()
        .map(|mode| {
            let label = format!(" {}:{} ", mode.key(), mode);
            if *mode == status.mode {
                Span::styled(label, Style::default().add_modifier(Modifier::REVERSED))
            } else {
                Span::raw(label)
            }
        })
        .collect::<Vec<_>>();

    let mut header = vec![
        Span::styled(format!(" {} ", status.state.label().to_uppercase()), state_style),
        Span::raw(format!("  turns: {} ", status.turns)),
    ];
    header.extend(modes);

    let mut lines = vec![Line::from(header)];
    if let Some(question) = &status.last_question {
        lines.push(Line::from(format!("Q: {question}")));
    }
    if let Some(answer) = &status.last_answer {
        lines.push(Line::from(format!("A: {answer}")));
    }
    if let Some(notice) = &status.notice {
        lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::Yellow),
        )));
    }
    lines
}

fn centered(area: Rect) -> Rect {
    let top = area.height / 2;
    Rect {
        y: area.y + top,
        height: area.height.saturating_sub(top).min(1),
        ..area
    }
}

#[cfg(test)]
mod tests {
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use super::*;
    use crate::capture::RawFrame;

    fn checker() -> Frame {
        // 2x2: red, green / blue, white
        let rgb = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        Frame::new(
            1,
            RawFrame {
                width: 2,
                height: 2,
                rgb,
            },
        )
        .unwrap()
    }

    #[test]
    fn half_blocks_carry_two_pixels() {
        let lines = frame_lines(&checker(), 2, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].spans.len(), 2);

        let first = &lines[0].spans[0];
        assert_eq!(first.content, HALF_BLOCK);
        assert_eq!(first.style.fg, Some(Color::Rgb(255, 0, 0)));
        assert_eq!(first.style.bg, Some(Color::Rgb(0, 0, 255)));
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit(640, 480, 80, 120), (80, 60));
        assert_eq!(fit(640, 480, 200, 60), (80, 60));
    }

    #[test]
    fn empty_area_draws_nothing() {
        assert!(frame_lines(&checker(), 0, 5).is_empty());
    }

    #[test]
    fn draws_status_without_frame() {
        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();
        let mut status = Status::new(Mode::Street);
        status.last_answer = Some("A wooden table.".to_string());

        terminal.draw(|f| draw(f, None, &status)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("waiting for camera"));
        assert!(text.contains("A wooden table."));
        assert!(text.contains("READY"));
    }
}
