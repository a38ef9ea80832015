//! Confirmation modals for the transaction protocol
//!
//! Each prompt takes over the terminal in the alternate screen and gives it
//! back when answered: y/Enter accepts, n/Esc/q declines, j/k and
//! PageUp/PageDown scroll.

use std::io;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::backend::{GpgKeyRequest, TransactionPreview};
use crate::core::Confirm;
use crate::progress::claim_terminal;
use crate::error::Result;
use crate::types::{PkgId, size_str};

struct Modal {
    title: &'static str,
    color: Color,
    lines: Vec<Line<'static>>,
    scroll: u16,
}

/// [`Confirm`] that asks on the terminal
#[derive(Default)]
pub struct TuiConfirm;

impl TuiConfirm {
    pub fn new() -> Self {
        Self
    }
}

impl Confirm for TuiConfirm {
    fn confirm_transaction(&mut self, preview: &TransactionPreview) -> Result<bool> {
        let mut modal = Modal {
            title: " Confirm Changes ",
            color: Color::Yellow,
            lines: preview_lines(preview),
            scroll: 0,
        };
        Ok(ask(&mut modal)?)
    }

    fn confirm_gpg_key(&mut self, request: &GpgKeyRequest) -> Result<bool> {
        let mut modal = Modal {
            title: " Import GPG Key ",
            color: Color::Red,
            lines: gpg_lines(request),
            scroll: 0,
        };
        Ok(ask(&mut modal)?)
    }
}

fn ask(modal: &mut Modal) -> io::Result<bool> {
    // Keeps the progress gauge from drawing into the modal
    let _claim = claim_terminal();
    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;

    let answer = run_modal(modal);

    // Give the terminal back even when drawing failed
    let restored = disable_raw_mode().and_then(|()| io::stdout().execute(LeaveAlternateScreen).map(drop));
    let answer = answer?;
    restored?;
    Ok(answer)
}

fn run_modal(modal: &mut Modal) -> io::Result<bool> {
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    loop {
        terminal.draw(|f| render_modal(f, modal))?;

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('y' | 'Y') | KeyCode::Enter => return Ok(true),
                KeyCode::Char('n' | 'N' | 'q') | KeyCode::Esc => return Ok(false),
                KeyCode::Down | KeyCode::Char('j') => modal.scroll = modal.scroll.saturating_add(1),
                KeyCode::Up | KeyCode::Char('k') => modal.scroll = modal.scroll.saturating_sub(1),
                KeyCode::PageDown => modal.scroll = modal.scroll.saturating_add(10),
                KeyCode::PageUp => modal.scroll = modal.scroll.saturating_sub(10),
                _ => {}
            }
        }
    }
}

fn render_modal(frame: &mut Frame, modal: &Modal) {
    let area = frame.area();
    let wanted = u16::try_from(modal.lines.len() + 4).unwrap_or(u16::MAX);
    let modal_width = 72.min(area.width.saturating_sub(4));
    let modal_height = wanted.min(area.height.saturating_sub(2));
    let modal_x = area.x + (area.width - modal_width) / 2;
    let modal_y = area.y + (area.height - modal_height) / 2;
    let modal_area = Rect::new(modal_x, modal_y, modal_width, modal_height);

    frame.render_widget(Clear, modal_area);

    let mut lines = modal.lines.clone();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "y/Enter: Yes │ n/Esc: No │ j/k: Scroll",
        Style::default().fg(Color::DarkGray),
    )));

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(modal.title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(modal.color)),
        )
        .wrap(Wrap { trim: false })
        .scroll((modal.scroll, 0));

    frame.render_widget(paragraph, modal_area);
}

// ============================================================================
// Modal content
// ============================================================================

fn action_color(action: &str) -> Color {
    match action {
        "install" | "localinstall" => Color::Green,
        "update" | "obsolete" => Color::Yellow,
        "remove" | "erase" => Color::Red,
        "downgrade" => Color::Magenta,
        "reinstall" => Color::Cyan,
        _ => Color::White,
    }
}

fn action_symbol(action: &str) -> &'static str {
    match action {
        "install" | "localinstall" => "+",
        "update" | "obsolete" => "↑",
        "remove" | "erase" => "-",
        "downgrade" => "↓",
        "reinstall" => "=",
        _ => "*",
    }
}

/// The resolved transaction, grouped by daemon action
pub fn preview_lines(preview: &TransactionPreview) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(Span::styled(
            "The following changes will be made:",
            Style::default().bold(),
        )),
        Line::from(""),
    ];

    for group in preview.groups.iter().filter(|g| !g.entries.is_empty()) {
        lines.push(Line::from(Span::styled(
            format!("{} ({}):", group.action.to_uppercase().replace('-', " "), group.entries.len()),
            Style::default().fg(action_color(&group.action)).bold(),
        )));
        let symbol = action_symbol(&group.action);
        for entry in &group.entries {
            lines.push(Line::from(format!(
                "  {symbol} {}  {}",
                entry.id.fullname(),
                size_str(entry.size)
            )));
            for old in &entry.replaces {
                lines.push(Line::from(Span::styled(
                    format!("      replacing {}", old.fullname()),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
        lines.push(Line::from(""));
    }

    lines.push(Line::from(format!("Download size: {}", size_str(preview.download_size()))));
    lines
}

pub fn gpg_lines(request: &GpgKeyRequest) -> Vec<Line<'static>> {
    let needed_by = request
        .pkg_id
        .parse::<PkgId>()
        .map(|id| id.fullname())
        .unwrap_or_else(|_| request.pkg_id.clone());

    vec![
        Line::from(Span::styled(
            format!("Import GPG key 0x{}?", request.hexkeyid),
            Style::default().fg(Color::Red).bold(),
        )),
        Line::from(""),
        Line::from(format!("User:      {}", request.userid)),
        Line::from(format!("From:      {}", request.keyurl)),
        Line::from(format!("Needed by: {needed_by}")),
    ]
}
