//! Progress reported by the daemon while it refreshes metadata, downloads
//! and runs a transaction.
//!
//! Signals are decoded into [`ProgressEvent`]s by the listener in `dbus.rs`
//! and folded into a [`ProgressState`]. Phase changes are logged at info,
//! per-item progress at debug. When attached to a terminal the state is also
//! drawn as a small inline gauge on `/dev/tty`, below the normal output.

use std::fs::File;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use ratatui::{Terminal, TerminalOptions, Viewport};

use crate::backend::GpgKeyRequest;
use crate::types::size_str;

// ============================================================================
// Types
// ============================================================================

/// One decoded daemon signal
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TransactionEvent { event: String, data: String },
    RpmProgress {
        package: String,
        action: String,
        te_current: u64,
        te_total: u64,
        ts_current: i32,
        ts_total: i32,
    },
    DownloadStart { num_files: i32, num_bytes: u64 },
    DownloadProgress {
        name: String,
        frac: f64,
        total_frac: f64,
        total_files: i32,
    },
    DownloadEnd { name: String, status: i32, msg: String },
    RepoMetaDataProgress { name: String, frac: f64 },
    ErrorMessage(String),
    GpgImport(GpgKeyRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Idle,
    Refreshing,
    Resolving,
    Downloading,
    Verifying,
    Testing,
    Installing,
    Done,
    Failed,
}

impl ProgressPhase {
    /// Phase entered on a `TransactionEvent`
    pub fn from_transaction_event(event: &str) -> Option<Self> {
        match event {
            "start-build" => Some(Self::Resolving),
            "end-build" | "start-run" => Some(Self::Idle),
            "download" | "pkg-to-download" => Some(Self::Downloading),
            "signature-check" => Some(Self::Verifying),
            "run-test-transaction" => Some(Self::Testing),
            "run-transaction" => Some(Self::Installing),
            "end-run" => Some(Self::Done),
            "fail" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Waiting",
            Self::Refreshing => "Refreshing metadata",
            Self::Resolving => "Resolving dependencies",
            Self::Downloading => "Downloading",
            Self::Verifying => "Checking signatures",
            Self::Testing => "Testing transaction",
            Self::Installing => "Applying changes",
            Self::Done => "Complete",
            Self::Failed => "Failed",
        }
    }
}

/// Everything the display shows, folded from events
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub phase: ProgressPhase,
    /// 0.0 ..= 1.0 within the current phase
    pub fraction: f64,
    // Download phase
    pub download_files: i32,
    pub download_bytes: u64,
    pub files_done: i32,
    // Install phase
    pub install_done: i32,
    pub install_total: i32,
    /// Package, repo or file currently being worked on
    pub current: String,
    pub errors: Vec<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            phase: ProgressPhase::Idle,
            fraction: 0.0,
            download_files: 0,
            download_bytes: 0,
            files_done: 0,
            install_done: 0,
            install_total: 0,
            current: String::new(),
            errors: Vec::new(),
        }
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&mut self, phase: ProgressPhase) -> bool {
        if self.phase == phase {
            return false;
        }
        self.phase = phase;
        self.fraction = 0.0;
        self.current.clear();
        true
    }

    /// Fold one event in. Returns true when the phase changed.
    pub fn apply(&mut self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::TransactionEvent { event, .. } => {
                ProgressPhase::from_transaction_event(event).is_some_and(|phase| self.enter(phase))
            }
            ProgressEvent::RepoMetaDataProgress { name, frac } => {
                let changed = self.enter(ProgressPhase::Refreshing);
                self.current.clone_from(name);
                self.fraction = frac.clamp(0.0, 1.0);
                changed
            }
            ProgressEvent::DownloadStart { num_files, num_bytes } => {
                let changed = self.enter(ProgressPhase::Downloading);
                self.download_files = *num_files;
                self.download_bytes = *num_bytes;
                self.files_done = 0;
                changed
            }
            ProgressEvent::DownloadProgress { name, total_frac, .. } => {
                let changed = self.enter(ProgressPhase::Downloading);
                self.current.clone_from(name);
                self.fraction = total_frac.clamp(0.0, 1.0);
                changed
            }
            ProgressEvent::DownloadEnd { name, status, msg } => {
                self.files_done += 1;
                // dnf download status 1 is a failed download
                if *status == 1 {
                    self.errors.push(format!("{name}: {msg}"));
                }
                false
            }
            ProgressEvent::RpmProgress {
                package,
                action,
                ts_current,
                ts_total,
                ..
            } => {
                let changed = self.enter(ProgressPhase::Installing);
                self.install_done = *ts_current;
                self.install_total = *ts_total;
                self.current = format!("{action} {package}");
                self.fraction = if *ts_total > 0 {
                    (f64::from(*ts_current) / f64::from(*ts_total)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                changed
            }
            ProgressEvent::ErrorMessage(msg) => {
                self.errors.push(msg.clone());
                false
            }
            ProgressEvent::GpgImport(_) => false,
        }
    }

    /// One-line status, e.g. `Downloading 45% (3/7 files, 12.0 MB)`
    pub fn summary(&self) -> String {
        let percent = self.fraction * 100.0;
        match self.phase {
            ProgressPhase::Downloading => format!(
                "{} {percent:.0}% ({}/{} files, {})",
                self.phase.label(),
                self.files_done,
                self.download_files,
                size_str(self.download_bytes),
            ),
            ProgressPhase::Installing => format!(
                "{} {}/{} {}",
                self.phase.label(),
                self.install_done,
                self.install_total,
                self.current,
            ),
            ProgressPhase::Refreshing => format!("{} {} {percent:.0}%", self.phase.label(), self.current),
            phase => phase.label().to_string(),
        }
    }
}

/// Log an event after it was applied to `state`
pub fn log_event(state: &ProgressState, event: &ProgressEvent, phase_changed: bool) {
    if phase_changed {
        log::info!("{}", state.phase.label());
    }
    match event {
        ProgressEvent::ErrorMessage(msg) => log::error!("daemon: {msg}"),
        ProgressEvent::DownloadEnd { name, status: 1, msg } => log::warn!("download of {name} failed: {msg}"),
        ProgressEvent::GpgImport(req) => {
            log::info!("GPG key {} ({}) requested for {}", req.hexkeyid, req.userid, req.pkg_id);
        }
        ProgressEvent::TransactionEvent { event, data } => log::debug!("transaction event {event} {data}"),
        _ => log::debug!("{}", state.summary()),
    }
}

// ============================================================================
// Terminal display
// ============================================================================

const DISPLAY_HEIGHT: u16 = 5;

/// Held while a modal owns the terminal. Counts the modals that finished.
static TERMINAL: Mutex<u64> = Mutex::new(0);

/// Exclusive use of the terminal. The gauge skips frames while one is
/// held and redraws its whole viewport after it is dropped.
pub struct TerminalClaim(MutexGuard<'static, u64>);

impl Drop for TerminalClaim {
    fn drop(&mut self) {
        *self.0 += 1;
    }
}

/// Block until the gauge finishes its current frame, then keep it off the terminal
pub fn claim_terminal() -> TerminalClaim {
    TerminalClaim(TERMINAL.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Lock for one gauge frame. `None` while a modal holds the terminal;
/// otherwise whether a modal finished since the frame that saw `seen`.
fn try_frame(seen: &mut u64) -> Option<(MutexGuard<'static, u64>, bool)> {
    let guard = match TERMINAL.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return None,
    };
    let resumed = *guard != *seen;
    *seen = *guard;
    Some((guard, resumed))
}

/// Inline gauge drawn on `/dev/tty`, so it stays out of redirected stdout
pub struct ProgressDisplay {
    terminal: Terminal<CrosstermBackend<File>>,
    modals_seen: u64,
}

impl ProgressDisplay {
    pub fn open() -> std::io::Result<Self> {
        let tty = std::fs::OpenOptions::new().write(true).open("/dev/tty")?;
        let terminal = Terminal::with_options(
            CrosstermBackend::new(tty),
            TerminalOptions {
                viewport: Viewport::Inline(DISPLAY_HEIGHT),
            },
        )?;
        let modals_seen = *TERMINAL.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Self { terminal, modals_seen })
    }

    pub fn draw(&mut self, state: &ProgressState) {
        let Some((_frame_lock, resumed)) = try_frame(&mut self.modals_seen) else {
            return;
        };
        // The viewport position is stale after a modal left the alternate screen
        if resumed {
            drop(self.terminal.clear());
        }
        drop(self.terminal.draw(|frame| render_progress(frame, state)));
    }
}

fn render_progress(frame: &mut Frame, state: &ProgressState) {
    let area = frame.area();

    let border_color = match state.phase {
        ProgressPhase::Downloading | ProgressPhase::Refreshing => Color::Cyan,
        ProgressPhase::Failed => Color::Red,
        _ => Color::Green,
    };
    let block = Block::default()
        .title(format!(" {} ", state.phase.label()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // status
            Constraint::Length(1), // gauge
            Constraint::Length(1), // detail or last error
        ])
        .split(inner);

    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            state.summary(),
            Style::default().fg(Color::White).bold(),
        ))),
        chunks[0],
    );

    let ratio = if state.phase == ProgressPhase::Done {
        1.0
    } else {
        state.fraction
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(border_color).bg(Color::DarkGray))
        .ratio(ratio);
    frame.render_widget(gauge, chunks[1]);

    let detail = match state.errors.last() {
        Some(err) => Span::styled(err.as_str(), Style::default().fg(Color::Red)),
        None => Span::styled(state.current.as_str(), Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(Paragraph::new(Line::from(detail)), chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_pauses_while_a_modal_holds_the_terminal() {
        let mut seen = *TERMINAL.lock().unwrap();

        assert_eq!(try_frame(&mut seen).map(|(_, resumed)| resumed), Some(false));
        let claim = claim_terminal();
        assert!(try_frame(&mut seen).is_none());
        drop(claim);

        assert_eq!(try_frame(&mut seen).map(|(_, resumed)| resumed), Some(true));
        assert_eq!(try_frame(&mut seen).map(|(_, resumed)| resumed), Some(false));
    }

    #[test]
    fn transaction_events_drive_phases() {
        let mut state = ProgressState::new();
        let event = |name: &str| ProgressEvent::TransactionEvent {
            event: name.to_string(),
            data: String::new(),
        };

        assert!(state.apply(&event("start-build")));
        assert_eq!(state.phase, ProgressPhase::Resolving);
        assert!(!state.apply(&event("start-build")));
        assert!(!state.apply(&event("unknown-event")));
        assert!(state.apply(&event("end-run")));
        assert_eq!(state.phase, ProgressPhase::Done);
    }

    #[test]
    fn download_progress_updates_summary() {
        let mut state = ProgressState::new();
        state.apply(&ProgressEvent::DownloadStart {
            num_files: 2,
            num_bytes: 2 * 1024 * 1024,
        });
        state.apply(&ProgressEvent::DownloadProgress {
            name: String::from("foo.rpm"),
            frac: 1.0,
            total_frac: 0.5,
            total_files: 2,
        });
        state.apply(&ProgressEvent::DownloadEnd {
            name: String::from("foo.rpm"),
            status: 0,
            msg: String::new(),
        });
        assert_eq!(state.summary(), "Downloading 50% (1/2 files, 2.0 MB)");
        assert!(state.errors.is_empty());
    }

    #[test]
    fn failed_downloads_and_errors_are_collected() {
        let mut state = ProgressState::new();
        state.apply(&ProgressEvent::DownloadEnd {
            name: String::from("bar.rpm"),
            status: 1,
            msg: String::from("404"),
        });
        state.apply(&ProgressEvent::ErrorMessage(String::from("disk full")));
        assert_eq!(state.errors, vec!["bar.rpm: 404", "disk full"]);
    }

    #[test]
    fn rpm_progress_counts_packages() {
        let mut state = ProgressState::new();
        assert!(state.apply(&ProgressEvent::RpmProgress {
            package: String::from("foo-1.0-1.noarch"),
            action: String::from("install"),
            te_current: 10,
            te_total: 100,
            ts_current: 1,
            ts_total: 4,
        }));
        assert_eq!(state.phase, ProgressPhase::Installing);
        assert_eq!(state.summary(), "Applying changes 1/4 install foo-1.0-1.noarch");
        assert!((state.fraction - 0.25).abs() < f64::EPSILON);
    }
}
