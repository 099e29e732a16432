//! Terminal monitor
//!
//! A local dashboard that shows per-node download progress while a swarm
//! runs, fed by the telemetry channel.

pub mod terminal;

pub use terminal::SwarmMonitor;

use crate::swarm::NodeState;
use crate::telemetry::TelemetryEvent;
use crossterm::event::{KeyCode, KeyEvent};

/// Events that can be triggered by user input
#[derive(Debug, Clone, PartialEq)]
pub enum UIEvent {
    /// User wants to quit the application
    Quit,
    /// User wants to pause/unpause the activity log
    TogglePause,
    /// User wants to show help
    ShowHelp,
    /// User pressed an unrecognized key
    Unknown(KeyCode),
}

impl From<KeyEvent> for UIEvent {
    fn from(key_event: KeyEvent) -> Self {
        match key_event.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => UIEvent::Quit,
            KeyCode::Char(' ') => UIEvent::TogglePause,
            KeyCode::Char('h') | KeyCode::Char('H') | KeyCode::F(1) => UIEvent::ShowHelp,
            KeyCode::Esc => UIEvent::Quit,
            other => UIEvent::Unknown(other),
        }
    }
}

/// Color scheme for the UI
#[derive(Debug, Clone, Copy)]
pub struct ColorScheme {
    pub complete: ratatui::style::Color,
    pub downloading: ratatui::style::Color,
    pub blocked: ratatui::style::Color,
    pub text: ratatui::style::Color,
    pub highlight: ratatui::style::Color,
    pub success: ratatui::style::Color,
    pub warning: ratatui::style::Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            complete: ratatui::style::Color::Green,
            downloading: ratatui::style::Color::Cyan,
            blocked: ratatui::style::Color::Yellow,
            text: ratatui::style::Color::White,
            highlight: ratatui::style::Color::Cyan,
            success: ratatui::style::Color::Green,
            warning: ratatui::style::Color::Yellow,
        }
    }
}

impl ColorScheme {
    /// Color used for a node in the given state
    pub fn for_state(&self, state: NodeState) -> ratatui::style::Color {
        match state {
            NodeState::Complete => self.complete,
            NodeState::Downloading => self.downloading,
            NodeState::Blocked => self.blocked,
        }
    }
}

/// Configuration for UI rendering
#[derive(Debug, Clone)]
pub struct UIConfig {
    /// Color scheme to use
    pub colors: ColorScheme,
    /// Update frequency in milliseconds
    pub update_interval_ms: u64,
    /// Maximum number of log entries to keep
    pub max_log_entries: usize,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            colors: ColorScheme::default(),
            update_interval_ms: 100,
            max_log_entries: 200,
        }
    }
}

/// Log entry shown in the activity panel
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Timestamp of the log entry
    pub timestamp: std::time::Instant,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: std::time::Instant::now(),
            level,
            message,
        }
    }

    pub fn info(message: String) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: String) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warn(message: String) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    /// Translate a telemetry event into a log line
    pub fn from_event(event: &TelemetryEvent) -> Self {
        match event {
            TelemetryEvent::NodeCompleted { .. } => Self::success(event.to_string()),
            TelemetryEvent::NodeRemoved { .. } => Self::warn(event.to_string()),
            _ => Self::info(event.to_string()),
        }
    }

    /// Format the log entry for display
    pub fn format(&self) -> String {
        let seconds = self.timestamp.elapsed().as_secs();
        let prefix = match self.level {
            LogLevel::Info => "[INFO]",
            LogLevel::Warning => "[WARN]",
            LogLevel::Success => "[OK]",
        };
        format!("[{:3}s] {} {}", seconds, prefix, self.message)
    }
}

/// Log levels for UI messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Success,
}

impl LogLevel {
    /// Get the color for this log level
    pub fn color(&self, colors: &ColorScheme) -> ratatui::style::Color {
        match self {
            LogLevel::Info => colors.text,
            LogLevel::Warning => colors.warning,
            LogLevel::Success => colors.success,
        }
    }
}

/// Help text for the monitor
pub const HELP_TEXT: &str = r#"
FEC Swarm Monitor - Controls

  Q, Esc    - Quit (aborts the run)
  Space     - Pause/unpause the activity log
  H, F1     - Show/hide this help

Node colors:
- Cyan: downloading
- Yellow: blocked on an in-flight transfer
- Green: complete

Press H to return to the monitor.
"#;

/// Utility functions for UI rendering
pub mod utils {
    use ratatui::layout::{Constraint, Direction, Layout, Rect};

    /// Create a centered rectangle with given width and height
    pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length((area.height.saturating_sub(height)) / 2),
                Constraint::Length(height),
                Constraint::Length((area.height.saturating_sub(height)) / 2),
            ])
            .split(area);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length((area.width.saturating_sub(width)) / 2),
                Constraint::Length(width),
                Constraint::Length((area.width.saturating_sub(width)) / 2),
            ])
            .split(popup_layout[1])[1]
    }

    /// Text progress bar of `width` cells
    pub fn progress_bar(ratio: f64, width: usize) -> String {
        let filled = ((ratio.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }
}
