//! Terminal monitor implementation using ratatui
//!
//! Runs a simulation in the background and renders each node's progress
//! alongside the telemetry stream until the swarm finishes.

use crate::simulation::{SimulationReport, SimulationStatus, Simulator};
use crate::swarm::{NodeId, NodeState};
use crate::telemetry::TelemetryEvent;
use crate::ui::{utils, LogEntry, UIConfig, UIEvent, HELP_TEXT};
use crate::Result;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One row of the node table
#[derive(Debug, Clone)]
struct NodeRow {
    id: NodeId,
    state: NodeState,
    progress: f64,
    sim_time: f64,
}

/// Live dashboard for a running swarm
pub struct SwarmMonitor {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    config: UIConfig,
    log_entries: Vec<LogEntry>,
    last_update: Instant,
    /// Stop appending events to the activity log
    paused: bool,
    show_help: bool,
    title: String,
}

impl SwarmMonitor {
    pub fn new() -> Result<Self> {
        let stdout = io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            config: UIConfig::default(),
            log_entries: Vec::new(),
            last_update: Instant::now(),
            paused: false,
            show_help: false,
            title: String::from("FEC Swarm"),
        })
    }

    /// Run `simulator` to completion while rendering it
    ///
    /// Quitting early aborts the run and returns the state reached so far.
    pub async fn run(
        &mut self,
        simulator: Simulator,
        mut events: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> Result<SimulationReport> {
        enable_raw_mode()?;
        execute!(self.terminal.backend_mut(), EnterAlternateScreen)?;

        let descriptor = *simulator.coordinator().descriptor();
        self.title = format!(
            "FEC Swarm - {} segments x {} chunks",
            descriptor.num_segments(),
            descriptor.segment_size
        );
        self.log(LogEntry::info("Swarm started".to_string()));
        self.log(LogEntry::info("Press 'H' for help, 'Q' to quit".to_string()));

        let started = Instant::now();
        let simulator = Arc::new(simulator);
        let runner = {
            let simulator = Arc::clone(&simulator);
            tokio::spawn(async move { simulator.run().await })
        };
        let mut keys = self.setup_event_handling();

        let outcome = loop {
            if runner.is_finished() {
                break None;
            }

            let mut quit = false;
            while let Ok(key) = keys.try_recv() {
                match key {
                    UIEvent::Quit => quit = true,
                    UIEvent::TogglePause => {
                        self.paused = !self.paused;
                        let msg = if self.paused { "Log paused" } else { "Log resumed" };
                        self.log(LogEntry::info(msg.to_string()));
                    }
                    UIEvent::ShowHelp => self.show_help = !self.show_help,
                    UIEvent::Unknown(_) => {}
                }
            }
            if quit {
                runner.abort();
                self.log(LogEntry::warn("Run aborted".to_string()));
                break Some(simulator.report(true, started.elapsed()));
            }

            while let Ok(event) = events.try_recv() {
                if !self.paused {
                    self.log(LogEntry::from_event(&event));
                }
            }

            if self.last_update.elapsed() >= Duration::from_millis(self.config.update_interval_ms) {
                self.draw(&simulator)?;
                self.last_update = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        let report = match outcome {
            Some(report) => report,
            None => match runner.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(crate::SwarmError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("simulation task failed: {}", e),
                    )))
                }
            },
        };

        self.cleanup()?;
        Ok(report)
    }

    /// Forward key presses from a blocking poll loop
    fn setup_event_handling(&self) -> mpsc::UnboundedReceiver<UIEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::task::spawn_blocking(move || loop {
            if let Ok(true) = event::poll(Duration::from_millis(50)) {
                if let Ok(Event::Key(key)) = event::read() {
                    if tx.send(UIEvent::from(key)).is_err() {
                        break;
                    }
                }
            } else if tx.is_closed() {
                break;
            }
        });

        rx
    }

    fn draw(&mut self, simulator: &Simulator) -> Result<()> {
        let status = simulator.status();
        let rows: Vec<NodeRow> = simulator
            .coordinator()
            .nodes()
            .iter()
            .map(|n| NodeRow {
                id: n.id,
                state: n.state(),
                progress: n.file().progress(),
                sim_time: n.sim_time(),
            })
            .collect();

        let config = self.config.clone();
        let log_entries = self.log_entries.clone();
        let title = self.title.clone();
        let show_help = self.show_help;
        let paused = self.paused;

        self.terminal.draw(|f| {
            if show_help {
                Self::render_help(f, &config);
            } else {
                Self::render_main(f, &title, &status, &rows, &log_entries, &config, paused);
            }
        })?;
        Ok(())
    }

    fn render_main(
        f: &mut Frame,
        title: &str,
        status: &SimulationStatus,
        rows: &[NodeRow],
        log_entries: &[LogEntry],
        config: &UIConfig,
        paused: bool,
    ) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),  // Title
                Constraint::Min(8),     // Nodes and overall progress
                Constraint::Length(10), // Logs
            ])
            .split(f.size());

        let block = Block::default()
            .borders(Borders::ALL)
            .style(Style::default().fg(config.colors.highlight));
        let heading = Paragraph::new(title)
            .block(block)
            .alignment(Alignment::Center)
            .style(Style::default().add_modifier(Modifier::BOLD));
        f.render_widget(heading, chunks[0]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(2, 3), Constraint::Ratio(1, 3)])
            .split(chunks[1]);

        Self::render_nodes(f, main_chunks[0], rows, config);
        Self::render_statistics(f, main_chunks[1], status, config);
        Self::render_logs(f, chunks[2], log_entries, config, paused);
    }

    fn render_nodes(f: &mut Frame, area: Rect, rows: &[NodeRow], config: &UIConfig) {
        let block = Block::default().title("Nodes").borders(Borders::ALL);
        let bar_width = (area.width as usize).saturating_sub(40).clamp(10, 40);

        let items: Vec<ListItem> = rows
            .iter()
            .map(|row| {
                let line = format!(
                    "#{:<3} {} {:>5.1}%  {:<11} {:>8.2}s",
                    row.id,
                    utils::progress_bar(row.progress, bar_width),
                    row.progress * 100.0,
                    row.state.to_string(),
                    row.sim_time
                );
                ListItem::new(line).style(Style::default().fg(config.colors.for_state(row.state)))
            })
            .collect();

        f.render_widget(List::new(items).block(block), area);
    }

    fn render_statistics(f: &mut Frame, area: Rect, status: &SimulationStatus, config: &UIConfig) {
        let block = Block::default().title("Swarm").borders(Borders::ALL);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(4)])
            .split(inner);

        let gauge = Gauge::default()
            .block(Block::default().title("Data held").borders(Borders::ALL))
            .gauge_style(Style::default().fg(config.colors.success))
            .ratio(status.progress.clamp(0.0, 1.0));
        f.render_widget(gauge, chunks[0]);

        let stats_text = format!(
            "Total Nodes: {}\nComplete: {}\nDownloading: {}\nBlocked: {}\n\nFinished: {:.0}%",
            status.total_nodes,
            status.complete_nodes,
            status.downloading_nodes,
            status.blocked_nodes,
            status.completion_percentage()
        );
        f.render_widget(Paragraph::new(stats_text).wrap(Wrap { trim: true }), chunks[1]);
    }

    fn render_logs(
        f: &mut Frame,
        area: Rect,
        log_entries: &[LogEntry],
        config: &UIConfig,
        paused: bool,
    ) {
        let title = if paused {
            "Activity Log (paused)"
        } else {
            "Activity Log"
        };
        let block = Block::default().title(title).borders(Borders::ALL);

        let items: Vec<ListItem> = log_entries
            .iter()
            .rev()
            .take(area.height.saturating_sub(2) as usize)
            .map(|entry| {
                let color = entry.level.color(&config.colors);
                ListItem::new(entry.format()).style(Style::default().fg(color))
            })
            .collect();

        f.render_widget(List::new(items).block(block), area);
    }

    fn render_help(f: &mut Frame, config: &UIConfig) {
        let area = f.size();
        f.render_widget(Clear, area);

        let popup_area = utils::centered_rect(60, 18, area);
        let block = Block::default()
            .title("Help")
            .borders(Borders::ALL)
            .style(Style::default().fg(config.colors.highlight));

        let paragraph = Paragraph::new(HELP_TEXT)
            .block(block)
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(config.colors.text));
        f.render_widget(paragraph, popup_area);
    }

    fn log(&mut self, entry: LogEntry) {
        self.log_entries.push(entry);
        if self.log_entries.len() > self.config.max_log_entries {
            self.log_entries.remove(0);
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for SwarmMonitor {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
