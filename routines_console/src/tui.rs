//! Full-screen terminal view of one routine run.
//!
//! | Input | Effect |
//! |-------|--------|
//! | mouse wheel, arrows, `PageUp`, `PageDown` | scroll and pause auto-scroll |
//! | `End`, `G` | resume auto-scroll and jump to the end |
//! | `s`, `Esc` | stop the request |
//! | `r` | run the routine again |
//! | `q`, `Ctrl-C` | quit |

use crate::output::{OutputArea, ScrollView};
use crate::session::ConsoleSession;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Paragraph};
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::Handle;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const WHEEL_STEP: usize = 3;

/// What a key or mouse event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ScrollUp(usize),
    ScrollDown(usize),
    PageUp,
    PageDown,
    ScrollToEnd,
    Stop,
    Rerun,
    Quit,
}

impl Command {
    /// Any manual scrolling takes over from auto-scroll.
    pub fn pauses_scroll(self) -> bool {
        matches!(
            self,
            Self::ScrollUp(_) | Self::ScrollDown(_) | Self::PageUp | Self::PageDown
        )
    }
}

pub fn map_key(key: KeyEvent) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Command::Quit);
    }
    match key.code {
        KeyCode::Up => Some(Command::ScrollUp(1)),
        KeyCode::Down => Some(Command::ScrollDown(1)),
        KeyCode::PageUp => Some(Command::PageUp),
        KeyCode::PageDown => Some(Command::PageDown),
        KeyCode::End | KeyCode::Char('G') => Some(Command::ScrollToEnd),
        KeyCode::Char('s') | KeyCode::Esc => Some(Command::Stop),
        KeyCode::Char('r') => Some(Command::Rerun),
        KeyCode::Char('q') => Some(Command::Quit),
        _ => None,
    }
}

pub fn map_mouse(kind: MouseEventKind) -> Option<Command> {
    match kind {
        MouseEventKind::ScrollUp => Some(Command::ScrollUp(WHEEL_STEP)),
        MouseEventKind::ScrollDown => Some(Command::ScrollDown(WHEEL_STEP)),
        _ => None,
    }
}

/// Applies `command` to the session. Returns `false` when the UI should exit.
pub fn apply(
    command: Command,
    session: &ConsoleSession<ScrollView>,
    runtime: &Handle,
    action: &str,
    args: &[Value],
) -> bool {
    if command.pauses_scroll() {
        session.pause_scroll();
    }
    match command {
        Command::ScrollUp(lines) => session.output().scroll_up(lines),
        Command::ScrollDown(lines) => session.output().scroll_down(lines),
        Command::PageUp => session.output().page_up(),
        Command::PageDown => session.output().page_down(),
        Command::ScrollToEnd => session.scroll_to_end(),
        Command::Stop => {
            session.stop();
        }
        Command::Rerun => {
            // A second stream would paint over the first, so replace it.
            session.stop();
            spawn_run(session, runtime, action, args);
        }
        Command::Quit => {
            session.stop();
            return false;
        }
    }
    true
}

fn spawn_run(
    session: &ConsoleSession<ScrollView>,
    runtime: &Handle,
    action: &str,
    args: &[Value],
) {
    let session = session.clone();
    let action = action.to_string();
    let args = args.to_vec();
    runtime.spawn(async move { session.run(&action, &args).await });
}

/// Restores the terminal however the UI exits.
struct UiGuard;

impl Drop for UiGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
    }
}

/// Runs the UI on the calling thread until the user quits. Requests run on
/// `runtime`.
pub fn run(
    session: ConsoleSession<ScrollView>,
    runtime: Handle,
    action: &str,
    args: &[Value],
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let _guard = UiGuard;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    terminal.clear()?;

    spawn_run(&session, &runtime, action, args);

    loop {
        draw(&mut terminal, &session, action)?;

        if !event::poll(INPUT_POLL_INTERVAL)? {
            continue;
        }
        let command = match event::read()? {
            Event::Key(key) => map_key(key),
            Event::Mouse(mouse) => map_mouse(mouse.kind),
            _ => None,
        };
        if let Some(command) = command
            && !apply(command, &session, &runtime, action, args)
        {
            break;
        }
    }
    Ok(())
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    session: &ConsoleSession<ScrollView>,
    action: &str,
) -> anyhow::Result<()> {
    let running = session.is_running();
    let auto_scroll = session.auto_scroll();

    terminal.draw(|frame| {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(1)])
            .split(frame.area());

        let mut view = session.output();
        view.set_viewport(rows[0].height.saturating_sub(2) as usize);
        if auto_scroll {
            view.scroll_to_bottom();
        }

        let status = if running { "running" } else { "finished" };
        let title = format!(" {action} ({status}) ");
        let border = if running { Color::Yellow } else { Color::Green };
        let body = Paragraph::new(view.visible().join("\n")).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border))
                .title(title),
        );
        frame.render_widget(body, rows[0]);

        let scroll_state = if auto_scroll { "follow" } else { "paused" };
        let help = format!(
            "[{scroll_state}] line {}/{}  [End] follow  [s] stop  [r] rerun  [q] quit",
            view.offset() + view.visible().len(),
            view.lines().len()
        );
        frame.render_widget(
            Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
            rows[1],
        );
    })?;
    Ok(())
}
