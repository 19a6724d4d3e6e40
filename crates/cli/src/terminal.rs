//! Raw-mode terminal front end for `conductor attach`.
//!
//! Keystrokes are read on a blocking thread and forwarded to the
//! supervisor as terminal events; session output is written straight to
//! stdout. `Ctrl-]` detaches.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use client::{Geometry, Renderer, RendererFactory, SessionTarget, Supervisor, TerminalEvent};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;

/// How often the input thread checks whether it should stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the input event channel.
const EVENT_BUFFER_SIZE: usize = 64;

/// Renderer writing session output to stdout.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    disposed: AtomicBool,
}

impl Renderer for TerminalRenderer {
    fn write(&self, text: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout
            .write_all(text.as_bytes())
            .and_then(|()| stdout.flush())
        {
            tracing::debug!("Failed to write to terminal: {}", e);
        }
    }

    fn geometry(&self) -> Geometry {
        match terminal::size() {
            Ok((cols, rows)) => Geometry::new(rows, cols),
            Err(_) => Geometry::default(),
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Hands out a [`TerminalRenderer`] per selected session.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalRenderers;

impl RendererFactory for TerminalRenderers {
    fn create(&self, _target: &SessionTarget) -> Arc<dyn Renderer> {
        Arc::new(TerminalRenderer::default())
    }
}

/// Keeps the terminal in raw mode; restores it when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnableBracketedPaste) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), DisableBracketedPaste);
        let _ = disable_raw_mode();
    }
}

/// What a key press means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Bytes to send as input.
    Send(String),
    /// Leave the session.
    Detach,
    /// Nothing to send.
    Ignore,
}

/// Translates a key press into the byte sequence a terminal would send.
pub fn key_to_input(key: &KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let sequence = match key.code {
        // Most terminals report Ctrl-] as Ctrl-5.
        KeyCode::Char(']') | KeyCode::Char('5') if ctrl => return KeyAction::Detach,
        KeyCode::Char(c) if ctrl => match control_byte(c) {
            Some(byte) => char::from(byte).to_string(),
            None => return KeyAction::Ignore,
        },
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::BackTab => "\x1b[Z".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::Insert => "\x1b[2~".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        KeyCode::F(n) => match function_key(n) {
            Some(seq) => seq.to_string(),
            None => return KeyAction::Ignore,
        },
        _ => return KeyAction::Ignore,
    };

    if alt {
        KeyAction::Send(format!("\x1b{}", sequence))
    } else {
        KeyAction::Send(sequence)
    }
}

fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        '^' | '6' => Some(0x1e),
        '_' | '7' => Some(0x1f),
        '8' | '?' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<&'static str> {
    let seq = match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    };
    Some(seq)
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Forward(TerminalEvent),
    Detach,
    Skip,
}

/// Maps a terminal event to what the supervisor should see.
fn translate(event: Event) -> Step {
    match event {
        Event::Key(key) => match key_to_input(&key) {
            KeyAction::Send(data) => Step::Forward(TerminalEvent::Input(data)),
            KeyAction::Detach => Step::Detach,
            KeyAction::Ignore => Step::Skip,
        },
        Event::Paste(text) => Step::Forward(TerminalEvent::Input(text)),
        Event::Resize(cols, rows) => {
            Step::Forward(TerminalEvent::Resize(Geometry::new(rows, cols)))
        }
        _ => Step::Skip,
    }
}

/// Reads terminal events on a blocking thread until `stop` is set or the
/// receiver goes away.
fn spawn_event_reader(
    tx: mpsc::Sender<Event>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::SeqCst) {
            match event::poll(POLL_INTERVAL) {
                Ok(true) => match event::read() {
                    Ok(event) => {
                        if tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read terminal event: {}", e);
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to poll terminal: {}", e);
                    break;
                }
            }
        }
    })
}

/// Attaches the terminal to `target` until the user detaches.
pub async fn attach(supervisor: &mut Supervisor, target: SessionTarget) -> anyhow::Result<()> {
    let guard = RawModeGuard::enable().context("Failed to put terminal in raw mode")?;
    {
        let mut stdout = io::stdout().lock();
        write!(
            stdout,
            "\x1b[2m[Attached to {}. Press Ctrl-] to detach.]\x1b[0m\r\n",
            target
        )?;
        stdout.flush()?;
    }

    supervisor.select_session(target.clone());

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let stop = Arc::new(AtomicBool::new(false));
    let reader = spawn_event_reader(tx, Arc::clone(&stop));

    while let Some(event) = rx.recv().await {
        match translate(event) {
            Step::Forward(event) => supervisor.handle_event(event),
            Step::Detach => break,
            Step::Skip => {}
        }
    }

    stop.store(true, Ordering::SeqCst);
    supervisor.clear();
    drop(rx);
    if let Err(e) = reader.await {
        tracing::debug!("Input thread ended abnormally: {}", e);
    }
    drop(guard);

    println!("\n[Detached from {}]", target);
    Ok(())
}
