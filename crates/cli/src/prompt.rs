//! Console prompter.
//!
//! Prompts go to stderr so command output on stdout stays clean. Passwords
//! are read in raw mode without echo when stdin is a terminal.

use std::io::{self, BufRead, IsTerminal, Write};

use client::{Endpoint, PromptFuture, Prompter};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

/// Prompter reading answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn request_credential(&self, endpoint: &Endpoint) -> PromptFuture<'_> {
        let prompt = format!("Password for {}: ", endpoint.name);
        Box::pin(blocking(move || read_secret(&prompt)))
    }

    fn request_text(&self, prompt: &str, default: &str) -> PromptFuture<'_> {
        let prompt = format!("{} [{}]: ", prompt, default);
        let default = default.to_string();
        Box::pin(blocking(move || {
            Ok(read_line(&prompt)?.map(|answer| {
                if answer.trim().is_empty() {
                    default
                } else {
                    answer
                }
            }))
        }))
    }

    fn choose_endpoint(&self, candidates: &[Endpoint]) -> PromptFuture<'_> {
        let candidates = candidates.to_vec();
        Box::pin(blocking(move || {
            let mut stderr = io::stderr();
            writeln!(stderr, "Create the session on which endpoint?")?;
            for (i, endpoint) in candidates.iter().enumerate() {
                writeln!(stderr, "  {}) {} ({})", i + 1, endpoint.name, endpoint.id)?;
            }
            let prompt = format!("Endpoint [1-{}]: ", candidates.len());
            Ok(read_line(&prompt)?.and_then(|answer| parse_choice(&answer, &candidates)))
        }))
    }
}

/// Runs a blocking prompt off the async runtime. Failures read as cancel.
async fn blocking<F>(f: F) -> Option<String>
where
    F: FnOnce() -> io::Result<Option<String>> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            tracing::warn!("Prompt failed: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!("Prompt task failed: {}", e);
            None
        }
    }
}

/// Reads one line. End of input is a cancel.
fn read_line(prompt: &str) -> io::Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_secret(prompt: &str) -> io::Result<Option<String>> {
    if !io::stdin().is_terminal() {
        return read_line(prompt);
    }

    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    enable_raw_mode()?;
    let result = read_secret_raw();
    let restored = disable_raw_mode();
    writeln!(stderr)?;
    restored?;
    result
}

fn read_secret_raw() -> io::Result<Option<String>> {
    let mut secret = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(Some(secret)),
            KeyCode::Esc => return Ok(None),
            KeyCode::Char('c') | KeyCode::Char('d')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                return Ok(None)
            }
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    }
}

/// Resolves an answer to an endpoint id: a 1-based index, an id or a name.
fn parse_choice(answer: &str, candidates: &[Endpoint]) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| candidates.get(i))
            .map(|e| e.id.clone());
    }
    candidates
        .iter()
        .find(|e| e.id == answer)
        .or_else(|| candidates.iter().find(|e| e.name.eq_ignore_ascii_case(answer)))
        .map(|e| e.id.clone())
}
