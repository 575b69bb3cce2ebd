//! Interactive text menu: pick a mode by number, `q` to quit.
//!
//! Keyboard input and Ctrl+C both arrive as [`MenuEvent`]s on one channel,
//! so the loop can block on a single `recv()` and still shut down cleanly
//! when interrupted.
//!
//! ## Rust concepts
//! - Funnelling several event sources into one `mpsc` channel
//! - Generic `W: Write` output so tests can capture what the menu prints

use crate::controller::Controller;
use crate::pattern::{Mode, ModeParams};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// Something the menu loop has to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MenuEvent {
    /// A line typed by the user, without the newline.
    Line(String),
    /// Standard input was closed.
    Eof,
    /// Ctrl+C or SIGTERM.
    Interrupt,
}

/// What a line of input asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Quit,
    Start(Mode),
    InvalidMode,
    InvalidInput,
}

pub fn parse_choice(input: &str) -> Choice {
    let input = input.trim().to_lowercase();
    if input == "q" {
        return Choice::Quit;
    }
    if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
        return Choice::InvalidInput;
    }
    input
        .parse::<u8>()
        .ok()
        .and_then(|code| Mode::try_from(code).ok())
        .map_or(Choice::InvalidMode, Choice::Start)
}

pub fn print_menu<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\nLED Control System")?;
    writeln!(out, "Available modes:")?;
    for mode in Mode::ALL {
        writeln!(out, "{} - {}", mode as u8, mode.label())?;
    }
    writeln!(out, "q - Quit")
}

/// Run the menu on stdin/stdout until the user quits or Ctrl+C/SIGTERM arrives,
/// then shut the controller down.
pub fn run(controller: &mut Controller) -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();

    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(MenuEvent::Interrupt);
    })?;
    spawn_stdin_reader(tx);

    drive(controller, &rx, &mut io::stdout())
}

/// Forward stdin lines as events until EOF.
fn spawn_stdin_reader(tx: Sender<MenuEvent>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(MenuEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(MenuEvent::Eof);
    });
}

/// The menu loop itself, independent of where events and output go.
pub fn drive<W: Write>(
    controller: &mut Controller,
    events: &Receiver<MenuEvent>,
    out: &mut W,
) -> Result<(), Box<dyn Error>> {
    print_menu(out)?;

    loop {
        write!(out, "\nEnter mode (0-6) or 'q' to quit: ")?;
        out.flush()?;

        let line = match events.recv() {
            Ok(MenuEvent::Line(line)) => line,
            Ok(MenuEvent::Interrupt) => {
                writeln!(out, "\nShutting down LED controller...")?;
                break;
            }
            Ok(MenuEvent::Eof) | Err(_) => break,
        };

        match parse_choice(&line) {
            Choice::Quit => break,
            Choice::Start(mode) => {
                match controller.start_mode(mode as u8, &ModeParams::default()) {
                    Ok(report) => {
                        writeln!(out, "Started mode {} ({})", mode as u8, report.pattern)?;
                        if report.previous.is_abandoned() {
                            writeln!(out, "Warning: previous pattern did not stop in time")?;
                        }
                    }
                    Err(diagnostic) => writeln!(out, "{diagnostic}")?,
                }
            }
            Choice::InvalidMode => writeln!(out, "Invalid mode. Please enter 0-6.")?,
            Choice::InvalidInput => {
                writeln!(out, "Invalid input. Please enter a number 0-6 or 'q'.")?
            }
        }
    }

    controller.shutdown()?;
    writeln!(out, "LED controller stopped and cleaned up")?;
    Ok(())
}
