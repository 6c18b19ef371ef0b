//! Terminal output for the `facedeck` binary.

use facedeck_client::{Notice, Notifier, Panel};
use facedeck_core::render::View;
use std::fmt::Display;
use std::io::{self, BufRead, Write};

/// Prints notices to the terminal: successes to stdout, failures to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, kind: Notice, message: &str) {
        match kind {
            Notice::Info => println!("{message}"),
            Notice::Error => eprintln!("{message}"),
        }
    }
}

/// Print a loaded panel, one row per item, or its placeholder line.
pub fn print_panel<T, R>(view: View, panel: Option<Panel<T>>, row: impl Fn(&T) -> R)
where
    R: Display,
{
    // A superseded load has nothing to show; the newer one prints.
    let Some(panel) = panel else { return };
    match panel.placeholder(view) {
        Some(line) => println!("{line}"),
        None => {
            for item in panel.items() {
                println!("{}", row(item));
            }
        }
    }
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` declines.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    read_answer(io::stdin().lock())
}

fn read_answer(mut input: impl BufRead) -> io::Result<bool> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
