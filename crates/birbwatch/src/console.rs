//! Line-oriented front end: reads commands from stdin, prints notifications.
//!
//! Keeps its own mirror of the stream list (from `ListReplaced` /
//! `ItemUpdated`) and of the application state, so `list` and `select <n>`
//! never have to ask the engine.
use birb_core::app_state::{ApplicationState, StateEvent};
use birb_core::CoreEvent;
use birb_proto::protocol::{Command, Notification, StreamEntry, StreamId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

const HELP: &str = "\
commands:
  refresh | r         fetch and validate the stream list
  list | ls           show the current list
  select <n> | s <n>  select row n
  play [n] | p [n]    play the selected row (or row n)
  stop | settings     stop streaming
  state               show the application state
  quit | q            stop the proxy and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Core(Command),
    Select(usize),
    Play(Option<usize>),
    List,
    State,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let row = |arg: Option<&str>| -> Result<Option<usize>, String> {
        match arg {
            None => Ok(None),
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Some)
                .ok_or_else(|| format!("not a row number: {}", raw)),
        }
    };

    let input = match verb {
        "refresh" | "r" => Input::Core(Command::Refresh),
        "list" | "ls" => Input::List,
        "select" | "s" => match row(words.next())? {
            Some(n) => Input::Select(n),
            None => return Err("select needs a row number".to_string()),
        },
        "play" | "p" => Input::Play(row(words.next())?),
        "stop" | "settings" => Input::Core(Command::ShowSettings),
        "state" => Input::State,
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(Some(input))
}

/// Front-end mirror of the engine's published state.
struct View {
    rows: Vec<StreamEntry>,
    selected: Option<StreamId>,
    state: ApplicationState,
    show_status_streaming: bool,
}

impl View {
    fn new(show_status_streaming: bool) -> Self {
        Self {
            rows: Vec::new(),
            selected: None,
            state: ApplicationState::default(),
            show_status_streaming,
        }
    }

    fn id_at(&self, row: usize) -> Option<StreamId> {
        self.rows.get(row.checked_sub(1)?).map(|e| e.id)
    }

    fn row_of(&self, id: StreamId) -> Option<usize> {
        self.rows.iter().position(|e| e.id == id).map(|i| i + 1)
    }

    fn render_row(&self, row: usize, entry: &StreamEntry) -> String {
        let marker = if entry.status.playing {
            '▶'
        } else if Some(entry.id) == self.selected {
            '*'
        } else {
            ' '
        };
        format!(
            "{} {:>3}  {:<3}  {:<6}  {}  {}",
            marker,
            row,
            entry.status.health_label(),
            entry.status.quality.as_deref().unwrap_or("-"),
            entry.descriptor.name,
            entry.descriptor.description
        )
    }

    fn list(&self) -> Vec<String> {
        if self.rows.is_empty() {
            return vec!["(no streams; try 'refresh')".to_string()];
        }
        self.rows
            .iter()
            .enumerate()
            .map(|(i, e)| self.render_row(i + 1, e))
            .collect()
    }

    /// Fold one notification into the mirror and return the lines to print.
    fn apply(&mut self, note: Notification) -> Vec<String> {
        let mut out = Vec::new();

        // Hidden only while streaming both before and after this notification;
        // the proxy ending counts as leaving
        let was_streaming = self.state.streaming();
        if let Some(event) = StateEvent::from_notification(&note) {
            self.state.apply(event);
        }
        if let Some(status) = note.status_message() {
            let leaving = matches!(note, Notification::ProxyExited { .. });
            let quiet = was_streaming && self.state.streaming() && !leaving;
            if !quiet || self.show_status_streaming {
                out.push(format!("» {}", status));
            }
        }

        match note {
            Notification::ListReplaced { entries } => {
                self.rows = entries;
                out.extend(self.list());
            }
            Notification::ItemUpdated { entry } => {
                if let Some(i) = self.rows.iter().position(|e| e.id == entry.id) {
                    self.rows[i] = entry;
                    out.push(self.render_row(i + 1, &self.rows[i]));
                }
            }
            Notification::SelectedChanged { id, playable } => {
                self.selected = id;
                match id.and_then(|id| self.row_of(id)) {
                    Some(row) => out.push(format!(
                        "selected row {}{}",
                        row,
                        if playable { "" } else { " (not playable)" }
                    )),
                    None => out.push("selection cleared".to_string()),
                }
            }
            Notification::ProxyReady { url, .. } => {
                out.push(format!("stream ready: point your player at {}", url));
            }
            Notification::Log { message } => out.push(format!("! {}", message)),
            _ => {}
        }
        out
    }
}

/// Read stdin on a plain thread: a blocking read on tokio's pool would keep
/// the runtime from shutting down.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

pub async fn run(
    events: mpsc::UnboundedSender<CoreEvent>,
    mut notes: broadcast::Receiver<Notification>,
    show_status_streaming: bool,
) -> anyhow::Result<()> {
    let mut view = View::new(show_status_streaming);
    let mut lines = spawn_stdin_reader();
    println!("birbwatch: type 'help' for commands");

    loop {
        tokio::select! {
            note = notes.recv() => match note {
                Ok(note) => {
                    for line in view.apply(note) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("console: skipped {} notifications", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("console: stdin closed");
                    let _ = events.send(CoreEvent::Shutdown);
                    break;
                };
                let input = match parse_input(&line) {
                    Ok(Some(input)) => input,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                if !dispatch(&view, input, &events) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Returns false once the user asked to quit.
fn dispatch(view: &View, input: Input, events: &mpsc::UnboundedSender<CoreEvent>) -> bool {
    let send = |cmd: Command| {
        let _ = events.send(CoreEvent::Command(cmd));
    };
    match input {
        Input::Core(cmd) => send(cmd),
        Input::Select(row) => match view.id_at(row) {
            Some(id) => send(Command::Select { id: Some(id) }),
            None => println!("no row {}", row),
        },
        Input::Play(Some(row)) => match view.id_at(row) {
            Some(id) => {
                send(Command::Select { id: Some(id) });
                send(Command::Play);
            }
            None => println!("no row {}", row),
        },
        Input::Play(None) => send(Command::Play),
        Input::List => {
            for line in view.list() {
                println!("{}", line);
            }
        }
        Input::State => println!("state: {}", view.state),
        Input::Help => println!("{}", HELP),
        Input::Quit => {
            let _ = events.send(CoreEvent::Shutdown);
            return false;
        }
    }
    true
}
