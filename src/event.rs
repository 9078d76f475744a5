use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::worker::WorkerEvent;

/// An input line, decoded.
#[derive(Debug)]
pub enum Event {
  Worker(WorkerEvent),
  /// A line that is not a valid event
  Invalid { line: String, error: String },
}

/// Event handler that decodes newline-delimited JSON events from a reader
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Spawn a reader task over the given input. Blank lines are skipped.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read event input");
            break;
          }
        };
        if line.trim().is_empty() {
          continue;
        }

        let event = match serde_json::from_str::<WorkerEvent>(&line) {
          Ok(event) => Event::Worker(event),
          Err(e) => Event::Invalid {
            line,
            error: e.to_string(),
          },
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Events from stdin
  pub fn stdin() -> Self {
    Self::new(tokio::io::BufReader::new(tokio::io::stdin()))
  }

  /// Receive the next event. `None` once the input is exhausted.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_decodes_lines_in_order() {
    let input: &'static [u8] =
      b"{\"event\":\"install\"}\n\n{\"event\":\"sync\",\"tag\":\"x\"}\nnot json\n";
    let mut events = EventHandler::new(input);

    assert!(matches!(events.next().await, Some(Event::Worker(WorkerEvent::Install))));
    assert!(matches!(
      events.next().await,
      Some(Event::Worker(WorkerEvent::Sync { tag: Some(ref t) })) if t == "x"
    ));
    assert!(matches!(events.next().await, Some(Event::Invalid { ref line, .. }) if line == "not json"));
    assert!(events.next().await.is_none());
  }
}
