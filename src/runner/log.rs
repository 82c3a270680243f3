//! Append-only execution log

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Text log of one document execution
///
/// Every line is kept in memory, mirrored to `tracing`, and forwarded to an
/// optional secondary sink. Sending never blocks; a closed sink is dropped
/// after one warning and never interrupts execution.
pub(crate) struct ExecutionLog {
    buffer: String,
    sink: Option<UnboundedSender<String>>,
}

impl ExecutionLog {
    pub(crate) fn new(sink: Option<UnboundedSender<String>>) -> Self {
        Self {
            buffer: String::new(),
            sink,
        }
    }

    pub(crate) fn line(&mut self, text: impl Into<String>) {
        let text = text.into();
        debug!(target: "nbpress::execution", "{}", text);
        self.buffer.push_str(&text);
        self.buffer.push('\n');

        if let Some(sink) = &self.sink {
            if sink.send(text).is_err() {
                warn!("secondary execution log closed, continuing without it");
                self.sink = None;
            }
        }
    }

    pub(crate) fn finish(self) -> String {
        self.buffer
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_buffered_and_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut log = ExecutionLog::new(Some(tx));

        log.line("block #0: executing");
        log.line("block #0: done");

        assert_eq!(rx.try_recv().unwrap(), "block #0: executing");
        assert_eq!(rx.try_recv().unwrap(), "block #0: done");
        assert_eq!(log.finish(), "block #0: executing\nblock #0: done\n");
    }

    #[test]
    fn closed_sink_does_not_stop_logging() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut log = ExecutionLog::new(Some(tx));

        log.line("first");
        log.line("second");

        assert_eq!(log.finish(), "first\nsecond\n");
    }
}
