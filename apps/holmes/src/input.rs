//! Line-oriented user input: one JSON event per line, e.g.
//! `{"kind": "navigate", "payload": "projection"}`.

use holmes_runtime::Dispatcher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::app::Event;

/// How reading stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEnd {
    Eof,
    RuntimeGone,
    ReadFailed,
}

/// Feed parsed lines to `dispatcher` until the reader is exhausted.
/// Unparseable lines are logged and skipped.
pub async fn read_events<R>(reader: R, dispatcher: Dispatcher<Event>) -> InputEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return InputEnd::Eof,
            Err(error) => {
                warn!(target: "holmes::input", %error, "failed to read input");
                return InputEnd::ReadFailed;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Event::parse(line) {
            Ok(event) => {
                debug!(target: "holmes::input", ?event, "input");
                if !dispatcher.dispatch(event) {
                    return InputEnd::RuntimeGone;
                }
            }
            Err(error) => warn!(target: "holmes::input", %error, line, "ignoring bad input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Service;
    use test_timeout::tokio_timeout_test;

    #[tokio_timeout_test]
    async fn lines_become_events_in_order() {
        let input: &[u8] = b"{\"kind\":\"navigate\",\"payload\":\"simulation\"}\n\
            \n\
            # comment\n\
            not json\n\
            {\"kind\":\"toggle_nav\"}\n\
            {\"kind\":\"someday\",\"payload\":{\"x\":1}}\n";
        let (dispatcher, mut rx) = Dispatcher::channel();

        assert_eq!(read_events(input, dispatcher).await, InputEnd::Eof);
        assert_eq!(rx.recv().await, Some(Event::Navigate(Service::Simulation)));
        assert_eq!(rx.recv().await, Some(Event::ToggleNav));
        assert_eq!(rx.recv().await, Some(Event::Unknown));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio_timeout_test]
    async fn stops_when_the_runtime_is_gone() {
        let input: &[u8] = b"{\"kind\":\"escape\"}\n{\"kind\":\"escape\"}\n";
        let (dispatcher, rx) = Dispatcher::channel();
        drop(rx);
        assert_eq!(read_events(input, dispatcher).await, InputEnd::RuntimeGone);
    }
}
