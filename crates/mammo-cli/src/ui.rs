//! Plain terminal rendering of chat stream events

use std::io::{self, Write};

use mammo_chat::ChatStreamEvent;

/// Write one event. Reply text goes to `out` as it arrives; errors go to `err`.
pub fn render_event(
    event: &ChatStreamEvent,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    match event {
        ChatStreamEvent::MessageStart { .. } | ChatStreamEvent::StreamEnd => {}
        ChatStreamEvent::MessageChunk { content } => {
            write!(out, "{}", content)?;
            out.flush()?;
        }
        ChatStreamEvent::MessageEnd { .. } => writeln!(out)?,
        ChatStreamEvent::Step(step) => {
            let referenced = step
                .observation
                .get("referenced")
                .and_then(|r| r.as_array())
                .map_or(0, |r| r.len());
            writeln!(out, "[{}: {} referenced]", step.skill_name, referenced)?;
        }
        ChatStreamEvent::Error { message, .. } => writeln!(err, "Error: {}", message)?,
        ChatStreamEvent::System { message } => writeln!(out, "[{}]", message)?,
    }
    Ok(())
}

/// Render to the process's stdout and stderr
pub fn print_event(event: &ChatStreamEvent) -> io::Result<()> {
    render_event(event, &mut io::stdout(), &mut io::stderr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mammo_chat::{ErrorKind, MessageRole, StepPayload};

    fn render_all(events: &[ChatStreamEvent]) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        for event in events {
            render_event(event, &mut out, &mut err).unwrap();
        }
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_reply_is_printed_once() {
        let (out, err) = render_all(&[
            ChatStreamEvent::MessageStart {
                role: MessageRole::Assistant,
                message_id: "m1".into(),
            },
            ChatStreamEvent::MessageChunk {
                content: "Hel".into(),
            },
            ChatStreamEvent::MessageChunk {
                content: "lo".into(),
            },
            ChatStreamEvent::MessageEnd {
                content: "Hello".into(),
            },
            ChatStreamEvent::Step(StepPayload::memory(&["ep1".to_string(), "ep2".to_string()])),
            ChatStreamEvent::StreamEnd,
        ]);
        assert_eq!(out, "Hello\n[memory: 2 referenced]\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_error_goes_to_stderr() {
        let (out, err) = render_all(&[ChatStreamEvent::Error {
            kind: ErrorKind::Unavailable,
            message: "Service temporarily unavailable, retry in 60s".into(),
        }]);
        assert!(out.is_empty());
        assert_eq!(err, "Error: Service temporarily unavailable, retry in 60s\n");
    }
}
