use std::fmt::Write;

use bytes::Bytes;
use ptt_contracts::ResponseMessage;
use tracing::debug;

/// Per-message headers a module uses to fill the optional event fields.
pub const HEADER_SSE_ID: &str = "X-SSE-ID";
pub const HEADER_SSE_EVENT: &str = "X-SSE-Event";
pub const HEADER_SSE_RETRY: &str = "X-SSE-Retry";

/// One Server-Sent Events frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub data: String,
    pub event: Option<String>,
    /// Reconnection delay in milliseconds.
    pub retry: Option<u64>,
    pub comment: Option<String>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn comment(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::default()
        }
    }

    /// The body becomes the data; `X-SSE-*` headers fill the other fields.
    pub fn from_message(message: &ResponseMessage) -> Self {
        let retry = message.headers.get(HEADER_SSE_RETRY).and_then(|raw| {
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                debug!(retry = raw, "ignoring non-numeric retry header");
            }
            parsed
        });
        Self {
            id: message.headers.get(HEADER_SSE_ID).map(str::to_owned),
            data: message.body.clone(),
            event: message.headers.get(HEADER_SSE_EVENT).map(str::to_owned),
            retry,
            comment: None,
        }
    }

    /// A frame with neither data nor a comment encodes to nothing.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.comment.as_deref().is_none_or(str::is_empty)
    }

    pub fn encode(&self) -> Bytes {
        if self.is_empty() {
            return Bytes::new();
        }

        let mut out = String::with_capacity(self.data.len() + 32);
        if !self.data.is_empty() {
            if let Some(id) = self.id.as_deref().map(single_line).filter(|id| !id.is_empty()) {
                let _ = writeln!(out, "id: {id}");
            }
            for line in lines(&self.data) {
                let _ = writeln!(out, "data: {line}");
            }
            if let Some(event) = self.event.as_deref().map(single_line).filter(|e| !e.is_empty()) {
                let _ = writeln!(out, "event: {event}");
            }
            if let Some(retry) = self.retry {
                let _ = writeln!(out, "retry: {retry}");
            }
        }
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            for line in lines(comment) {
                let _ = writeln!(out, ": {line}");
            }
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Splits on every line terminator the event-stream format recognises.
fn lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\r', '\n']) {
            Some(at) => {
                let skip = if current[at..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[at + skip..]);
                Some(&current[..at])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

fn single_line(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(event: &SseEvent) -> String {
        String::from_utf8(event.encode().to_vec()).unwrap()
    }

    #[test]
    fn data_only_frame() {
        assert_eq!(text(&SseEvent::data("tick")), "data: tick\n\n");
    }

    #[test]
    fn multiline_data_is_split_per_line() {
        assert_eq!(
            text(&SseEvent::data("a\nb\r\nc\rd")),
            "data: a\ndata: b\ndata: c\ndata: d\n\n"
        );
    }

    #[test]
    fn all_fields_in_order() {
        let event = SseEvent {
            id: Some("7".into()),
            data: "hello".into(),
            event: Some("greeting".into()),
            retry: Some(3000),
            comment: Some("note".into()),
        };
        assert_eq!(
            text(&event),
            "id: 7\ndata: hello\nevent: greeting\nretry: 3000\n: note\n\n"
        );
    }

    #[test]
    fn comment_only_frame_is_a_keep_alive() {
        assert_eq!(text(&SseEvent::comment("keep-alive")), ": keep-alive\n\n");
    }

    #[test]
    fn empty_frame_encodes_to_nothing() {
        assert!(SseEvent::default().encode().is_empty());
        let no_data = SseEvent {
            id: Some("1".into()),
            event: Some("x".into()),
            ..SseEvent::default()
        };
        assert!(no_data.encode().is_empty());
    }

    #[test]
    fn fields_cannot_smuggle_new_lines() {
        let event = SseEvent {
            id: Some("1\ndata: evil".into()),
            data: "ok".into(),
            ..SseEvent::default()
        };
        assert_eq!(text(&event), "id: 1data: evil\ndata: ok\n\n");
    }

    #[test]
    fn message_headers_fill_event_fields() {
        let message = ResponseMessage::new(200, "stop")
            .with_header(HEADER_SSE_EVENT, "stop")
            .with_header(HEADER_SSE_ID, "4")
            .with_header(HEADER_SSE_RETRY, "soon");
        let event = SseEvent::from_message(&message);
        assert_eq!(event.event.as_deref(), Some("stop"));
        assert_eq!(event.id.as_deref(), Some("4"));
        assert_eq!(event.retry, None);
        assert_eq!(event.data, "stop");
    }
}
