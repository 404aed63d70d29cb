use atrium_core::TokenUsage;

/// Events emitted while streaming a completion.
///
/// `Done` and `Error` are terminal; nothing follows either.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model, in order.
    Content { text: String },

    /// Stream completed. `content` is the concatenation of every delta;
    /// `usage` is zero-filled when the provider sent no accounting.
    Done { content: String, usage: TokenUsage },

    /// Terminal failure. The stream produces no further events.
    Error { message: String },
}

/// Parse a single SSE line.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: message_start") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "message_start"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_sse_line("data: {\"x\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"x\":1}"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(parse_sse_line(": keep-alive comment").is_none());
    }
}
