//! Incremental parser for `text/event-stream` bodies.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Buffers raw bytes until a blank line completes an event. Chunks may split
/// anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() && event == "message" {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: put\ndata: {\"path\":\"/\",").is_empty());
        let events = parser.push(b"\"data\":null}\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "put".into(),
                    data: r#"{"path":"/","data":null}"#.into()
                },
                SseEvent {
                    event: "keep-alive".into(),
                    data: "null".into()
                },
            ]
        );
    }

    #[test]
    fn handles_crlf_comments_and_split_utf8() {
        let mut parser = SseParser::default();
        let body = "event: patch\r\n: comment\r\ndata: {\"👍\":1}\r\n\r\n".as_bytes();
        let split = body.iter().position(|&b| b == 0xF0).unwrap() + 2;
        assert!(parser.push(&body[..split]).is_empty());
        let events = parser.push(&body[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "patch");
        assert_eq!(events[0].data, r#"{"👍":1}"#);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = SseParser::default();
        let events = parser.push(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a\nb");
    }
}
