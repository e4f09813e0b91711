use bytes::Bytes;

use llmhub_protocol::sse::{SseFrame, SseParser, encode_frame};
use llmhub_protocol::{StreamEvent, WireFormat};

/// Decodes raw upstream bytes into logical stream events for one format.
#[derive(Debug)]
pub struct StreamDecoder {
    format: WireFormat,
    sse: SseParser,
}

impl StreamDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            sse: SseParser::new(),
        }
    }

    pub fn push(&mut self, chunk: &Bytes) -> Vec<StreamEvent> {
        self.sse
            .feed(chunk)
            .into_iter()
            .filter_map(|frame| decode_frame(self.format, frame))
            .collect()
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.sse
            .finish()
            .into_iter()
            .filter_map(|frame| decode_frame(self.format, frame))
            .collect()
    }
}

fn decode_frame(format: WireFormat, frame: SseFrame) -> Option<StreamEvent> {
    if frame.data.is_empty() {
        return None;
    }
    match format {
        WireFormat::Claude => serde_json::from_str(&frame.data)
            .ok()
            .map(StreamEvent::Claude),
        WireFormat::OpenAiChat => {
            if frame.data.trim() == "[DONE]" {
                return Some(StreamEvent::OpenAiChatDone);
            }
            serde_json::from_str(&frame.data)
                .ok()
                .map(StreamEvent::OpenAiChat)
        }
        WireFormat::Codex => serde_json::from_str(&frame.data)
            .ok()
            .map(StreamEvent::Codex),
        WireFormat::GeminiCli => serde_json::from_str(&frame.data)
            .ok()
            .map(StreamEvent::GeminiCli),
    }
}

/// SSE-encode one outbound event in its own format's framing: named events
/// for claude and the Response API, data-only for openai chat and the CLI
/// envelope.
pub fn encode_stream_event(event: &StreamEvent) -> Option<Bytes> {
    match event {
        StreamEvent::Claude(event) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_frame(Some(event.event_name()), &data))
        }
        StreamEvent::OpenAiChat(chunk) => {
            let data = serde_json::to_string(chunk).ok()?;
            Some(encode_frame(None, &data))
        }
        StreamEvent::OpenAiChatDone => Some(Bytes::from_static(b"data: [DONE]\n\n")),
        StreamEvent::Codex(event) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_frame(Some(event.event_name()), &data))
        }
        StreamEvent::GeminiCli(value) => {
            let data = serde_json::to_string(value).ok()?;
            Some(encode_frame(None, &data))
        }
    }
}

pub fn stream_content_type(_format: WireFormat) -> &'static str {
    "text/event-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_openai_done_marker() {
        let mut decoder = StreamDecoder::new(WireFormat::OpenAiChat);
        let events = decoder.push(&Bytes::from_static(b"data: [DONE]\n\n"));
        assert!(matches!(events[0], StreamEvent::OpenAiChatDone));
    }

    #[test]
    fn decodes_claude_named_events() {
        let mut decoder = StreamDecoder::new(WireFormat::Claude);
        let frame = b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let events = decoder.push(&Bytes::from_static(frame));
        assert!(matches!(
            events[0],
            StreamEvent::Claude(llmhub_protocol::claude::stream::StreamEvent::MessageStop)
        ));
    }

    #[test]
    fn round_trips_codex_event_framing() {
        let event = StreamEvent::Codex(
            llmhub_protocol::codex::stream::ResponseStreamEvent::OutputTextDelta {
                item_id: None,
                output_index: 0,
                delta: "hi".to_string(),
            },
        );
        let encoded = encode_stream_event(&event).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("event: response.output_text.delta\n"));

        let mut decoder = StreamDecoder::new(WireFormat::Codex);
        let decoded = decoder.push(&encoded);
        assert_eq!(decoded[0], event);
    }

    #[test]
    fn ignores_unparseable_frames() {
        let mut decoder = StreamDecoder::new(WireFormat::OpenAiChat);
        assert!(decoder.push(&Bytes::from_static(b"data: not json\n\n")).is_empty());
    }
}
