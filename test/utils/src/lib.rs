/// Wraps a JSON payload in the event stream framing the server writes.
pub fn sse_frame(payload: &str) -> String {
    return format!("event: message\ndata: {payload}\n\n");
}

/// A full successful exchange: the user message is confirmed as `100`, the
/// reply streams in two chunks and is persisted as `101`.
pub fn scenario_stream_success() -> String {
    return [
        sse_frame(r#"{"type":"user_message","message":{"id":100,"chat_id":42,"role":"user","content":"Hello","model_id":1,"tokens":0,"created_at":"2024-03-01T12:00:00Z"}}"#),
        ": keep-alive\n\n".to_string(),
        sse_frame(r#"{"type":"stream_start","model":"DeepSeek"}"#),
        sse_frame(r#"{"type":"stream_chunk","text":"Hi"}"#),
        sse_frame(r#"{"type":"stream_chunk","text":" there"}"#),
        sse_frame(r#"{"type":"stream_end","message_id":101,"full_text":"Hi there"}"#),
    ]
    .concat();
}

/// The reply starts streaming and then fails before the user message was
/// ever confirmed.
pub fn scenario_stream_error() -> String {
    return [
        sse_frame(r#"{"type":"stream_start","model":"DeepSeek"}"#),
        sse_frame(r#"{"type":"stream_chunk","text":"Hi"}"#),
        sse_frame(r#"{"type":"error","error":"rate limited"}"#),
    ]
    .concat();
}

/// Splits text into fixed size byte chunks, ignoring character boundaries.
pub fn split_bytes(text: &str, size: usize) -> Vec<Vec<u8>> {
    return text
        .as_bytes()
        .chunks(size.max(1))
        .map(|chunk| return chunk.to_vec())
        .collect();
}
