//! Server-Sent Events framing, shared by the provider client, the relay and the
//! chat client.
//!
//! Only the `data:` field matters here. Frames are separated by a blank line;
//! a frame with several `data:` lines yields their values joined by `\n`.
//! Comment lines and other fields are ignored.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

/// Payload of the frame that terminates a stream.
pub const DONE: &str = "[DONE]";

/// Encode one payload as an SSE frame.
pub fn frame(data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Turn a byte stream into the stream of its frames' `data` payloads.
///
/// Chunk boundaries may fall anywhere, including inside a multi-byte
/// character. A trailing frame without its blank line is still delivered when
/// the input ends. The first transport error is passed through and ends the
/// stream.
pub fn data_frames<S, E>(bytes: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let state = (Box::pin(bytes), Vec::<u8>::new(), false);

    stream::unfold(state, |(mut bytes, mut buffer, mut exhausted)| async move {
        loop {
            if let Some(frame) = next_frame(&mut buffer, exhausted) {
                match frame_data(&frame) {
                    Some(data) => return Some((Ok(data), (bytes, buffer, exhausted))),
                    None => continue,
                }
            }
            if exhausted {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Some((Err(e), (bytes, Vec::new(), true))),
                None => exhausted = true,
            }
        }
    })
}

/// Split the first complete frame off `buffer`. With `flush`, whatever is left
/// counts as a frame.
fn next_frame(buffer: &mut Vec<u8>, flush: bool) -> Option<String> {
    if let Some((end, separator)) = frame_boundary(buffer) {
        let raw: Vec<u8> = buffer.drain(..end + separator).collect();
        return Some(String::from_utf8_lossy(&raw[..end]).into_owned());
    }
    if flush && !buffer.is_empty() {
        let raw = std::mem::take(buffer);
        return Some(String::from_utf8_lossy(&raw).into_owned());
    }
    None
}

fn frame_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn frame_data(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in frame.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(joined) => {
                joined.push('\n');
                joined.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data
}
