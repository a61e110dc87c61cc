//! Message model for the hoshi bot host.
//!
//! A [`Message`] is an ordered list of [`Segment`]s, each carrying a type tag
//! and a free-form JSON data map (the OneBot v11 array format). Only text
//! segments contribute to [`Message::extract_plain_text`], which is what the
//! rule engine matches against.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content (text, image, mention, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment type identifier, e.g. `text`, `image`, `at`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Segment payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    /// Creates a segment with an arbitrary type and data map.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Creates a plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".into(), Value::String(text.into()));
        Self::new("text", data)
    }

    /// Creates a mention segment.
    pub fn at(user_id: i64) -> Self {
        let mut data = Map::new();
        data.insert("qq".into(), Value::String(user_id.to_string()));
        Self::new("at", data)
    }

    /// Creates an image segment from a file path or URL.
    pub fn image(file: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("file".into(), Value::String(file.into()));
        Self::new("image", data)
    }

    /// Returns true if this is a plain text segment.
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            self.data.get("text").and_then(Value::as_str)
        } else {
            None
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.as_text() {
            return f.write_str(text);
        }
        write!(f, "[{}", self.kind)?;
        for (key, value) in &self.data {
            match value {
                Value::String(s) => write!(f, ",{key}={s}")?,
                other => write!(f, ",{key}={other}")?,
            }
        }
        f.write_str("]")
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of segments.
///
/// ```rust,ignore
/// use hoshi_core::{Message, Segment};
///
/// let msg = Message::from("hello ").push(Segment::at(42));
/// assert_eq!(msg.extract_plain_text(), "hello ");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment, builder style.
    pub fn push(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Returns the segments of this message.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns an iterator over the message segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenates the text content of all text segments, ignoring the rest.
    pub fn extract_plain_text(&self) -> String {
        self.iter().filter_map(Segment::as_text).collect()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from(Segment::text(text))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::from(Segment::text(text))
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_skips_non_text_segments() {
        let msg = Message::from("foo ")
            .push(Segment::at(1))
            .push(Segment::text("bar"));
        assert_eq!(msg.extract_plain_text(), "foo bar");
        assert_eq!(msg.len(), 3);
    }

    #[test]
    fn test_display_renders_cq_like_codes() {
        let msg = Message::from("hi").push(Segment::image("a.png"));
        assert_eq!(msg.to_string(), "hi[image,file=a.png]");
    }

    #[test]
    fn test_deserialize_segment_array() {
        let msg: Message =
            serde_json::from_str(r#"[{"type":"text","data":{"text":"你好"}},{"type":"face"}]"#)
                .unwrap();
        assert_eq!(msg.extract_plain_text(), "你好");
        assert_eq!(msg.segments()[1].kind, "face");
    }
}
