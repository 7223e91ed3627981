//! Locate embedded JSON objects in free text.
//!
//! Agents wrap their JSON in prose or code fences, and the prose can itself contain braces.
//! The scanner walks the text once, tracking open braces and whether it is inside a string
//! literal (with escapes), and yields every balanced outermost `{...}` span in order. A brace
//! that never closes is skipped, so balanced objects after or inside it are still found.
use serde_json::{Map, Value};

/// Iterator over balanced outermost `{...}` spans.
pub struct ObjectSpans<'a> {
    text: &'a str,
    spans: std::vec::IntoIter<(usize, usize)>,
}

pub fn object_spans(text: &str) -> ObjectSpans<'_> {
    ObjectSpans {
        text,
        spans: balanced_spans(text.as_bytes()).into_iter(),
    }
}

impl<'a> Iterator for ObjectSpans<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.spans
            .next()
            .map(|(start, end)| &self.text[start..end])
    }
}

/// Byte ranges of outermost balanced spans, in text order.
fn balanced_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut open: Vec<usize> = Vec::new();
    let mut closed: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            // Quotes only matter inside an object.
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    closed.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    // Spans nest or are disjoint; keep the ones no other span contains.
    closed.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut outermost: Vec<(usize, usize)> = Vec::with_capacity(closed.len());
    for span in closed {
        if outermost.last().map_or(true, |last| span.0 >= last.1) {
            outermost.push(span);
        }
    }
    outermost
}

/// First span that decodes to a JSON object accepted by `accept`.
pub fn find_object<F>(text: &str, accept: F) -> Option<Map<String, Value>>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    object_spans(text)
        .filter_map(|span| match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .find(|map| accept(map))
}

/// First object carrying any of `keys` at the top level.
pub fn find_object_with_keys(text: &str, keys: &[&str]) -> Option<Map<String, Value>> {
    find_object(text, |map| keys.iter().any(|k| map.contains_key(*k)))
}
