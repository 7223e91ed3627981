//! Identifier synthesis for documents and agent sessions.
//!
//! Ids pair the wall clock with UUID v4 randomness. They are unique in practice, not by
//! construction.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

const DOCUMENT_SUFFIX_LEN: usize = 9;

/// New document id of the form `doc_<unix-millis>_<9 base-36 chars>`.
pub fn document_id() -> String {
    let random = Uuid::new_v4();
    format!(
        "doc_{}_{}",
        now().as_millis(),
        base36(&random.as_bytes()[..8], DOCUMENT_SUFFIX_LEN)
    )
}

/// Fresh agent session id scoped to one document: `session_<documentId>_<uuid>`.
pub fn session_id(document_id: &str) -> String {
    format!("session_{document_id}_{}", Uuid::new_v4())
}

fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
}

fn base36(bytes: &[u8], len: usize) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut value = bytes
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
