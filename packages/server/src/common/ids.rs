use rand::Rng;
use serde::{Deserialize, Serialize};

/// Batch identifier. Assigned by the database sequence on `create-batch`.
pub type BatchId = i64;

/// Job identifier, unique only within a batch. Jobs in a single
/// `create-jobs` bunch must have contiguous ids starting at the first
/// unused id for that batch (spec.md §6).
pub type JobId = i64;

const ATTEMPT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ATTEMPT_ID_LEN: usize = 6;

/// A random 6-character attempt token (spec.md §3: "attempt_id is a random
/// 6-char token"). Newtype rather than a bare `String` so attempt ids can't
/// be confused with other string fields at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let token: String = (0..ATTEMPT_ID_LEN)
            .map(|_| {
                let idx = rng.random_range(0..ATTEMPT_ID_ALPHABET.len());
                ATTEMPT_ID_ALPHABET[idx] as char
            })
            .collect();
        AttemptId(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for AttemptId {
    fn from(s: String) -> Self {
        AttemptId(s)
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_ids_are_six_chars_and_distinct() {
        let a = AttemptId::new();
        let b = AttemptId::new();
        assert_eq!(a.as_str().len(), ATTEMPT_ID_LEN);
        assert_eq!(b.as_str().len(), ATTEMPT_ID_LEN);
        assert_ne!(a, b);
    }
}
