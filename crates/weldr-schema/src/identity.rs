use crate::blueprint::Blueprint;
use crate::types::CommitId;

const COMMIT_ID_LEN: usize = 40;

/// Derive the commit id of a change from its parent, timestamp, and content.
///
/// The blueprint is hashed in its canonical JSON form, so two commits of the
/// same content at different times or on different parents get distinct ids.
pub fn compute_commit_id(parent: Option<&CommitId>, timestamp: &str, bp: &Blueprint) -> CommitId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"parent:");
    hasher.update(parent.map_or("", CommitId::as_str).as_bytes());
    hasher.update(b"\ntimestamp:");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"\nblueprint:");
    // Serializing plain data into a Vec cannot fail; fall back to Debug output anyway.
    match serde_json::to_vec(bp) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(format!("{bp:?}").as_bytes()),
    };
    let hex = hasher.finalize().to_hex();
    CommitId::new(&hex.as_str()[..COMMIT_ID_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_id_is_stable_and_sensitive() {
        let bp = Blueprint::new("demo");
        let a = compute_commit_id(None, "2024-01-01T00:00:00Z", &bp);
        let b = compute_commit_id(None, "2024-01-01T00:00:00Z", &bp);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        let c = compute_commit_id(Some(&a), "2024-01-01T00:00:00Z", &bp);
        assert_ne!(a, c);
        let d = compute_commit_id(None, "2024-01-01T00:00:01Z", &bp);
        assert_ne!(a, d);
    }
}
