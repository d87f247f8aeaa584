//! Entity identifiers
//!
//! Every persistent entity carries a 20-character sortable id (12 bytes,
//! time-ordered). Strings that do not parse as ids are accepted as names.

/// Generate a fresh sortable id.
pub fn new_id() -> String {
    xid::new().to_string()
}

/// Check whether a string is a well-formed id.
///
/// Ids are 20 characters of base32hex (`0-9a-v`). Anything else is treated
/// as a plain name, never as an id.
pub fn is_id(s: &str) -> bool {
    s.len() == 20
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'v').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id();
        assert_eq!(id.len(), 20);
        assert!(is_id(&id));
    }

    #[test]
    fn test_ids_are_unique_and_sortable() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        // Same process, later id: time-ordered prefix keeps them sorted
        assert!(a <= b);
    }

    #[test]
    fn test_names_are_not_ids() {
        assert!(!is_id(""));
        assert!(!is_id("instant"));
        assert!(!is_id("my-channel-name"));
        assert!(!is_id("c40hp6epjh65aeq6ne5x!")); // 21 chars
        assert!(!is_id("C40HP6EPJH65AEQ6NE50")); // upper case
    }

    #[test]
    fn test_known_id_accepted() {
        assert!(is_id("c40hp6epjh65aeq6ne50"));
    }
}
