//! Allow-list authorization for privileged commands.

/// Check whether `identity` appears in a comma-separated allow-list.
///
/// Entries are trimmed before an exact comparison. Empty entries never match,
/// so an empty or blank list denies everyone.
#[must_use]
pub fn is_authorized(identity: &str, allow_list: &str) -> bool {
    if identity.is_empty() {
        return false;
    }

    allow_list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| entry == identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed_entries_match() {
        assert!(is_authorized("U2", "U1, U2 "));
        assert!(is_authorized("U1", "U1, U2 "));
        assert!(!is_authorized("U3", "U1, U2 "));
    }

    #[test]
    fn test_match_is_exact() {
        assert!(!is_authorized("u1", "U1"));
        assert!(!is_authorized("U1", "U10"));
        assert!(!is_authorized("U1 ", "U1"));
    }

    #[test]
    fn test_empty_list_denies() {
        assert!(!is_authorized("U1", ""));
        assert!(!is_authorized("U1", " , ,"));
        assert!(!is_authorized("", ""));
        assert!(!is_authorized("", "U1,,U2"));
    }
}
