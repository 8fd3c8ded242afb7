//! Recipient addressing.

/// Domain suffix appended to bare identifiers.
pub const DEFAULT_CHAT_SUFFIX: &str = "@c.us";

/// Normalize a recipient into a fully-qualified chat identifier.
///
/// Identifiers that already contain a `@` separator are returned as-is
/// (trimmed); bare identifiers get [`DEFAULT_CHAT_SUFFIX`] appended.
#[must_use]
pub fn normalize_recipient(to: &str) -> String {
    let to = to.trim();
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{to}{DEFAULT_CHAT_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_number_gets_suffix() {
        assert_eq!(normalize_recipient("33612345678"), "33612345678@c.us");
    }

    #[test]
    fn test_qualified_id_is_kept() {
        assert_eq!(normalize_recipient("12036302@g.us"), "12036302@g.us");
        assert_eq!(normalize_recipient(" 336@c.us "), "336@c.us");
    }
}
