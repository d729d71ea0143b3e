//! Read/mutation classification of query text.

/// Leading keywords that make a statement a mutation.
pub const MUTATION_KEYWORDS: [&str; 8] = [
    "CREATE", "DROP", "ALTER", "GRANT", "REVOKE", "INSERT", "UPDATE", "DELETE",
];

/// How a query statement must be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Served by a single backend.
    Read,
    /// Applied to every backend.
    Mutation,
}

impl StatementKind {
    /// Classify raw query text.
    pub fn of(query: &str) -> Self {
        if is_mutation(query) {
            Self::Mutation
        } else {
            Self::Read
        }
    }
}

/// Case-insensitive prefix match against [`MUTATION_KEYWORDS`].
///
/// Only the leading keyword matters; leading whitespace is skipped.
/// Older proxies matched the raw text, so `"  DROP x"` was a read there and
/// reached a single backend; here it is broadcast.
pub fn is_mutation(query: &str) -> bool {
    let text = query.trim_start();
    MUTATION_KEYWORDS.iter().any(|keyword| {
        text.get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_and_mutations() {
        assert_eq!(StatementKind::of("select * from cpu"), StatementKind::Read);
        assert_eq!(StatementKind::of("SHOW DATABASES"), StatementKind::Read);
        assert_eq!(StatementKind::of("Delete FROM cpu"), StatementKind::Mutation);
        assert_eq!(StatementKind::of("create database db"), StatementKind::Mutation);
        assert_eq!(StatementKind::of("  DROP MEASUREMENT m"), StatementKind::Mutation);
        assert_eq!(StatementKind::of(""), StatementKind::Read);
        assert_eq!(StatementKind::of("DRO"), StatementKind::Read);
    }

    #[test]
    fn keyword_must_lead() {
        assert!(!is_mutation("SELECT 1; DROP DATABASE db"));
        assert!(!is_mutation("from(bucket: \"b\") |> range(start: -1h)"));
    }

    #[test]
    fn multibyte_input_does_not_panic() {
        assert!(!is_mutation("ünïcödé"));
        assert!(!is_mutation("é"));
    }

    proptest! {
        #[test]
        fn classification_is_stable(text in ".*") {
            prop_assert_eq!(StatementKind::of(&text), StatementKind::of(&text));
        }

        #[test]
        fn leading_keyword_case_does_not_matter(
            idx in 0usize..MUTATION_KEYWORDS.len(),
            mask in proptest::collection::vec(any::<bool>(), 6),
            rest in "[ a-z0-9_]*",
        ) {
            let keyword: String = MUTATION_KEYWORDS[idx]
                .chars()
                .zip(mask.iter().cycle())
                .map(|(c, lower)| if *lower { c.to_ascii_lowercase() } else { c })
                .collect();
            let query = format!("{keyword}{rest}");
            prop_assert!(is_mutation(&query));
        }

        #[test]
        fn select_is_never_a_mutation(rest in ".*") {
            let lower = format!("select {rest}");
            let upper = format!("SELECT {rest}");
            prop_assert!(!is_mutation(&lower));
            prop_assert!(!is_mutation(&upper));
        }
    }
}
