//! Subject syntax: dot separated, non-empty tokens. `*` matches exactly one
//! token and `>` matches one or more trailing tokens; both are only valid
//! as whole tokens, and `>` only in last position.

const SEPARATOR: char = '.';
const SINGLE_WILDCARD: &str = "*";
const TAIL_WILDCARD: &str = ">";

fn tokens_valid(subject: &str) -> bool {
    !subject.is_empty()
        && !subject.chars().any(|c| c.is_whitespace())
        && subject.split(SEPARATOR).all(|t| !t.is_empty())
}

/// Valid as a subscription filter (wildcards allowed).
pub fn is_valid_filter(subject: &str) -> bool {
    if !tokens_valid(subject) {
        return false;
    }
    let tokens: Vec<&str> = subject.split(SEPARATOR).collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, t)| {
        if *t == TAIL_WILDCARD {
            i == last
        } else {
            *t == SINGLE_WILDCARD || !t.contains(|c: char| c == '*' || c == '>')
        }
    })
}

/// Valid as a publish target (no wildcards).
pub fn is_valid_publish(subject: &str) -> bool {
    tokens_valid(subject)
        && subject
            .split(SEPARATOR)
            .all(|t| t != SINGLE_WILDCARD && t != TAIL_WILDCARD)
}

/// Whether a concrete `subject` is selected by `filter`.
pub fn matches(filter: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split(SEPARATOR);
    for f in filter.split(SEPARATOR) {
        if f == TAIL_WILDCARD {
            return subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(s) if f == SINGLE_WILDCARD || f == s => continue,
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match_requires_equal_token_count() {
        assert!(matches("orders.created", "orders.created"));
        assert!(!matches("orders.created", "orders.created.eu"));
        assert!(!matches("orders.created.eu", "orders.created"));
    }

    #[test]
    fn single_wildcard_matches_one_token() {
        assert!(matches("orders.*.eu", "orders.created.eu"));
        assert!(!matches("orders.*", "orders.created.eu"));
        assert!(!matches("orders.*", "orders"));
    }

    #[test]
    fn tail_wildcard_needs_at_least_one_token() {
        assert!(matches("orders.>", "orders.created"));
        assert!(matches("orders.>", "orders.created.eu.1"));
        assert!(!matches("orders.>", "orders"));
        assert!(matches(">", "anything.at.all"));
    }

    #[test]
    fn filter_validation() {
        assert!(is_valid_filter("a.*.c"));
        assert!(is_valid_filter("a.>"));
        assert!(!is_valid_filter("a.>.c"));
        assert!(!is_valid_filter("a..c"));
        assert!(!is_valid_filter("a.b*"));
        assert!(!is_valid_filter(""));
    }

    #[test]
    fn publish_subjects_reject_wildcards() {
        assert!(is_valid_publish("a.b.c"));
        assert!(!is_valid_publish("a.*"));
        assert!(!is_valid_publish("a.>"));
        assert!(!is_valid_publish("a b"));
    }
}
