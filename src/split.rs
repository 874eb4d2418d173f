/// Splits an OSGi header on commas that sit outside double quotes.
///
/// `a;version="[1,2)",b` yields `a;version="[1,2)"` and `b`. Pieces are
/// returned untrimmed; an unterminated quote swallows the rest of the input.
pub fn split_outside_quotes(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;

    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pieces.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);

    while pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
    pieces
}

/// Drops a `;attribute=...` qualifier: everything from the first `;` that is
/// followed by at least one more character.
pub fn strip_qualifier(piece: &str) -> &str {
    match piece.find(';') {
        Some(idx) if idx + 1 < piece.len() => &piece[..idx],
        _ => piece,
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn osgi_names(value: &str) -> impl Iterator<Item = String> + '_ {
    split_outside_quotes(value)
        .into_iter()
        .map(|p| strip_qualifier(p).trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commas_inside_quotes_do_not_split() {
        let pieces =
            split_outside_quotes(r#"org.a;version="[1.0,2.0)",org.b;resolution:=optional"#);
        assert_eq!(
            pieces,
            vec![r#"org.a;version="[1.0,2.0)""#, "org.b;resolution:=optional"]
        );
    }

    #[test]
    fn trailing_empty_pieces_are_dropped() {
        assert_eq!(split_outside_quotes("a,b,,"), vec!["a", "b"]);
        assert_eq!(split_outside_quotes("a,,b"), vec!["a", "", "b"]);
        assert!(split_outside_quotes("").is_empty());
    }

    #[test]
    fn strip_qualifier_needs_a_following_character() {
        assert_eq!(strip_qualifier("org.a;version=1"), "org.a");
        assert_eq!(strip_qualifier("org.a;"), "org.a;");
        assert_eq!(strip_qualifier("org.a"), "org.a");
    }

    #[test]
    fn osgi_names_trim_and_strip() {
        let names: Vec<String> =
            osgi_names(r#" org.a ;version="[1,2)", org.b , ,org.c;x=y"#).collect();
        assert_eq!(names, vec!["org.a", "org.b", "org.c"]);
    }

    #[test]
    fn split_list_trims_pieces() {
        assert_eq!(split_list(" x, y ,,z"), vec!["x", "y", "z"]);
    }
}
