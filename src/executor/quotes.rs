use std::borrow::Cow;

/// Turn single quotes that open or close a string literal into double quotes.
///
/// A quote opens a literal when it starts the filter or follows whitespace and
/// is not itself followed by whitespace or `"`; it closes one when it is not
/// preceded by whitespace or `"` and ends the filter or precedes whitespace.
/// Apostrophes inside words are left alone.
///
/// The scan runs left to right and a boundary whitespace belongs to at most one
/// rewrite: in `a' 'b` the space closes the first quote, so the second stays.
pub fn normalize_quotes(filter: &str) -> Cow<'_, str> {
    if !filter.contains('\'') {
        return Cow::Borrowed(filter);
    }

    let chars: Vec<char> = filter.chars().collect();
    let mut normalized = String::with_capacity(filter.len());
    let mut pos = 0;
    while pos < chars.len() {
        if let Some((quote, end)) = boundary_quote(&chars, pos) {
            for (i, &ch) in chars.iter().enumerate().take(end).skip(pos) {
                normalized.push(if i == quote { '"' } else { ch });
            }
            pos = end;
        } else {
            normalized.push(chars[pos]);
            pos += 1;
        }
    }
    Cow::Owned(normalized)
}

/// A rewrite starting at `pos`: the quote's index and the end of the consumed
/// run, which includes the whitespace on either side.
fn boundary_quote(chars: &[char], pos: usize) -> Option<(usize, usize)> {
    let is_space = |i: usize| chars.get(i).is_some_and(|c| c.is_whitespace());
    let opens = |q: usize| {
        chars.get(q) == Some(&'\'')
            && !chars.get(q + 1).is_some_and(|&c| c.is_whitespace() || c == '"')
    };

    if pos == 0 && opens(0) {
        return Some((0, 1));
    }
    if is_space(pos) && opens(pos + 1) {
        return Some((pos + 1, pos + 2));
    }
    let after_boundary = pos > 0 && (is_space(pos - 1) || chars[pos - 1] == '"');
    if chars[pos] == '\'' && !after_boundary {
        if is_space(pos + 1) {
            return Some((pos, pos + 2));
        }
        if pos + 1 == chars.len() {
            return Some((pos, pos + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::normalize_quotes;

    #[test]
    fn quoted_literal_becomes_double_quoted() {
        assert_eq!(normalize_quotes("'abc'"), "\"abc\"");
        assert_eq!(normalize_quotes(".a == 'x y'"), ".a == \"x y\"");
    }

    #[test]
    fn apostrophes_inside_words_stay() {
        assert_eq!(normalize_quotes("\"it's\""), "\"it's\"");
    }

    #[test]
    fn boundary_whitespace_is_used_once() {
        assert_eq!(normalize_quotes("a' 'b"), "a\" 'b");
        assert_eq!(normalize_quotes("'a' 'b'"), "\"a\" 'b\"");
        assert_eq!(normalize_quotes("'a'  'b'"), "\"a\"  \"b\"");
    }

    #[test]
    fn filters_without_quotes_are_borrowed() {
        assert!(matches!(normalize_quotes(".a"), std::borrow::Cow::Borrowed(_)));
    }
}
