/// Pick the candidate closest to `target` by edit distance, if any is close enough.
pub fn find_best_match<S: AsRef<str>>(
    target: &str,
    candidates: impl IntoIterator<Item = S>,
) -> Option<String> {
    let mut best_candidate = None;
    let mut min_distance = usize::MAX;
    let threshold = if target.len() < 3 { 1 } else { 3 };

    for candidate in candidates {
        let candidate = candidate.as_ref();
        let distance = levenshtein_distance(target, candidate);
        if distance <= threshold && distance < min_distance {
            min_distance = distance;
            best_candidate = Some(candidate.to_string());
        }
    }

    best_candidate
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_len = s2.chars().count();
    let mut previous: Vec<usize> = (0..=s2_len).collect();
    let mut current = vec![0; s2_len + 1];

    for (i, char1) in s1.chars().enumerate() {
        current[0] = i + 1;
        for (j, char2) in s2.chars().enumerate() {
            let cost = usize::from(char1 != char2);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[s2_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_close_builtin() {
        let names = ["length", "keys", "select"];
        assert_eq!(find_best_match("lenght", names), Some("length".into()));
        assert_eq!(find_best_match("frobnicate", names), None);
    }

    #[test]
    fn distance_counts_edits() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }
}
