/// Collapse whitespace into single spaces.
pub(crate) fn one_line(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}

/// Keep the leading `ratio` share of the characters of `s`, rounded up so
/// non-empty text never vanishes entirely.
pub(crate) fn truncate_ratio(s: &str, ratio: f64) -> String {
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio >= 1.0 {
        return s.to_string();
    }
    let total = s.chars().count();
    let keep = (total as f64 * ratio).ceil() as usize;
    if keep >= total {
        return s.to_string();
    }
    s.chars().take(keep).collect::<String>().trim_end().to_string()
}

/// Leading share of a list, rounded up.
pub(crate) fn take_ratio<T: Clone>(items: &[T], ratio: f64) -> Vec<T> {
    let keep = (items.len() as f64 * ratio.clamp(0.0, 1.0)).ceil() as usize;
    items.iter().take(keep).cloned().collect()
}

/// Deterministic token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Sentences of a message, split on terminal punctuation and newlines.
pub(crate) fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_truncation_rounds_up() {
        assert_eq!(truncate_ratio("abcdefghij", 0.5), "abcde");
        assert_eq!(truncate_ratio("abc", 0.1), "a");
        assert_eq!(truncate_ratio("abc", 1.0), "abc");
        assert_eq!(take_ratio(&[1, 2, 3], 0.5), vec![1, 2]);
    }

    #[test]
    fn token_estimate_is_character_based() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn sentences_skip_blanks() {
        let got: Vec<&str> = sentences("We use Rust. Deadline is Friday!\n\n ok?").collect();
        assert_eq!(got, vec!["We use Rust", "Deadline is Friday", "ok"]);
    }
}
