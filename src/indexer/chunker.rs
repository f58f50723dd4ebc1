/// Splits text into greedy windows of at most `window` whitespace-separated
/// words, without overlap. The last window may be shorter. A `window` of 0
/// is treated as 1.
pub fn split_words(text: &str, window: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(window.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_exact_windows() {
        let chunks = split_words("a b c d e f", 2);
        assert_eq!(chunks, vec!["a b", "c d", "e f"]);
    }

    #[test]
    fn test_split_short_tail() {
        let chunks = split_words("one two three four five", 2);
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn test_split_empty_and_blank() {
        assert!(split_words("", 200).is_empty());
        assert!(split_words("  \n\t ", 200).is_empty());
    }

    #[test]
    fn test_split_fits_in_one_window() {
        assert_eq!(split_words("short text", 200), vec!["short text"]);
    }

    #[test]
    fn test_split_reassembles_normalized_text() {
        let text = "  The  quick\nbrown fox\t\tjumps over   the lazy dog  ";
        for window in 1..6 {
            let joined = split_words(text, window).join(" ");
            assert_eq!(joined, "The quick brown fox jumps over the lazy dog");
        }
    }

    #[test]
    fn test_split_zero_window() {
        assert_eq!(split_words("a b", 0), vec!["a", "b"]);
    }

    #[test]
    fn test_split_default_window_size() {
        let text = (0..450).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = split_words(&text, 200);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.split_whitespace().count()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
    }
}
