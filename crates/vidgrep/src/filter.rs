use vidgrep_types::TextCandidate;

/// Shortest trimmed text worth keeping, counted in characters so CJK text is
/// measured the same as Latin text.
const MIN_TEXT_CHARS: usize = 2;

/// Stateless acceptance gate applied to every recognition candidate.
///
/// A candidate survives only when its confidence is strictly above the
/// threshold and its trimmed text still has at least two characters; single
/// stray glyphs and low-confidence noise never reach the store.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceFilter {
    threshold: f32,
}

impl ConfidenceFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn accepts(&self, candidate: &TextCandidate) -> bool {
        candidate.confidence > self.threshold
            && candidate.text.trim().chars().count() >= MIN_TEXT_CHARS
    }

    /// Keeps accepted candidates in their original detection order.
    pub fn filter(&self, candidates: Vec<TextCandidate>) -> Vec<TextCandidate> {
        candidates
            .into_iter()
            .filter(|candidate| self.accepts(candidate))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, confidence: f32) -> TextCandidate {
        TextCandidate::new(text, confidence)
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let filter = ConfidenceFilter::new(0.8);
        assert!(!filter.accepts(&candidate("breaking news", 0.79)));
        assert!(!filter.accepts(&candidate("breaking news", 0.8)));
        assert!(filter.accepts(&candidate("breaking news", 0.81)));
    }

    #[test]
    fn short_text_is_rejected_after_trimming() {
        let filter = ConfidenceFilter::new(0.8);
        assert!(!filter.accepts(&candidate(" a ", 0.95)));
        assert!(!filter.accepts(&candidate("   ", 0.95)));
        assert!(!filter.accepts(&candidate("", 0.95)));
        assert!(filter.accepts(&candidate(" ab ", 0.95)));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let filter = ConfidenceFilter::new(0.8);
        // Two CJK characters are six bytes but still two characters.
        assert!(filter.accepts(&candidate("你好", 0.9)));
        assert!(!filter.accepts(&candidate("你", 0.9)));
    }

    #[test]
    fn filter_preserves_detection_order() {
        let filter = ConfidenceFilter::new(0.8);
        let kept = filter.filter(vec![
            candidate("第一条", 0.92),
            candidate("x", 0.99),
            candidate("第二条", 0.85),
            candidate("too low", 0.5),
        ]);
        let texts: Vec<&str> = kept.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["第一条", "第二条"]);
    }
}
