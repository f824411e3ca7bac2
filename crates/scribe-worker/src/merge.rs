//! # Transcript Merge
//!
//! Adjacent chunks overlap by 1.5 s after a hard cut, so their transcripts
//! usually repeat a few words at the seam. [`merge_transcripts`] removes the
//! largest matching word overlap (up to 10 words); silence-cut boundaries
//! merge with no overlap and are simply concatenated.
//!
//! [`TranscriptAssembler`] folds chunk results arriving in completion order
//! into an in-order cumulative transcript: a chunk only extends the
//! cumulative text once every lower-indexed chunk has arrived, which is what
//! lets `transcript_update` events carry prefix-monotone full content.

use std::collections::HashMap;

/// Join two adjacent transcripts, dropping the duplicated overlap region.
///
/// Finds the largest `k ≤ 10` such that the last `k` words of `left` equal
/// the first `k` words of `right`, then appends `right` minus those words.
/// Empty inputs pass through unchanged.
pub fn merge_transcripts(left: &str, right: &str) -> String {
    if left.is_empty() {
        return right.to_string();
    }
    if right.is_empty() {
        return left.to_string();
    }

    let left_words: Vec<&str> = left.split_whitespace().collect();
    let right_words: Vec<&str> = right.split_whitespace().collect();
    let max_overlap = left_words.len().min(right_words.len()).min(10);

    for k in (1..=max_overlap).rev() {
        if left_words[left_words.len() - k..] == right_words[..k] {
            let remainder = right_words[k..].join(" ");
            if remainder.is_empty() {
                return left.to_string();
            }
            return format!("{left} {remainder}");
        }
    }

    format!("{left} {right}")
}

/// In-order accumulator over concurrently completing chunk transcripts.
#[derive(Debug)]
pub struct TranscriptAssembler {
    total: usize,
    next: usize,
    cumulative: String,
    pending: HashMap<usize, String>,
}

impl TranscriptAssembler {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            next: 0,
            cumulative: String::new(),
            pending: HashMap::new(),
        }
    }

    /// Record a completed chunk. Returns the new cumulative transcript when
    /// this completion advanced the in-order frontier (possibly through
    /// several buffered chunks); out-of-order completions return `None`
    /// until the gap fills.
    pub fn complete(&mut self, index: usize, text: String) -> Option<&str> {
        self.pending.insert(index, text);

        let mut advanced = false;
        while let Some(text) = self.pending.remove(&self.next) {
            self.cumulative = merge_transcripts(&self.cumulative, &text);
            self.next += 1;
            advanced = true;
        }

        advanced.then_some(self.cumulative.as_str())
    }

    /// True once every chunk has been folded in.
    pub fn is_complete(&self) -> bool {
        self.next >= self.total
    }

    /// Final merged transcript.
    pub fn into_transcript(self) -> String {
        self.cumulative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_pass_through() {
        assert_eq!(merge_transcripts("", "hello"), "hello");
        assert_eq!(merge_transcripts("hello", ""), "hello");
        assert_eq!(merge_transcripts("", ""), "");
    }

    #[test]
    fn overlap_is_deduplicated() {
        let merged = merge_transcripts(
            "the quick brown fox jumps over",
            "jumps over the lazy dog",
        );
        assert_eq!(merged, "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn no_overlap_concatenates() {
        assert_eq!(merge_transcripts("hello there", "general kenobi"), "hello there general kenobi");
    }

    #[test]
    fn prefers_largest_overlap() {
        // "a b" appears twice; the three-word overlap must win over the
        // shorter "b" match.
        let merged = merge_transcripts("x a b a b", "a b a b y");
        assert_eq!(merged, "x a b a b y");
    }

    #[test]
    fn full_containment_returns_left() {
        assert_eq!(merge_transcripts("one two three", "two three"), "one two three");
    }

    #[test]
    fn overlap_window_is_capped_at_ten_words() {
        let left = "w w w w w w w w w w w";
        let right = "w w w w w w w w w w w z";
        // Eleven shared words, but only ten are considered.
        let merged = merge_transcripts(left, right);
        assert_eq!(merged, "w w w w w w w w w w w w z");
    }

    #[test]
    fn assembler_emits_in_order() {
        let mut assembler = TranscriptAssembler::new(2);

        assert_eq!(assembler.complete(0, "hello".into()), Some("hello"));
        assert_eq!(assembler.complete(1, "world".into()), Some("hello world"));
        assert!(assembler.is_complete());
        assert_eq!(assembler.into_transcript(), "hello world");
    }

    #[test]
    fn assembler_holds_out_of_order_completions() {
        let mut assembler = TranscriptAssembler::new(3);

        // Chunk 1 lands first: nothing to emit yet.
        assert_eq!(assembler.complete(1, "b".into()), None);
        assert_eq!(assembler.complete(2, "c".into()), None);
        assert!(!assembler.is_complete());

        // Chunk 0 fills the gap and releases everything buffered.
        assert_eq!(assembler.complete(0, "a".into()), Some("a b c"));
        assert!(assembler.is_complete());
    }

    #[test]
    fn assembler_merges_hard_cut_overlaps() {
        let mut assembler = TranscriptAssembler::new(2);
        assembler.complete(0, "the quick brown fox jumps over".into());
        let full = assembler
            .complete(1, "jumps over the lazy dog".into())
            .unwrap()
            .to_string();
        assert_eq!(full, "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn assembler_updates_are_prefix_monotone() {
        let mut assembler = TranscriptAssembler::new(3);
        let mut snapshots = Vec::new();
        for (index, text) in ["alpha", "beta", "gamma"].iter().enumerate() {
            if let Some(full) = assembler.complete(index, text.to_string()) {
                snapshots.push(full.to_string());
            }
        }
        for pair in snapshots.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }
}
