//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 bytes per token. This is close
//! enough for BPE tokenizers on English text to budget a prompt, but it is
//! not a tokenizer; never treat the result as a billing figure.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes of UTF-8. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Sum of precomputed token counts.
pub fn total_tokens<'a>(counts: impl IntoIterator<Item = &'a usize>) -> usize {
    counts.into_iter().sum()
}
