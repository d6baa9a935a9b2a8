//! Confabulation sanity check run over every adapter response.
//!
//! Speech and LLM adapters occasionally confabulate plausible-sounding but
//! fabricated content — most visibly, named entities for a nonexistent
//! event. Operators configure a set of known confabulation tokens via
//! `HALLUCINATION_TOKENS`; any chunk containing one is discarded rather than
//! trusted.

/// Marker substituted for a chunk whose transcript was discarded.
pub const UNTRANSCRIBABLE_MARKER: &str = "[untranscribable]";

/// Whether `text` contains any configured hallucination token.
#[must_use]
pub fn contains_hallucination(text: &str, tokens: &[String]) -> bool {
    tokens
        .iter()
        .any(|token| !token.is_empty() && text.contains(token.as_str()))
}

/// Apply the sanity check to one transcript chunk: if it contains a
/// hallucination token, replace it with [`UNTRANSCRIBABLE_MARKER`].
#[must_use]
pub fn sanitize_chunk(text: &str, tokens: &[String]) -> String {
    if contains_hallucination(text, tokens) {
        UNTRANSCRIBABLE_MARKER.to_string()
    } else {
        text.to_string()
    }
}

/// Whether every chunk in a transcript was discarded, meaning the whole
/// handler run should be treated as a hallucination error rather than a
/// transcript full of markers.
#[must_use]
pub fn is_wholly_hallucinated(chunks: &[String]) -> bool {
    !chunks.is_empty() && chunks.iter().all(|chunk| chunk == UNTRANSCRIBABLE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<String> {
        vec!["Institute for Advanced Transcription Studies".to_string()]
    }

    #[test]
    fn sanitize_chunk_passes_through_clean_text() {
        assert_eq!(sanitize_chunk("hello there", &tokens()), "hello there");
    }

    #[test]
    fn sanitize_chunk_discards_matching_text() {
        let text = "Welcome to the Institute for Advanced Transcription Studies annual talk.";
        assert_eq!(sanitize_chunk(text, &tokens()), UNTRANSCRIBABLE_MARKER);
    }

    #[test]
    fn wholly_hallucinated_requires_every_chunk_discarded() {
        let all_discarded = vec![UNTRANSCRIBABLE_MARKER.to_string(); 3];
        assert!(is_wholly_hallucinated(&all_discarded));

        let mixed = vec![
            UNTRANSCRIBABLE_MARKER.to_string(),
            "real content".to_string(),
        ];
        assert!(!is_wholly_hallucinated(&mixed));
    }

    #[test]
    fn empty_chunk_list_is_not_wholly_hallucinated() {
        assert!(!is_wholly_hallucinated(&[]));
    }
}
