//! Fixed prompt templates sent to the speech and LLM adapters.

/// Prompt sent with every transcription chunk. Demands honest refusal on
/// silence and forbids confabulated content.
pub const TRANSCRIPTION_PROMPT: &str = concat!(
    "Transcribe the attached audio verbatim. If the audio contains no ",
    "speech, or is entirely silence, noise, or music with no discernible ",
    "words, respond with exactly the text \"[no speech detected]\" and ",
    "nothing else. Do not invent words, names, or sentences that are not ",
    "clearly present in the audio. Do not pad a partial or unclear ",
    "recording with plausible-sounding filler. Output only the transcript ",
    "text, with no preamble or commentary."
);

/// Prompt sent with the full transcript, asking for a structured JSON array
/// timestamp outline.
pub const TIMESTAMP_PROMPT: &str = concat!(
    "Given the following transcript, produce a JSON array of timestamped ",
    "outline entries. Each entry must be an object with exactly two string ",
    "fields: \"timestamp\" (an estimated mm:ss or hh:mm:ss position) and ",
    "\"text\" (a short phrase describing the topic starting at that point). ",
    "Output only the JSON array, with no surrounding prose or markdown.\n\n",
    "Transcript:\n"
);

/// Prompt template for the paragraph-style summary. `{ratio}` is the target
/// summary length as a fraction of the transcript's character count.
pub fn summary_prompt(transcript: &str) -> String {
    format!(
        "Write a paragraph-style summary of the following transcript. The \
         summary should be approximately 20% of the transcript's length. Do \
         not introduce facts, names, or claims that are not present in the \
         transcript. Output only the summary text.\n\nTranscript:\n{transcript}"
    )
}

/// Prompt template for the long-form Markdown article.
pub fn article_prompt(transcript: &str, summary: &str) -> String {
    format!(
        "Using the transcript and summary below, write a Markdown article \
         of approximately 2000-3000 characters with structured headings \
         (a title and at least two section headings). Base the article \
         only on content present in the transcript and summary; do not \
         introduce facts that are not supported by them.\n\n\
         Summary:\n{summary}\n\nTranscript:\n{transcript}"
    )
}
