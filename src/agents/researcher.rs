//! Researcher prompts.

const INSTRUCTIONS: &str = "You are a medical research assistant. Answer the question using only \
the document excerpts below. If the excerpts do not contain the answer, say so. Tokens such as \
<PERSON_1> stand for redacted personal data: keep them exactly as written and never guess what \
they hide. Answer in the language of the question.";

/// Prompt for the first draft of a round-one answer.
pub fn draft_prompt(query: &str, context: &str) -> String {
    format!("{INSTRUCTIONS}\n\nDocument excerpts:\n{context}\n\nQuestion: {query}\n\nAnswer:")
}

/// Prompt for revising `previous` after the Critic asked for changes.
pub fn revision_prompt(query: &str, context: &str, previous: &str, feedback: &str) -> String {
    format!(
        "{INSTRUCTIONS}\n\nDocument excerpts:\n{context}\n\nQuestion: {query}\n\n\
         Your previous answer:\n{previous}\n\n\
         A reviewer rejected it for this reason: {feedback}\n\n\
         Write a corrected answer:"
    )
}
