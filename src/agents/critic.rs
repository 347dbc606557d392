//! Critic prompt and verdict parsing.
//!
//! The Critic must answer with a line starting `APPROVE` or `REVISE: <reason>`. Anything else,
//! including conflicting verdict lines, is read as a revision request: only an unambiguous
//! approval ends the loop early.

const INSTRUCTIONS: &str = "You are a clinical fact checker. Compare the draft answer with the \
document excerpts. Every factual claim in the draft must be supported by the excerpts. Tokens \
such as <PERSON_1> are redacted personal data and are not errors.\n\
Reply with exactly one line:\n\
APPROVE\n\
or\n\
REVISE: <what is unsupported or missing>";

/// Reason recorded when the reply holds no usable verdict.
pub const NO_VERDICT: &str = "critic reply contained no verdict";
/// Reason recorded when the reply holds contradicting verdicts.
pub const CONFLICTING_VERDICTS: &str = "critic reply contained conflicting verdicts";
/// Reason recorded when the Critic could not be reached.
pub const CRITIC_UNAVAILABLE: &str = "critic unavailable";

/// Outcome of one Critic turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The draft is supported by the context.
    Approve,
    /// The draft needs another pass, with the reason.
    Revise(String),
}

/// Prompt asking the Critic to review `draft` against `context`.
pub fn review_prompt(draft: &str, context: &str) -> String {
    format!("{INSTRUCTIONS}\n\nDocument excerpts:\n{context}\n\nDraft answer:\n{draft}\n\nVerdict:")
}

/// Interpret a Critic reply.
pub fn parse_verdict(reply: &str) -> Verdict {
    let mut verdicts = reply.lines().filter_map(parse_line);
    let Some(first) = verdicts.next() else {
        return Verdict::Revise(NO_VERDICT.to_string());
    };
    if verdicts.any(|other| std::mem::discriminant(&other) != std::mem::discriminant(&first)) {
        return Verdict::Revise(CONFLICTING_VERDICTS.to_string());
    }
    first
}

fn parse_line(line: &str) -> Option<Verdict> {
    let line = line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '>' | '-' | '`'));
    let line = strip_prefix_ignore_case(line, "verdict:")
        .map(str::trim_start)
        .unwrap_or(line);

    if strip_keyword(line, "APPROVED").is_some() || strip_keyword(line, "APPROVE").is_some() {
        return Some(Verdict::Approve);
    }

    if let Some(rest) = strip_keyword(line, "REVISE") {
        let reason = rest
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '*'))
            .trim_end_matches(|c: char| c.is_whitespace() || c == '*')
            .trim();
        let reason = if reason.is_empty() {
            "unspecified".to_string()
        } else {
            reason.to_string()
        };
        return Some(Verdict::Revise(reason));
    }

    None
}

/// Case-insensitive keyword match that requires a word boundary after the keyword.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = strip_prefix_ignore_case(line, keyword)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() => None,
        _ => Some(rest),
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}
