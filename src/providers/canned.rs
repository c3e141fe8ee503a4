//! Deterministic replies used when no language processor is configured.

const PREFIX_RESPONSES: [&str; 2] = ["I heard you say: ", "You mentioned: "];

const FIXED_RESPONSES: [&str; 3] = [
    "That's interesting, tell me more.",
    "I understand. Is there anything else I can help with?",
    "Thanks for sharing that.",
];

/// Picks one of five replies by the character count of `text`.
///
/// The same input always yields the same reply.
pub fn canned_response(text: &str) -> String {
    let slot = text.chars().count() % (PREFIX_RESPONSES.len() + FIXED_RESPONSES.len());
    match PREFIX_RESPONSES.get(slot) {
        Some(prefix) => format!("{}{}", prefix, text),
        None => FIXED_RESPONSES[slot - PREFIX_RESPONSES.len()].to_string(),
    }
}
