// Phrases the scripted companion dialogue already answers. Matching any of
// them (substring, after lowercasing and trimming) keeps the message away
// from the remote model so the player does not get two replies.
const SCRIPTED_TRIGGERS: &[&str] = &[
    // English
    "hello",
    "who are you",
    "what is your name",
    "what's your name",
    "are you real",
    "are you human",
    "where are you",
    "are you ok",
    "follow me",
    "let's go",
    // Russian
    "привет",
    "кто ты",
    "как тебя зовут",
    "ты настоящий",
    "где ты",
    "ты тут",
    "пойдём",
    // Spanish, French, German
    "hola",
    "quién eres",
    "bonjour",
    "qui es-tu",
    "hallo",
    "wer bist du",
];

/// True when static dialogue already handles `message`.
pub fn is_filtered(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SCRIPTED_TRIGGERS
        .iter()
        .any(|trigger| normalized.contains(trigger))
}
