use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Whitelist-based sanitization: safe tags (like <b>, <p>) survive while
/// dangerous tags (like <script>, <iframe>) and malicious attributes (like
/// onclick) are stripped. Question and answer bodies are instructor-authored
/// but rendered to every student, so they pass through here on write.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
