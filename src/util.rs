//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// any other set value maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Lowercase, ASCII-alphanumeric slug joined by `-`, at most `max_words` words.
pub fn slugify(text: &str, max_words: usize) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(max_words)
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Deduplicate and trim a list of names, preserving first-seen order.
pub fn sanitize_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Keep at most `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(max_words).collect();
    if words.next().is_some() {
        format!("{} ...", kept.join(" "))
    } else {
        kept.join(" ")
    }
}

/// Substitute `{key}` placeholders in one pass over `template`.
///
/// Substituted values are never rescanned, so text containing braces is
/// inserted verbatim. Unknown placeholders are left as they are.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = values.iter().find(|(key, _)| {
            tail.starts_with(key) && tail[key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "was", "were", "are", "what", "which", "who", "whom", "when", "where", "why",
    "how", "for", "with", "this", "that", "these", "those", "from", "has", "have", "had", "does",
    "did", "not", "but", "its", "into", "than", "then", "there", "their", "about",
];

/// Lowercased alphanumeric tokens longer than two characters, minus stop words.
pub fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_keeps_leading_words() {
        assert_eq!(
            slugify("What is Tesla's  2023 revenue, in USD?", 4),
            "what-is-tesla-s"
        );
        assert_eq!(slugify("???", 3), "");
    }

    #[test]
    fn sanitize_names_deduplicates_and_trims() {
        let names = vec![
            " docs ".to_string(),
            "web".to_string(),
            "docs".to_string(),
            "".to_string(),
        ];
        assert_eq!(sanitize_names(names), vec!["docs", "web"]);
    }

    #[test]
    fn truncate_words_marks_elision() {
        assert_eq!(truncate_words("a b c d", 2), "a b ...");
        assert_eq!(truncate_words("a b", 5), "a b");
    }

    #[test]
    fn fill_template_is_single_pass() {
        let filled = fill_template(
            "Q: {question} A: {answer} {unknown}",
            &[("question", "what is {answer}?"), ("answer", "42")],
        );
        assert_eq!(filled, "Q: what is {answer}? A: 42 {unknown}");
    }

    #[test]
    fn keywords_drop_short_tokens() {
        assert_eq!(keywords("Is the CPU at 90%? What load?"), vec!["cpu", "load"]);
    }
}
