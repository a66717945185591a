use std::sync::OnceLock;

use common::error::AppError;
use regex::Regex;

struct Patterns {
    disallowed: Regex,
    whitespace_run: Regex,
    period_run: Regex,
}

fn patterns() -> Result<&'static Patterns, AppError> {
    static PATTERNS: OnceLock<Result<Patterns, String>> = OnceLock::new();

    match PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| format!("failed to compile `{pattern}`: {e}"))
        };
        Ok(Patterns {
            disallowed: compile(r"[^\w\s.,!?-]")?,
            whitespace_run: compile(r"\s+")?,
            period_run: compile(r"\.+")?,
        })
    }) {
        Ok(patterns) => Ok(patterns),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}

/// Lower-cases, drops characters outside word characters, whitespace and `.,!?-`, collapses
/// whitespace runs to one space and period runs to one period, then trims.
///
/// Idempotent: applying it twice gives the same text as applying it once.
pub fn normalize(text: &str) -> Result<String, AppError> {
    let patterns = patterns()?;
    let lowered = text.to_lowercase();
    let kept = patterns.disallowed.replace_all(&lowered, "");
    let spaced = patterns.whitespace_run.replace_all(&kept, " ");
    let collapsed = patterns.period_run.replace_all(&spaced, ".");
    Ok(collapsed.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(text: &str) -> String {
        normalize(text).expect("patterns compile")
    }

    #[test]
    fn collapses_whitespace_and_period_runs() {
        assert_eq!(
            norm("Hello,   World!!!  Test.... done"),
            "hello, world!!! test. done"
        );
    }

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(norm("C++ & Rust (2024) #1"), "c rust 2024 1");
        assert_eq!(norm("e-mail: me@example.com"), "e-mail meexample.com");
        assert_eq!(norm("\t\n  padded \r\n"), "padded");
    }

    #[test]
    fn keeps_unicode_word_characters() {
        assert_eq!(norm("Café CRÈME über"), "café crème über");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "Hello,   World!!!  Test.... done",
            "  . . .. ...  ",
            "A\u{00A0}B\u{2003}C",
            "Straße İstanbul",
            "mixed\t\twhitespace\n\nand... dots?!",
            "",
            "(((())))",
        ];
        for sample in samples {
            let once = norm(sample);
            assert_eq!(norm(&once), once, "not idempotent for {sample:?}");
        }
    }
}
