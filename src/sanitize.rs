//! Model-output sanitization and prompt-injection heuristics.
//!
//! `sanitize` strips control characters and zero-width code points before
//! the output reaches the parser or the logs. `detect_injection` flags
//! common prompt-hijack patterns; detection only annotates telemetry, it
//! never blocks a turn.

use regex::RegexSet;
use std::sync::OnceLock;

/// Remove ASCII control characters (keeping `\t`, `\n`, `\r`) and the
/// zero-width/BOM set. All other Unicode passes through verbatim.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|&c| !is_stripped(c)).collect()
}

fn is_stripped(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{0008}'
        | '\u{000b}'
        | '\u{000c}'
        | '\u{000e}'..='\u{001f}'
        | '\u{007f}'
        | '\u{200b}'
        | '\u{200c}'
        | '\u{200d}'
        | '\u{2060}'
        | '\u{feff}'
        | '\u{00ad}')
}

const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)ignore\s+(all\s+)?previous\s+instructions",
    r"(?i)disregard\s+(all\s+)?(previous|prior|above)\s+instructions",
    r"(?i)</?system>",
    r"(?i)</?assistant>",
    r"(?i)\[/?INST\]",
    r#"(?i)"role"\s*:\s*"system""#,
    r"(?i)you\s+are\s+now\s+(unbound|free|jailbroken|dan\b)",
    r"(?i)new\s+instructions\s*:",
    r"(?i)system\s+prompt",
];

fn injection_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(INJECTION_PATTERNS).expect("injection patterns are valid regexes")
    })
}

/// Heuristic flag for prompt-hijack attempts. A false positive on
/// legitimate game commentary is accepted; the flag never blocks play.
pub fn detect_injection(text: &str) -> bool {
    injection_set().is_match(text)
}
