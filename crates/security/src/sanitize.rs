//! Input sanitization and injection detection.
//!
//! Markup problems fail open: dangerous constructs are stripped and the rest
//! of the text is kept. Injection payloads fail closed: the whole input is
//! replaced by an empty string.

use ledgerguard_config::SanitizationConfig;
use regex_lite::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?script\b[^>]*>").expect("valid regex"));
static EMBED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:iframe|object|embed)\b[^>]*>").expect("valid regex")
});
// Browsers ignore whitespace and control characters inside a URL scheme
static SCRIPT_URI: LazyLock<Regex> = LazyLock::new(|| {
    let gap = r"[\s\x00-\x1F]*";
    let pattern = "javascript:"
        .chars()
        .map(|c| regex_lite::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(gap);
    Regex::new(&format!("(?i){pattern}")).expect("valid regex")
});
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("valid regex")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+))?"#)
        .expect("valid regex")
});

/// Injection signatures, scanned case-insensitively after stripping.
static INJECTION_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("union_select", r"(?i)\bunion\s+(?:all\s+)?select\b"),
        ("drop_table", r"(?i)\bdrop\s+table\b"),
        ("delete_from", r"(?i)\bdelete\s+from\b"),
        ("insert_into", r"(?i)\binsert\s+into\b"),
        ("update_set", r"(?i)\bupdate\s+\S+\s+set\b"),
        ("exec_call", r"(?i)\bexec\s*\("),
        ("eval_call", r"(?i)\beval\s*\("),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// What sanitizing one input did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    /// The cleaned text (empty when an injection was detected)
    pub output: String,
    /// Original length in characters, when the input was truncated
    pub truncated_from: Option<usize>,
    /// Whether script, embed, `javascript:` or event-handler markup was removed
    pub markup_stripped: bool,
    /// Name of the injection signature that matched, if any
    pub injection: Option<&'static str>,
}

/// Strips dangerous markup and detects injection payloads.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    allowed_tags: HashSet<String>,
    allowed_attributes: HashSet<String>,
    max_length: usize,
}

impl Sanitizer {
    pub fn new(config: &SanitizationConfig) -> Self {
        Self {
            allowed_tags: config
                .allowed_tags
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            allowed_attributes: config
                .allowed_attributes
                .iter()
                .map(|a| a.to_ascii_lowercase())
                .collect(),
            max_length: config.max_length,
        }
    }

    /// Sanitize `input`. Never fails.
    pub fn sanitize(&self, input: &str) -> SanitizeReport {
        let length = input.chars().count();
        let (text, truncated_from) = if length > self.max_length {
            (input.chars().take(self.max_length).collect::<String>(), Some(length))
        } else {
            (input.to_string(), None)
        };

        let stripped = strip_dangerous(&text);
        let markup_stripped = stripped != text;

        let output = TAG
            .replace_all(&stripped, |caps: &Captures<'_>| self.rewrite_tag(caps))
            .into_owned();

        let injection = INJECTION_PATTERNS
            .iter()
            .find(|(_, re)| re.is_match(&output))
            .map(|(name, _)| *name);

        SanitizeReport {
            output: if injection.is_some() { String::new() } else { output },
            truncated_from,
            markup_stripped,
            injection,
        }
    }

    /// Keep allowed tags with their allowed attributes; unwrap the rest.
    fn rewrite_tag(&self, caps: &Captures<'_>) -> String {
        let closing = &caps[1];
        let name = caps[2].to_ascii_lowercase();
        if !self.allowed_tags.contains(&name) {
            return String::new();
        }
        if !closing.is_empty() {
            return format!("</{name}>");
        }

        let mut tag = format!("<{name}");
        for attr in ATTRIBUTE.captures_iter(&caps[3]) {
            let attr_name = attr[1].to_ascii_lowercase();
            if !self.allowed_attributes.contains(&attr_name) {
                continue;
            }
            match attr.get(2) {
                Some(value) => {
                    let value = value.as_str().trim_matches(|c| c == '"' || c == '\'');
                    if URL_ATTRIBUTES.contains(&attr_name.as_str()) && !is_safe_url(value) {
                        continue;
                    }
                    tag.push_str(&format!(" {attr_name}=\"{}\"", value.replace('"', "&quot;")));
                }
                None => tag.push_str(&format!(" {attr_name}")),
            }
        }
        tag.push('>');
        tag
    }
}

/// Attributes whose value is followed as a URL.
const URL_ATTRIBUTES: [&str; 6] = ["href", "src", "action", "formaction", "cite", "poster"];

const SAFE_SCHEMES: [&str; 4] = ["http:", "https:", "mailto:", "tel:"];

/// Remove dangerous constructs until none are left. Removing one match can
/// join its surroundings into a new one, so a single pass is not enough.
/// Every pass that changes the text shortens it, so the loop terminates.
fn strip_dangerous(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = SCRIPT_BLOCK.replace_all(&current, "");
        let next = SCRIPT_TAG.replace_all(&next, "");
        let next = EMBED_TAG.replace_all(&next, "");
        let next = SCRIPT_URI.replace_all(&next, "");
        let next = EVENT_HANDLER.replace_all(&next, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Relative URLs and a few plain schemes pass. Anything whose scheme part
/// carries a `:` or an entity (`&`) must start with a safe scheme once
/// whitespace and control characters are removed.
fn is_safe_url(value: &str) -> bool {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    let scheme_part = normalized
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    if !scheme_part.contains([':', '&']) {
        return true;
    }
    SAFE_SCHEMES.iter().any(|scheme| normalized.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(&SanitizationConfig::default())
    }

    #[test]
    fn script_block_removed_text_kept() {
        let report = sanitizer().sanitize("<script>alert(1)</script>hello");
        assert_eq!(report.output, "hello");
        assert!(report.markup_stripped);
        assert!(report.injection.is_none());
    }

    #[test]
    fn multiline_script_block_removed() {
        let report = sanitizer().sanitize("a<SCRIPT type=\"text/javascript\">\nvar x = 1;\n</script >b");
        assert_eq!(report.output, "ab");
    }

    #[test]
    fn sql_injection_fails_closed() {
        let report = sanitizer().sanitize("' OR 1=1; DROP TABLE users");
        assert_eq!(report.output, "");
        assert_eq!(report.injection, Some("drop_table"));
    }

    #[test]
    fn each_injection_signature_is_detected() {
        let s = sanitizer();
        for payload in [
            "1 UNION SELECT password FROM users",
            "x; delete from invoices",
            "INSERT INTO tenants VALUES (1)",
            "update accounts set balance = 0",
            "exec (xp_cmdshell)",
            "eval(atob('...'))",
        ] {
            let report = s.sanitize(payload);
            assert!(report.injection.is_some(), "not detected: {payload}");
            assert!(report.output.is_empty());
        }
    }

    #[test]
    fn ordinary_prose_passes() {
        let report = sanitizer().sanitize("Please update the invoice and select a due date.");
        assert_eq!(report.output, "Please update the invoice and select a due date.");
        assert!(report.injection.is_none());
        assert!(!report.markup_stripped);
    }

    #[test]
    fn embeds_and_handlers_stripped() {
        let report = sanitizer()
            .sanitize("<iframe src=\"https://evil\"></iframe><a href=\"javascript:steal()\" onclick=\"x()\">hi</a>");
        assert!(!report.output.contains("iframe"));
        assert!(!report.output.to_lowercase().contains("javascript:"));
        assert!(!report.output.contains("onclick"));
        assert!(report.output.contains("hi"));
        assert!(report.markup_stripped);
    }

    #[test]
    fn nested_script_uri_does_not_reassemble() {
        let report =
            sanitizer().sanitize("<a href=\"javajavascript:script:alert(document.cookie)\">x</a>");
        assert!(!report.output.to_lowercase().contains("javascript"));
        assert!(report.output.contains(">x</a>"));
        assert!(report.markup_stripped);
    }

    #[test]
    fn script_uri_split_by_whitespace_is_removed() {
        let s = sanitizer();
        for input in [
            "<a href=\"java\tscript:alert(1)\">x</a>",
            "<a href=\"java\nscript:alert(1)\">x</a>",
            "<a href=\" j a v a s c r i p t : alert(1)\">x</a>",
            "<a href=\"java\u{0}script:alert(1)\">x</a>",
        ] {
            let report = s.sanitize(input);
            let squashed: String = report
                .output
                .chars()
                .filter(|c| !c.is_whitespace() && !c.is_control())
                .collect::<String>()
                .to_lowercase();
            assert!(!squashed.contains("javascript:"), "left a script uri: {input:?}");
            assert!(report.markup_stripped, "not flagged: {input:?}");
        }
    }

    #[test]
    fn unsafe_href_schemes_dropped_safe_ones_kept() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize("<a href=\"&#106;avascript:alert(1)\">x</a>").output,
            "<a>x</a>"
        );
        assert_eq!(
            s.sanitize("<a href=\"vbscript:msgbox(1)\">x</a>").output,
            "<a>x</a>"
        );
        assert_eq!(
            s.sanitize("<a href=\"https://example.com/a?b=1&c=2\">x</a>").output,
            "<a href=\"https://example.com/a?b=1&c=2\">x</a>"
        );
        assert_eq!(
            s.sanitize("<a href=\"/invoices/42\">x</a>").output,
            "<a href=\"/invoices/42\">x</a>"
        );
        assert_eq!(
            s.sanitize("<a href=\"mailto:billing@example.com\">x</a>").output,
            "<a href=\"mailto:billing@example.com\">x</a>"
        );
    }

    #[test]
    fn allowed_tags_kept_others_unwrapped() {
        let report = sanitizer().sanitize("<div class=\"x\"><b title=\"t\" style=\"color:red\">bold</b></div>");
        assert_eq!(report.output, "<b title=\"t\">bold</b>");
        assert!(!report.markup_stripped);
    }

    #[test]
    fn long_input_truncated_fail_open() {
        let s = Sanitizer::new(&SanitizationConfig {
            max_length: 5,
            ..SanitizationConfig::default()
        });
        let report = s.sanitize("héllo world");
        assert_eq!(report.output, "héllo");
        assert_eq!(report.truncated_from, Some(11));
    }

    #[test]
    fn empty_input_is_fine() {
        let report = sanitizer().sanitize("");
        assert_eq!(report.output, "");
        assert_eq!(report.truncated_from, None);
        assert!(report.injection.is_none());
    }
}
