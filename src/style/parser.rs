//! Top-level rule splitting for stylesheet text.
//!
//! Only the outermost rules are separated; anything nested (the contents of `@media`,
//! `@supports`, `@keyframes`) stays in its parent rule's text.

use crate::events::EventLog;
use crate::resolve::resolve_reference;
use crate::style::block::RuleKind;
use regex::Regex;
use std::sync::OnceLock;

/// A top-level rule as found in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub kind: RuleKind,
    pub selector: Option<String>,
    pub text: String,
}

/// Split `css` into its top-level rules
pub fn parse_rules(css: &str) -> Vec<ParsedRule> {
    let source = strip_comments(css);
    let mut scanner = Scanner::new(&source);
    let mut rules = Vec::new();

    loop {
        scanner.skip_whitespace();
        let Some(first) = scanner.peek() else {
            break;
        };
        let start = scanner.pos;

        match first {
            b';' | b'}' => scanner.pos += 1,
            b'@' => {
                scanner.pos += 1;
                let keyword = scanner.read_identifier();
                let kind = RuleKind::from_at_keyword(keyword);
                match scanner.scan_to(b";{") {
                    Some(b';') => scanner.pos += 1,
                    Some(_) => {
                        scanner.skip_block();
                    }
                    None => {}
                }
                rules.push(ParsedRule {
                    kind,
                    selector: None,
                    text: scanner.slice_from(start).to_string(),
                });
            }
            _ => {
                if scanner.scan_to(b"{").is_none() {
                    break;
                }
                let prelude = scanner.slice_from(start).to_string();
                scanner.skip_block();
                if prelude.is_empty() {
                    continue;
                }
                rules.push(ParsedRule {
                    kind: RuleKind::Style,
                    selector: Some(prelude.split_whitespace().collect::<Vec<_>>().join(" ")),
                    text: scanner.slice_from(start).to_string(),
                });
            }
        }
    }
    rules
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                out.extend(chars.next());
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn slice_from(&self, start: usize) -> &'a str {
        self.source[start..self.pos.min(self.bytes.len())].trim()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            self.pos += 1;
        }
        &self.source[start..self.pos]
    }

    /// Step over the string starting at the current quote
    fn skip_string(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b if b == quote => return,
                _ => {}
            }
        }
    }

    /// Advance to the first byte in `stops` outside strings and parentheses
    fn scan_to(&mut self, stops: &[u8]) -> Option<u8> {
        let mut parens = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'"' | b'\'' => {
                    self.skip_string(b);
                    continue;
                }
                b'\\' => {
                    self.pos += 2;
                    continue;
                }
                b'(' => parens += 1,
                b')' => parens = parens.saturating_sub(1),
                _ if parens == 0 && stops.contains(&b) => return Some(b),
                _ => {}
            }
            self.pos += 1;
        }
        self.pos = self.bytes.len();
        None
    }

    /// Step over the block opened at the current `{`. An unterminated block runs to the end.
    fn skip_block(&mut self) -> bool {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'"' | b'\'' => {
                    self.skip_string(b);
                    continue;
                }
                b'\\' => {
                    self.pos += 2;
                    continue;
                }
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.pos += 1;
                        return true;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        self.pos = self.bytes.len();
        false
    }
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"url\(\s*['"]?(.+?)['"]?\s*\)"#).expect("valid url() pattern"))
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^@import\s+['"]([^'"]+)['"]"#).expect("valid @import pattern"))
}

/// Absolute URLs referenced by `text`, in order of first appearance
pub fn extract_links(text: &str, base_url: &str, log: &dyn EventLog) -> Vec<String> {
    let raw = import_pattern()
        .captures(text)
        .into_iter()
        .chain(url_pattern().captures_iter(text))
        .map(|caps| caps[1].trim().to_string());

    let mut links: Vec<String> = Vec::new();
    for candidate in raw {
        let url = match resolve_reference(base_url, &candidate) {
            Some(Ok(url)) => url,
            Some(Err(e)) => {
                log.warn(&format!("Failed to resolve style link '{}' against {}: {}", candidate, base_url, e));
                candidate
            }
            None => continue,
        };
        if !links.contains(&url) {
            links.push(url);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;

    #[test]
    fn test_top_level_rules() {
        let css = r#"
            @charset "utf-8";
            @import url("base.css") screen;
            /* heading { ignored } */
            h1,  h2 > a { color: red; }
            @media (max-width: 600px) { .a { top: 0 } .b { top: 1px } }
            @font-face { font-family: X; src: url(x.woff) }
            @keyframes spin { from { opacity: 0 } to { opacity: 1 } }
            .q::after { content: "}{"; }
        "#;
        let rules = parse_rules(css);
        let kinds: Vec<RuleKind> = rules.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::Charset,
                RuleKind::Import,
                RuleKind::Style,
                RuleKind::Media,
                RuleKind::FontFace,
                RuleKind::Unknown,
                RuleKind::Style,
            ]
        );
        assert_eq!(rules[2].selector.as_deref(), Some("h1, h2 > a"));
        assert_eq!(rules[2].text, "h1,  h2 > a { color: red; }");
        assert!(rules[3].text.ends_with(".b { top: 1px } }"));
        assert_eq!(rules[6].selector.as_deref(), Some(".q::after"));
    }

    #[test]
    fn test_empty_and_unterminated_input() {
        assert!(parse_rules("").is_empty());
        assert!(parse_rules("   /* nothing */ ").is_empty());

        let rules = parse_rules("a { color: red");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].selector.as_deref(), Some("a"));
    }

    #[test]
    fn test_semicolon_inside_url_does_not_end_import() {
        let rules = parse_rules("@import url(data:text/css;base64,YQ==); p{}");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind, RuleKind::Import);
    }

    #[test]
    fn test_links_are_resolved_and_deduped() {
        let log = MemoryLog::new();
        let links = extract_links(
            r#".x { background: url('img/a.png'), url("img/a.png"), url(/b.svg), url(data:image/png;base64,AA) }"#,
            "https://site.test/css/main.css",
            log.as_ref(),
        );
        assert_eq!(links, vec!["https://site.test/css/img/a.png", "https://site.test/b.svg"]);
    }

    #[test]
    fn test_import_string_link() {
        let log = MemoryLog::new();
        let links = extract_links("@import \"print.css\" print;", "https://site.test/", log.as_ref());
        assert_eq!(links, vec!["https://site.test/print.css"]);
    }
}
