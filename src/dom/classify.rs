//! Element classification: event handlers and outbound request references.

use crate::dom::element::{Element, OutboundRequest};
use crate::events::EventLog;
use crate::resolve::resolve_reference;
use regex::Regex;
use std::sync::OnceLock;

/// Form events
pub const FORM_EVENTS: &[&str] = &[
    "onblur", "onchange", "oncontextmenu", "onfocus", "oninput", "oninvalid", "onreset", "onsearch", "onselect",
    "onsubmit", "ontoggle",
];

/// Keyboard events
pub const KEYBOARD_EVENTS: &[&str] = &["onkeydown", "onkeypress", "onkeyup"];

/// Mouse events
pub const MOUSE_EVENTS: &[&str] = &[
    "onclick", "ondblclick", "onmousedown", "onmousemove", "onmouseout", "onmouseover", "onmouseup", "onmouseenter",
    "onmouseleave", "onwheel",
];

/// Drag events
pub const DRAG_EVENTS: &[&str] = &[
    "ondrag", "ondragend", "ondragenter", "ondragleave", "ondragover", "ondragstart", "ondrop", "onscroll",
];

/// Clipboard events
pub const CLIPBOARD_EVENTS: &[&str] = &["oncopy", "oncut", "onpaste"];

/// Media events
pub const MEDIA_EVENTS: &[&str] = &[
    "onabort", "oncanplay", "oncanplaythrough", "oncuechange", "ondurationchange", "onemptied", "onended", "onerror",
    "onloadeddata", "onloadedmetadata", "onloadstart", "onpause", "onplay", "onprogress", "onratechange", "onseeked",
    "onseeking", "onstalled", "onsuspend", "ontimeupdate", "onvolumechange", "onwaiting",
];

/// Whether `name` is a recognised event-handler attribute
pub fn is_event_attribute(name: &str) -> bool {
    name.starts_with("on")
        && [FORM_EVENTS, KEYBOARD_EVENTS, MOUSE_EVENTS, DRAG_EVENTS, CLIPBOARD_EVENTS, MEDIA_EVENTS]
            .iter()
            .any(|group| group.contains(&name))
}

fn srcset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^\s,]+)\s*(\d+w|\d+x)?\s*,?").expect("valid srcset pattern"))
}

/// Recompute interaction and outbound-request classification for `element`.
///
/// Referenced URLs are rewritten to absolute form in the attribute map.
pub fn classify(element: &mut Element, base_url: &str, log: &dyn EventLog) {
    let mut interactive: Vec<String> = element
        .attributes
        .keys()
        .filter(|k| is_event_attribute(k))
        .cloned()
        .collect();
    interactive.sort();
    element.interactive = interactive;

    let mut resolver = Resolver {
        element: &mut *element,
        base_url,
        log,
    };
    let (active, passive) = resolver.outbound();
    element.active_requests = active;
    element.passive_requests = passive;
}

struct Resolver<'a> {
    element: &'a mut Element,
    base_url: &'a str,
    log: &'a dyn EventLog,
}

impl Resolver<'_> {
    /// Resolve the attribute `key` and write the absolute URL back
    fn take(&mut self, key: &str) -> Option<String> {
        let raw = self.element.attributes.get(key)?.clone();
        match resolve_reference(self.base_url, &raw)? {
            Ok(url) => {
                self.element.attributes.insert(key.to_string(), url.clone());
                Some(url)
            }
            Err(e) => {
                self.log.warn(&format!(
                    "Failed to resolve '{}' against {} on <{}>: {}",
                    raw, self.base_url, self.element.tag_name, e
                ));
                Some(raw)
            }
        }
    }

    fn take_srcset(&mut self) -> Vec<String> {
        let Some(raw) = self.element.attributes.get("srcset").cloned() else {
            return Vec::new();
        };

        let mut urls = Vec::new();
        let mut rewritten = Vec::new();
        for caps in srcset_pattern().captures_iter(&raw) {
            let candidate = &caps[1];
            let url = match resolve_reference(self.base_url, candidate) {
                Some(Ok(url)) => url,
                Some(Err(e)) => {
                    self.log.warn(&format!("Failed to resolve srcset entry '{}': {}", candidate, e));
                    candidate.to_string()
                }
                None => continue,
            };
            rewritten.push(match caps.get(2) {
                Some(descriptor) => format!("{} {}", url, descriptor.as_str()),
                None => url.clone(),
            });
            urls.push(url);
        }
        if !rewritten.is_empty() {
            self.element.attributes.insert("srcset".to_string(), rewritten.join(", "));
        }
        urls
    }

    fn attr_eq(&self, key: &str, value: &str) -> bool {
        self.element
            .attributes
            .get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(value))
    }

    fn outbound(&mut self) -> (Vec<OutboundRequest>, Vec<OutboundRequest>) {
        let tag = self.element.tag_name.clone();
        let mut active: Vec<String> = Vec::new();
        let mut passive = Vec::new();

        match tag.as_str() {
            "link" => active.extend(self.take("href")),
            "img" | "source" => {
                active.extend(self.take("src"));
                active.extend(self.take_srcset());
            }
            "script" | "iframe" | "frame" | "embed" | "audio" | "track" => active.extend(self.take("src")),
            "object" => active.extend(self.take("data")),
            "video" => {
                active.extend(self.take("poster"));
                active.extend(self.take("src"));
            }
            "input" if self.attr_eq("type", "image") => active.extend(self.take("src")),
            "applet" => {
                active.extend(self.take("code"));
                active.extend(self.take("archive"));
            }
            "body" | "table" => active.extend(self.take("background")),
            "head" => active.extend(self.take("profile")),
            "meta" if self.attr_eq("http-equiv", "refresh") => active.extend(self.take_refresh()),
            "use" | "feImage" | "pattern" => {
                active.extend(self.take("href"));
                active.extend(self.take("xlink:href"));
            }
            "a" | "area" => passive.extend(self.take("href").map(OutboundRequest::get)),
            "form" => {
                if let Some(url) = self.take("action") {
                    let method = if self.attr_eq("method", "post") { "POST" } else { "GET" };
                    passive.push(OutboundRequest::new(url, method));
                }
            }
            "blockquote" | "q" | "del" | "ins" => passive.extend(self.take("cite").map(OutboundRequest::get)),
            _ => {}
        }

        (active.into_iter().map(OutboundRequest::get).collect(), passive)
    }

    /// `<meta http-equiv=refresh content="5; url=next.html">`
    fn take_refresh(&mut self) -> Option<String> {
        let content = self.element.attributes.get("content")?.clone();
        let (delay, target) = match content.split_once(';') {
            Some((delay, rest)) => (delay.trim().to_string(), rest.trim()),
            None => return None,
        };
        let target = target
            .strip_prefix("url=")
            .or_else(|| target.strip_prefix("URL="))
            .unwrap_or(target)
            .trim_matches(|c| c == '\'' || c == '"');

        let url = match resolve_reference(self.base_url, target)? {
            Ok(url) => url,
            Err(e) => {
                self.log.warn(&format!("Failed to resolve refresh target '{}': {}", target, e));
                target.to_string()
            }
        };
        self.element
            .attributes
            .insert("content".to_string(), format!("{}; url={}", delay, url));
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;

    const BASE: &str = "https://site.test/dir/page.html";

    fn element(tag: &str, attrs: &[(&str, &str)]) -> Element {
        let mut e = Element::new("id", tag);
        for (k, v) in attrs {
            e.attributes.insert(k.to_string(), v.to_string());
        }
        e
    }

    #[test]
    fn test_event_attributes() {
        let log = MemoryLog::new();
        let mut e = element("button", &[("onclick", "go()"), ("onfoo", "x"), ("class", "b"), ("ondrop", "y")]);
        classify(&mut e, BASE, log.as_ref());
        assert_eq!(e.interactive, vec!["onclick".to_string(), "ondrop".to_string()]);
        assert!(e.is_interactive());
    }

    #[test]
    fn test_active_references_are_resolved_and_rewritten() {
        let log = MemoryLog::new();
        let mut img = element("img", &[("src", "a.png"), ("srcset", "b.png 1x, /c.png 2x")]);
        classify(&mut img, BASE, log.as_ref());

        let urls: Vec<_> = img.active_requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://site.test/dir/a.png", "https://site.test/dir/b.png", "https://site.test/c.png"]
        );
        assert!(img.active_requests.iter().all(|r| r.method == "GET"));
        assert_eq!(img.get_attribute("src").unwrap(), "https://site.test/dir/a.png");
        assert_eq!(
            img.get_attribute("srcset").unwrap(),
            "https://site.test/dir/b.png 1x, https://site.test/c.png 2x"
        );
    }

    #[test]
    fn test_passive_form_method() {
        let log = MemoryLog::new();
        let mut form = element("form", &[("action", "/submit"), ("method", "Post")]);
        classify(&mut form, BASE, log.as_ref());
        assert_eq!(form.passive_requests, vec![OutboundRequest::new("https://site.test/submit", "POST")]);

        let mut form = element("form", &[("action", "/search")]);
        classify(&mut form, BASE, log.as_ref());
        assert_eq!(form.passive_requests[0].method, "GET");
        assert!(form.active_requests.is_empty());
    }

    #[test]
    fn test_inert_links_are_not_outbound() {
        let log = MemoryLog::new();
        let mut a = element("a", &[("href", "javascript:void(0)")]);
        classify(&mut a, BASE, log.as_ref());
        assert!(a.passive_requests.is_empty());
    }

    #[test]
    fn test_meta_refresh_and_input_image() {
        let log = MemoryLog::new();
        let mut meta = element("meta", &[("http-equiv", "refresh"), ("content", "5; url=next.html")]);
        classify(&mut meta, BASE, log.as_ref());
        assert_eq!(meta.active_requests, vec![OutboundRequest::get("https://site.test/dir/next.html")]);

        let mut input = element("input", &[("type", "text"), ("src", "x.png")]);
        classify(&mut input, BASE, log.as_ref());
        assert!(input.active_requests.is_empty());
    }

    #[test]
    fn test_unresolvable_reference_is_logged_and_kept() {
        let log = MemoryLog::new();
        let mut script = element("script", &[("src", "app.js")]);
        classify(&mut script, "not a base", log.as_ref());
        assert_eq!(script.active_requests, vec![OutboundRequest::get("app.js")]);
        assert!(log.contains("Failed to resolve"));
    }
}
