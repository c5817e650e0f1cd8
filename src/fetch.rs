//! Fetching external stylesheet and script bodies.

use crate::error::{ExtractionError, Result};
use crate::events::{self, EventLog, SharedLog};
use encoding_rs::{Encoding, UTF_8};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("page-graph/", env!("CARGO_PKG_VERSION"));

/// Raw body of a fetched resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedResource {
    pub url: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    pub fn new(url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            bytes: bytes.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Body as strict UTF-8, or `None` when it is empty or not valid UTF-8
    pub fn strict_text(&self) -> Option<&str> {
        if self.bytes.is_empty() || Encoding::for_bom(&self.bytes).is_some_and(|(enc, _)| enc != UTF_8) {
            return None;
        }
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Body decoded with the charset named by a BOM, the Content-Type header or `@charset`
    pub fn decode(&self) -> String {
        decode_text(&self.bytes, self.content_type.as_deref().unwrap_or_default())
    }
}

/// Source of external resource bodies
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedResource>;

    /// Fetch `url` as text.
    ///
    /// An empty or non-UTF-8 body gets one encoding-sensitive re-read.
    fn fetch_text(&self, url: &str, log: &dyn EventLog) -> Result<String> {
        let resource = self.fetch(url)?;
        if let Some(text) = resource.strict_text() {
            return Ok(text.trim_start_matches('\u{feff}').to_string());
        }

        let resource = if resource.bytes.is_empty() {
            log.debug(&format!("Empty body from {}, fetching again", url));
            self.fetch(url)?
        } else {
            resource
        };
        Ok(resource.decode())
    }
}

/// [`ResourceFetcher`] over `reqwest`'s blocking client
pub struct HttpFetcher {
    client: Client,
    log: SharedLog,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExtractionError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            log: events::facade(),
        })
    }

    pub fn with_log(mut self, log: SharedLog) -> Self {
        self.log = log;
        self
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ExtractionError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|e| ExtractionError::Fetch(format!("Failed to read body of {}: {}", url, e)))?;

        self.log
            .debug(&format!("Fetched {} ({} bytes, status {})", url, bytes.len(), status));
        Ok(FetchedResource {
            url: url.to_string(),
            status: Some(status),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// Decode `body` using the first charset found in its BOM, `content_type`, or a leading `@charset`
pub fn decode_text(body: &[u8], content_type: &str) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(body) {
        let (decoded, _) = encoding.decode_without_bom_handling(&body[bom_len..]);
        return decoded.into_owned();
    }

    let label = parse_charset_from_content_type(content_type).or_else(|| parse_css_charset(body));
    if let Some(encoding) = label.and_then(|l| Encoding::for_label(l.as_bytes())) {
        let (decoded, _, _) = encoding.decode(body);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(body).into_owned()
}

fn parse_charset_from_content_type(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"').trim_matches('\'');
        if !label.is_empty() {
            return Some(label.to_owned());
        }
    }
    None
}

/// `@charset "label";` must be the very first bytes of a stylesheet
fn parse_css_charset(body: &[u8]) -> Option<String> {
    let rest = body.strip_prefix(b"@charset \"")?;
    let end = rest.iter().take(64).position(|b| *b == b'"')?;
    let label = std::str::from_utf8(&rest[..end]).ok()?.trim();
    (!label.is_empty()).then(|| label.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;
    use std::sync::Mutex;

    struct Scripted {
        bodies: Mutex<Vec<FetchedResource>>,
    }

    impl ResourceFetcher for Scripted {
        fn fetch(&self, url: &str) -> Result<FetchedResource> {
            let mut bodies = self.bodies.lock().unwrap();
            if bodies.is_empty() {
                return Err(ExtractionError::Fetch(url.to_string()));
            }
            Ok(bodies.remove(0))
        }
    }

    #[test]
    fn test_charset_from_content_type() {
        assert_eq!(
            parse_charset_from_content_type("text/css; charset=\"ISO-8859-1\""),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(parse_charset_from_content_type("text/css"), None);
    }

    #[test]
    fn test_latin1_body_is_redecoded() {
        let body = b"p::after { content: \"caf\xe9\" }";
        assert!(FetchedResource::new("u", body.to_vec()).strict_text().is_none());
        assert_eq!(decode_text(body, "text/css; charset=iso-8859-1"), "p::after { content: \"café\" }");
    }

    #[test]
    fn test_css_charset_rule() {
        let body = b"@charset \"windows-1252\"; a::before { content: \"\x80\" }";
        assert!(decode_text(body, "text/css").contains('€'));
    }

    #[test]
    fn test_utf16_bom() {
        let body = [0xFF, 0xFE, b'a', 0x00, b'{', 0x00, b'}', 0x00];
        assert_eq!(decode_text(&body, ""), "a{}");
    }

    #[test]
    fn test_empty_body_is_fetched_again() {
        let fetcher = Scripted {
            bodies: Mutex::new(vec![
                FetchedResource::new("u", Vec::new()),
                FetchedResource::new("u", b"a{color:red}".to_vec()),
            ]),
        };
        let log = MemoryLog::new();
        assert_eq!(fetcher.fetch_text("u", &*log).unwrap(), "a{color:red}");
        assert!(log.contains("Empty body from u"));
    }

    #[test]
    fn test_utf8_text_passes_through() {
        let fetcher = Scripted {
            bodies: Mutex::new(vec![FetchedResource::new("u", "\u{feff}b{}".as_bytes().to_vec())]),
        };
        let log = MemoryLog::new();
        assert_eq!(fetcher.fetch_text("u", &*log).unwrap(), "b{}");
        assert!(log.entries().is_empty());
    }
}
