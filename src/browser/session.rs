use crate::{browser::config::{ConnectionOptions, LaunchOptions},
            browser::{BrowserDriver, NetworkExchange},
            dom::NodePath,
            error::{ExtractionError, Result},
            events::{self, SharedLog}};
use base64::Engine;
use headless_chrome::{protocol::cdp::{types::Event, Emulation},
                      Browser, Tab};
use serde_json::Value;
use std::{collections::HashMap,
          ffi::OsStr,
          sync::{Arc, Mutex},
          time::{Duration, Instant, SystemTime, UNIX_EPOCH}};

const CAPTURE_HANDLER: &str = "page-graph-capture";

/// Poll interval while waiting for `document.readyState`
const LOAD_POLL: Duration = Duration::from_millis(100);

/// Request half of an exchange, as announced by `Network.requestWillBeSent`
#[derive(Debug, Clone, Default, PartialEq)]
struct SentRequest {
    url: String,
    method: String,
    headers: HashMap<String, String>,
    body: Option<String>,
    timestamp: f64,
}

impl SentRequest {
    /// Exchange carrying this request and no response yet
    fn into_exchange(self) -> NetworkExchange {
        let mut exchange = NetworkExchange::new(self.url, self.method);
        exchange.request_headers = self.headers;
        exchange.request_body = self.body;
        exchange.timestamp = self.timestamp;
        exchange
    }
}

/// Requests and responses seen since the last reset, joined by DevTools request id
#[derive(Debug, Default)]
struct CaptureBuffer {
    /// Sent requests still waiting for their response, in send order
    pending: Vec<(String, SentRequest)>,
    completed: Vec<NetworkExchange>,
    /// Bodies that failed to decode, reported on the next capture
    failures: Vec<String>,
}

impl CaptureBuffer {
    fn request_sent(&mut self, request_id: String, request: SentRequest) {
        // A redirect reuses the id; the hop that got no response is kept on its own
        if let Some(position) = self.pending.iter().position(|(id, _)| *id == request_id) {
            let (_, earlier) = self.pending.remove(position);
            self.completed.push(earlier.into_exchange());
        }
        self.pending.push((request_id, request));
    }

    /// Join a response to its request. A response whose request was never seen is taken as GET.
    fn response_received(&mut self, request_id: &str, url: &str, status: u16) -> &mut NetworkExchange {
        let request = match self.pending.iter().position(|(id, _)| id == request_id) {
            Some(position) => self.pending.remove(position).1,
            None => SentRequest {
                url: url.to_string(),
                method: "GET".to_string(),
                timestamp: now_seconds(),
                ..SentRequest::default()
            },
        };
        let mut exchange = request.into_exchange();
        exchange.url = url.to_string();
        exchange.status = Some(status);
        self.completed.push(exchange);
        let last = self.completed.len() - 1;
        &mut self.completed[last]
    }

    /// Answered exchanges followed by requests that never got a response (beacons, aborted loads)
    fn snapshot(&self) -> Vec<NetworkExchange> {
        let mut exchanges = self.completed.clone();
        exchanges.extend(self.pending.iter().map(|(_, request)| request.clone().into_exchange()));
        exchanges
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
        self.failures.clear();
    }
}

/// Chrome/Chromium-backed [`BrowserDriver`]
pub struct ChromeSession {
    /// The underlying headless_chrome Browser instance
    browser: Browser,

    tab: Arc<Tab>,

    /// Frame element paths from the top document down to the active frame
    frames: Vec<NodePath>,

    /// Exchanges recorded by the network listeners since the last reset
    captured: Arc<Mutex<CaptureBuffer>>,

    log: SharedLog,
}

impl ChromeSession {
    /// Launch a new browser instance with the given options
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        let mut launch_opts = headless_chrome::LaunchOptions::default();

        // Ignore default arguments to prevent detection by anti-bot services
        launch_opts.ignore_default_args.push(OsStr::new("--enable-automation"));
        launch_opts.args.push(OsStr::new("--disable-blink-features=AutomationControlled"));

        // Script replay waits between steps, so the default 30 second idle timeout is too short
        launch_opts.idle_browser_timeout = Duration::from_secs(options.idle_timeout_secs);

        // Configure headless mode
        launch_opts.headless = options.headless;

        // Set window size
        launch_opts.window_size = Some((options.window_width, options.window_height));

        // Set sandbox mode
        launch_opts.sandbox = options.sandbox;

        // Set Chrome binary path if provided
        if let Some(path) = options.chrome_path {
            launch_opts.path = Some(path);
        }

        // Set user data directory if provided
        if let Some(dir) = options.user_data_dir {
            launch_opts.user_data_dir = Some(dir);
        }

        // Launch browser
        let browser = Browser::new(launch_opts).map_err(|e| ExtractionError::LaunchFailed(e.to_string()))?;
        Self::with_browser(browser)
    }

    /// Connect to an existing browser instance via WebSocket
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        let timeout = Duration::from_millis(options.timeout);
        let browser = Browser::connect_with_timeout(options.ws_url, timeout)
            .map_err(|e| ExtractionError::ConnectionFailed(e.to_string()))?;
        Self::with_browser(browser)
    }

    fn with_browser(browser: Browser) -> Result<Self> {
        let tab = browser
            .new_tab()
            .map_err(|e| ExtractionError::LaunchFailed(format!("Failed to create tab: {}", e)))?;

        let session = Self {
            browser,
            tab,
            frames: Vec::new(),
            captured: Arc::new(Mutex::new(CaptureBuffer::default())),
            log: events::facade(),
        };
        session.register_capture()?;
        Ok(session)
    }

    /// Send diagnostics to `log` instead of the `log` facade
    pub fn with_log(mut self, log: SharedLog) -> Self {
        self.log = log;
        self
    }

    /// Record every request as it is sent and join each response, with its body, to it
    fn register_capture(&self) -> Result<()> {
        let sent = Arc::clone(&self.captured);
        self.tab
            .add_event_listener(Arc::new(move |event: &Event| {
                if let Event::NetworkRequestWillBeSent(ev) = event {
                    let request = &ev.params.request;
                    let sent_request = SentRequest {
                        url: request.url.clone(),
                        method: request.method.to_ascii_uppercase(),
                        headers: headers_to_map(serde_json::to_value(&request.headers).ok()),
                        body: request.post_data.clone(),
                        timestamp: now_seconds(),
                    };
                    if let Ok(mut buffer) = sent.lock() {
                        buffer.request_sent(ev.params.request_id.clone(), sent_request);
                    }
                }
            }))
            .map_err(|e| ExtractionError::LaunchFailed(format!("Failed to register request listener: {}", e)))?;

        let captured = Arc::clone(&self.captured);
        self.tab
            .register_response_handling(
                CAPTURE_HANDLER,
                Box::new(move |event_params, fetch_body| {
                    let response = &event_params.response;
                    let headers = headers_to_map(serde_json::to_value(&response.headers).ok());

                    std::thread::sleep(Duration::from_millis(100));
                    let body = fetch_body().ok().map(|body| decode_body(&body.body, body.base_64_encoded));

                    if let Ok(mut buffer) = captured.lock() {
                        let body = match body {
                            Some(Ok(text)) => Some(text),
                            Some(Err(e)) => {
                                buffer
                                    .failures
                                    .push(format!("Failed to decode base64 body of {}: {}", response.url, e));
                                None
                            }
                            None => None,
                        };
                        let exchange =
                            buffer.response_received(&event_params.request_id, &response.url, response.status as u16);
                        exchange.response_headers = headers;
                        exchange.response_body = body;
                    }
                }),
            )
            .map_err(|e| ExtractionError::LaunchFailed(format!("Failed to register response handler: {}", e)))?;

        Ok(())
    }

    /// Get the underlying Browser instance
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    /// Wrap `script` so it runs inside the active frame's window
    fn frame_wrapped(&self, script: &str) -> Result<String> {
        if self.frames.is_empty() {
            return Ok(script.to_string());
        }

        let paths: Vec<String> = self.frames.iter().map(ToString::to_string).collect();
        Ok(format!(
            "(function () {{
                let win = window;
                for (const path of {paths}) {{
                    let node = win.document.documentElement;
                    for (const step of path.split('>').slice(1)) {{
                        node = step === 'shadowRoot' ? node.shadowRoot : node.children[Number(step)];
                    }}
                    win = node.contentWindow;
                }}
                return win.eval({script});
            }})()",
            paths = serde_json::to_string(&paths)?,
            script = serde_json::to_string(script)?,
        ))
    }
}

impl BrowserDriver for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.frames.clear();
        self.tab
            .navigate_to(url)
            .map_err(|e| ExtractionError::NavigationFailed(format!("Failed to navigate to {}: {}", url, e)))?;
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        match self.evaluate("window.location.href")? {
            Value::String(url) => Ok(url),
            other => Err(ExtractionError::Evaluation(format!("Unexpected location value: {}", other))),
        }
    }

    fn wait_for_load(&mut self, timeout: Duration) -> Result<bool> {
        let started = Instant::now();
        loop {
            if let Ok(Value::String(state)) = self.evaluate("document.readyState") {
                if state == "complete" {
                    return Ok(true);
                }
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(LOAD_POLL);
        }
    }

    fn set_script_execution(&mut self, enabled: bool) -> Result<()> {
        self.tab
            .call_method(Emulation::SetScriptExecutionDisabled { value: !enabled })
            .map_err(|e| ExtractionError::Evaluation(format!("Failed to toggle script execution: {}", e)))?;
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> Result<Value> {
        let wrapped = self.frame_wrapped(script)?;
        let result = self
            .tab
            .evaluate(&wrapped, false)
            .map_err(|e| ExtractionError::Evaluation(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn capture_network_log(&mut self) -> Result<Vec<NetworkExchange>> {
        let mut buffer = self
            .captured
            .lock()
            .map_err(|e| ExtractionError::Evaluation(format!("Capture buffer poisoned: {}", e)))?;
        for failure in buffer.failures.drain(..) {
            self.log.debug(&failure);
        }
        let exchanges = buffer.snapshot();
        drop(buffer);
        self.log.debug(&format!("Captured {} network exchanges", exchanges.len()));
        Ok(exchanges)
    }

    fn reset_network_log(&mut self) -> Result<()> {
        self.captured
            .lock()
            .map_err(|e| ExtractionError::Evaluation(format!("Capture buffer poisoned: {}", e)))?
            .clear();
        Ok(())
    }

    fn enter_frame(&mut self, frame: &NodePath) -> Result<()> {
        self.frames.push(frame.clone());
        // Cross-origin frames refuse evaluation; surface that now rather than mid-extraction.
        if let Err(e) = self.evaluate("document.readyState") {
            self.frames.pop();
            return Err(ExtractionError::Extraction(format!("Cannot enter frame at {}: {}", frame, e)));
        }
        Ok(())
    }

    fn leave_frame(&mut self) -> Result<()> {
        self.frames
            .pop()
            .map(|_| ())
            .ok_or_else(|| ExtractionError::Consistency("leave_frame called at top level".to_string()))
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn decode_body(body: &str, base64_encoded: bool) -> std::result::Result<String, base64::DecodeError> {
    if !base64_encoded {
        return Ok(body.to_string());
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(body)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn headers_to_map(value: Option<Value>) -> HashMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return HashMap::new();
    };
    map.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_base64_bodies() {
        assert_eq!(decode_body("body{}", false).unwrap(), "body{}");
        assert_eq!(decode_body("Ym9keXt9", true).unwrap(), "body{}");
        assert!(decode_body("***", true).is_err());
    }

    fn sent(url: &str, method: &str) -> SentRequest {
        SentRequest {
            url: url.to_string(),
            method: method.to_string(),
            ..SentRequest::default()
        }
    }

    #[test]
    fn test_responses_join_their_own_request() {
        let mut buffer = CaptureBuffer::default();
        let mut post = sent("https://api.test/items", "POST");
        post.body = Some("{\"q\":1}".to_string());
        post.headers.insert("content-type".to_string(), "application/json".to_string());
        buffer.request_sent("1".to_string(), post);
        buffer.request_sent("2".to_string(), sent("https://api.test/items", "GET"));

        buffer.response_received("2", "https://api.test/items", 200);
        buffer.response_received("1", "https://api.test/items", 201);

        let exchanges = buffer.snapshot();
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].method, "GET");
        assert_eq!(exchanges[0].status, Some(200));
        assert!(exchanges[0].request_body.is_none());
        assert_eq!(exchanges[1].method, "POST");
        assert_eq!(exchanges[1].status, Some(201));
        assert_eq!(exchanges[1].request_body.as_deref(), Some("{\"q\":1}"));
        assert_eq!(
            exchanges[1].request_headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_unanswered_requests_are_still_captured() {
        let mut buffer = CaptureBuffer::default();
        buffer.request_sent("7".to_string(), sent("https://stats.test/beacon", "POST"));
        buffer.response_received("9", "https://cdn.test/a.css", 200);

        let exchanges = buffer.snapshot();
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].url, "https://cdn.test/a.css");
        assert_eq!(exchanges[0].method, "GET");
        assert_eq!(exchanges[1].url, "https://stats.test/beacon");
        assert_eq!(exchanges[1].method, "POST");
        assert!(exchanges[1].status.is_none());

        buffer.clear();
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_redirect_hops_are_kept() {
        let mut buffer = CaptureBuffer::default();
        buffer.request_sent("3".to_string(), sent("http://site.test/", "GET"));
        buffer.request_sent("3".to_string(), sent("https://site.test/", "GET"));
        buffer.response_received("3", "https://site.test/", 200);

        let urls: Vec<_> = buffer.snapshot().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["http://site.test/", "https://site.test/"]);
    }

    #[test]
    fn test_headers_to_map() {
        let map = headers_to_map(Some(serde_json::json!({"content-type": "text/css", "content-length": 12})));
        assert_eq!(map.get("content-type").map(String::as_str), Some("text/css"));
        assert_eq!(map.get("content-length").map(String::as_str), Some("12"));
        assert!(headers_to_map(None).is_empty());
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_launch_and_evaluate() {
        let mut session = ChromeSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");
        session.navigate("data:text/html,<html><body><p>hi</p></body></html>").unwrap();
        assert!(session.wait_for_load(Duration::from_secs(5)).unwrap());
        let tree = session.snapshot_document(false).expect("Failed to snapshot");
        assert_eq!(tree.tag_name, "html");
    }
}
