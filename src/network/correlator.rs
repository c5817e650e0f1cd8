use crate::browser::NetworkExchange;
use crate::dom::DomSnapshotExtractor;
use crate::events::SharedLog;
use crate::graph::{NodeRef, NodeType};
use crate::network::request::{HttpMessage, NetworkRequest, RequestFlow};
use crate::script::ScriptExtractor;
use crate::style::StyleExtractor;
use indexmap::IndexMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Network layer of one frame: requests deduplicated by (URL, method) and bound to the nodes
/// that cause them
pub struct NetworkCorrelator {
    requests: IndexMap<String, NetworkRequest>,

    /// (URL, upper-case method) to request id
    by_key: HashMap<(String, String), String>,

    /// Requests backed by a captured exchange
    realized: Vec<String>,

    /// Requests synthesized from a reference but never captured
    potential: Vec<String>,

    log: SharedLog,
}

fn key(url: &str, method: &str) -> (String, String) {
    (url.to_string(), method.to_ascii_uppercase())
}

impl NetworkCorrelator {
    pub fn new(log: SharedLog) -> Self {
        Self {
            requests: IndexMap::new(),
            by_key: HashMap::new(),
            realized: Vec::new(),
            potential: Vec::new(),
            log,
        }
    }

    /// Merge captured exchanges into the request records.
    ///
    /// Returns the ids of the requests the capture touched, in first-seen order.
    pub fn process_capture(&mut self, exchanges: &[NetworkExchange]) -> Vec<String> {
        let mut touched: Vec<String> = Vec::new();
        for exchange in exchanges {
            let method = if exchange.method.is_empty() { "GET" } else { exchange.method.as_str() };
            let id = match self.by_key.get(&key(&exchange.url, method)) {
                Some(id) => id.clone(),
                None => self.insert(&exchange.url, method),
            };

            if let Some(request) = self.requests.get_mut(&id) {
                request.add_message(HttpMessage::from(exchange));
            }
            self.mark_realized(&id);
            if !touched.contains(&id) {
                touched.push(id);
            }
        }
        self.log.debug(&format!(
            "Processed {} exchanges into {} requests",
            exchanges.len(),
            touched.len()
        ));
        touched
    }

    fn insert(&mut self, url: &str, method: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let (url_key, method_key) = key(url, method);
        self.requests
            .insert(id.clone(), NetworkRequest::new(id.clone(), url_key.clone(), method_key.clone()));
        self.by_key.insert((url_key, method_key), id.clone());
        id
    }

    /// Move `id` into the realized registry
    fn mark_realized(&mut self, id: &str) {
        self.potential.retain(|p| p != id);
        if !self.realized.iter().any(|r| r == id) {
            self.realized.push(id.to_string());
        }
    }

    /// A request for a reference nothing has fetched yet
    fn synthesize(&mut self, url: &str, method: &str) -> String {
        let id = self.insert(url, method);
        self.potential.push(id.clone());
        id
    }

    /// Bind an active reference: the request is looked up or synthesized, and the flow is
    /// realized exactly when the request was captured
    pub fn bind(&mut self, url: &str, method: &str, sender: NodeRef, receiver: Option<NodeRef>) -> String {
        let id = match self.by_key.get(&key(url, method)) {
            Some(id) => id.clone(),
            None => self.synthesize(url, method),
        };
        if let Some(request) = self.requests.get_mut(&id) {
            let realized = request.is_realized();
            request.add_flow(RequestFlow::new(sender, receiver, realized));
        }
        id
    }

    /// Bind a hyperlink or form target; these never carry a receiver and are never realized
    pub fn bind_passive(&mut self, url: &str, method: &str, sender: NodeRef) -> String {
        let id = match self.by_key.get(&key(url, method)) {
            Some(id) => id.clone(),
            None => self.synthesize(url, method),
        };
        if let Some(request) = self.requests.get_mut(&id) {
            request.add_flow(RequestFlow::new(sender, None, false));
        }
        id
    }

    /// Attribute the requests captured during one script step to the script.
    ///
    /// The script's own source is skipped. Returns the number of flows added.
    pub fn bind_step_requests(&mut self, ids: &[String], script_id: &str, script_src: Option<&str>) -> usize {
        let mut bound = 0;
        for id in ids {
            let Some(request) = self.requests.get_mut(id) else {
                self.log.warn(&format!("Captured request {} is not stored", id));
                continue;
            };
            if script_src == Some(request.url.as_str()) {
                continue;
            }
            if request.add_flow(RequestFlow::new(NodeRef::new(script_id, NodeType::Script), None, true)) {
                bound += 1;
            }
        }
        bound
    }

    /// Feed captured bodies back to external blocks whose own fetch came back empty or wrong.
    ///
    /// Returns the number of blocks corrected.
    pub fn content_correction(&self, style: Option<&mut StyleExtractor>, script: Option<&mut ScriptExtractor>) -> usize {
        let mut corrected = 0;

        if let Some(style) = style {
            let external: Vec<(String, String)> = style
                .external_blocks()
                .iter()
                .filter_map(|b| b.src.clone().map(|src| (b.id.clone(), src)))
                .collect();
            for (block_id, src) in external {
                let Some(body) = self.find(&src, "GET").and_then(NetworkRequest::last_response_body) else {
                    continue;
                };
                match style.correct_external_content(&block_id, body) {
                    Ok(true) => corrected += 1,
                    Ok(false) => {}
                    Err(e) => self.log.warn(&e.to_string()),
                }
            }
        }

        if let Some(script) = script {
            let links: Vec<String> = script.external_links().cloned().collect();
            for url in links {
                if let Some(body) = self.find(&url, "GET").and_then(NetworkRequest::last_response_body) {
                    corrected += script.correct_external_content(&url, body);
                }
            }
        }
        corrected
    }

    /// Bind every outbound reference of the extracted layers, in order: external stylesheets,
    /// style rules with links, external scripts, active element references, passive element
    /// references
    pub fn element_matching(
        &mut self,
        dom: Option<&DomSnapshotExtractor>,
        style: Option<&StyleExtractor>,
        script: Option<&ScriptExtractor>,
    ) {
        let with_markup = dom.is_some();

        if let Some(style) = style {
            for block in style.external_blocks() {
                let Some(src) = &block.src else {
                    continue;
                };
                let receiver = NodeRef::new(block.id.clone(), NodeType::StyleBlock);
                let sender = match (&block.owner, with_markup) {
                    (Some(owner), true) => NodeRef::markup(owner.clone()),
                    _ => receiver.clone(),
                };
                self.bind(src, "GET", sender, Some(receiver));
            }

            for rule in style.rules_with_links() {
                for link in &rule.links {
                    self.bind(link, "GET", NodeRef::new(rule.id.clone(), NodeType::StyleRule), None);
                }
            }
        }

        if let Some(script) = script {
            for block in script.live_blocks().filter(|b| b.is_external()) {
                let Some(src) = &block.src else {
                    continue;
                };
                let receiver = NodeRef::new(block.id.clone(), NodeType::Script);
                let sender = match (&block.owner, with_markup) {
                    (Some(owner), true) => NodeRef::markup(owner.clone()),
                    _ => receiver.clone(),
                };
                self.bind(src, "GET", sender, Some(receiver));
            }
        }

        let Some(dom) = dom else {
            return;
        };
        for element in dom.live_elements() {
            if (element.is_script() && script.is_some()) || (element.is_style_bearing() && style.is_some()) {
                continue;
            }
            let receiver = element
                .related_frame_id
                .as_ref()
                .map(|frame| NodeRef::new(frame.clone(), NodeType::FrameReference));
            for request in &element.active_requests {
                self.bind(&request.url, &request.method, NodeRef::markup(element.id.clone()), receiver.clone());
            }
        }
        for element in dom.live_elements() {
            for request in &element.passive_requests {
                self.bind_passive(&request.url, &request.method, NodeRef::markup(element.id.clone()));
            }
        }

        self.log.info(&format!(
            "Bound network requests: {} realized, {} potential, {} without flows",
            self.realized.len(),
            self.potential.len(),
            self.requests_without_flows().len()
        ));
    }

    pub fn get(&self, id: &str) -> Option<&NetworkRequest> {
        self.requests.get(id)
    }

    pub fn find(&self, url: &str, method: &str) -> Option<&NetworkRequest> {
        self.by_key.get(&key(url, method)).and_then(|id| self.requests.get(id))
    }

    /// Requests to `url` with any method
    pub fn find_by_url(&self, url: &str) -> Vec<&NetworkRequest> {
        self.requests.values().filter(|r| r.url == url).collect()
    }

    /// The request for (`url`, `method`) if one of its responses carried exactly `body`
    pub fn find_with_body(&self, url: &str, method: &str, body: &str) -> Option<&NetworkRequest> {
        self.find(url, method).filter(|r| r.has_response_body(body))
    }

    pub fn all_requests(&self) -> impl Iterator<Item = &NetworkRequest> {
        self.requests.values()
    }

    pub fn realized_requests(&self) -> Vec<&NetworkRequest> {
        self.realized.iter().filter_map(|id| self.requests.get(id)).collect()
    }

    pub fn potential_requests(&self) -> Vec<&NetworkRequest> {
        self.potential.iter().filter_map(|id| self.requests.get(id)).collect()
    }

    /// Captured requests never attributed to any node
    pub fn requests_without_flows(&self) -> Vec<&NetworkRequest> {
        self.requests.values().filter(|r| !r.has_flows()).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;

    fn exchange(url: &str, method: &str) -> NetworkExchange {
        NetworkExchange::new(url, method).with_status(200)
    }

    #[test]
    fn test_deduplication_by_url_and_method() {
        let mut network = NetworkCorrelator::new(MemoryLog::new());
        let touched = network.process_capture(&[
            exchange("https://e.com/a", "GET"),
            exchange("https://e.com/a", "get"),
            exchange("https://e.com/a", "POST"),
            exchange("https://e.com/b", "GET"),
            exchange("https://e.com/a", "GET"),
        ]);

        assert_eq!(touched.len(), 3);
        assert_eq!(network.len(), 3);
        assert_eq!(network.find("https://e.com/a", "GET").unwrap().messages.len(), 3);
        assert_eq!(network.find("https://e.com/a", "POST").unwrap().messages.len(), 1);
        assert_eq!(network.find_by_url("https://e.com/a").len(), 2);
        assert_eq!(network.realized_requests().len(), 3);
        assert_eq!(network.requests_without_flows().len(), 3);
    }

    #[test]
    fn test_unseen_reference_is_potential_until_captured() {
        let mut network = NetworkCorrelator::new(MemoryLog::new());
        let id = network.bind("https://e.com/img.png", "GET", NodeRef::markup("img"), None);
        assert_eq!(network.potential_requests().len(), 1);
        assert!(!network.get(&id).unwrap().flows[0].realized);

        let touched = network.process_capture(&[exchange("https://e.com/img.png", "GET")]);
        assert_eq!(touched, vec![id.clone()]);
        assert!(network.potential_requests().is_empty());
        assert_eq!(network.realized_requests().len(), 1);

        network.bind("https://e.com/img.png", "GET", NodeRef::markup("img2"), None);
        assert!(network.get(&id).unwrap().flows[1].realized);
    }

    #[test]
    fn test_passive_flows() {
        let mut network = NetworkCorrelator::new(MemoryLog::new());
        network.process_capture(&[exchange("https://e.com/next", "GET")]);
        let id = network.bind_passive("https://e.com/next", "GET", NodeRef::markup("a"));

        let flow = &network.get(&id).unwrap().flows[0];
        assert!(!flow.realized);
        assert!(!flow.has_receiver());
    }

    #[test]
    fn test_step_binding_skips_script_source() {
        let mut network = NetworkCorrelator::new(MemoryLog::new());
        let ids = network.process_capture(&[exchange("https://e.com/app.js", "GET"), exchange("https://e.com/api", "POST")]);

        let bound = network.bind_step_requests(&ids, "s1", Some("https://e.com/app.js"));
        assert_eq!(bound, 1);
        assert!(!network.find("https://e.com/app.js", "GET").unwrap().has_flows());
        let api = network.find("https://e.com/api", "POST").unwrap();
        assert_eq!(api.flows[0].sender, NodeRef::new("s1", NodeType::Script));
        assert!(api.flows[0].realized);
    }

    #[test]
    fn test_find_with_body() {
        let mut network = NetworkCorrelator::new(MemoryLog::new());
        network.process_capture(&[exchange("https://e.com/a", "GET").with_response_body("one")]);
        assert!(network.find_with_body("https://e.com/a", "GET", "one").is_some());
        assert!(network.find_with_body("https://e.com/a", "GET", "two").is_none());
    }
}
