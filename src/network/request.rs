use crate::browser::NetworkExchange;
use crate::graph::NodeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed request/response pair of a [`NetworkRequest`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpMessage {
    pub timestamp: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    pub request_headers: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,

    pub response_headers: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

impl From<&NetworkExchange> for HttpMessage {
    fn from(exchange: &NetworkExchange) -> Self {
        Self {
            timestamp: exchange.timestamp,
            status: exchange.status,
            request_headers: exchange.request_headers.clone(),
            request_body: exchange.request_body.clone(),
            response_headers: exchange.response_headers.clone(),
            response_body: exchange.response_body.clone(),
        }
    }
}

/// A node causing a request, and the node created from its response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFlow {
    pub sender: NodeRef,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver: Option<NodeRef>,

    /// Backed by a captured exchange rather than only referenced
    pub realized: bool,
}

impl RequestFlow {
    pub fn new(sender: NodeRef, receiver: Option<NodeRef>, realized: bool) -> Self {
        Self {
            sender,
            receiver,
            realized,
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }
}

/// All traffic for one (URL, method) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub messages: Vec<HttpMessage>,
    pub flows: Vec<RequestFlow>,
}

impl NetworkRequest {
    pub fn new(id: impl Into<String>, url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: method.into(),
            messages: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: HttpMessage) {
        self.messages.push(message);
    }

    /// Record a flow; an identical flow is kept once
    pub fn add_flow(&mut self, flow: RequestFlow) -> bool {
        if self.flows.contains(&flow) {
            return false;
        }
        self.flows.push(flow);
        true
    }

    pub fn is_realized(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn has_flows(&self) -> bool {
        !self.flows.is_empty()
    }

    /// Last non-empty response body
    pub fn last_response_body(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter_map(|m| m.response_body.as_deref())
            .find(|body| !body.trim().is_empty())
    }

    pub fn has_response_body(&self, body: &str) -> bool {
        self.messages.iter().any(|m| m.response_body.as_deref() == Some(body))
    }
}
