use indexmap::IndexMap;

/// Map of selector text to the ids of the rules that use it
/// Uses IndexMap to preserve insertion order
#[derive(Debug, Clone, Default)]
pub struct SelectorIndex {
    map: IndexMap<String, Vec<String>>,
}

impl SelectorIndex {
    /// Create a new empty SelectorIndex
    pub fn new() -> Self {
        Self { map: IndexMap::new() }
    }

    /// Record that `rule_id` uses `selector`
    pub fn register(&mut self, selector: impl Into<String>, rule_id: impl Into<String>) {
        let rule_id = rule_id.into();
        let rules = self.map.entry(selector.into()).or_default();
        if !rules.contains(&rule_id) {
            rules.push(rule_id);
        }
    }

    /// Rule ids sharing `selector`
    pub fn get(&self, selector: &str) -> &[String] {
        self.map.get(selector).map(Vec::as_slice).unwrap_or_default()
    }

    /// Check if selector exists
    pub fn contains(&self, selector: &str) -> bool {
        self.map.contains_key(selector)
    }

    /// Drop `rule_id` from `selector`, removing the selector once no rule uses it
    pub fn remove_rule(&mut self, selector: &str, rule_id: &str) -> bool {
        let Some(rules) = self.map.get_mut(selector) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|r| r != rule_id);
        let removed = rules.len() != before;
        if rules.is_empty() {
            self.map.shift_remove(selector);
        }
        removed
    }

    /// Get the number of distinct selectors
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Clear all selectors
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Iterate over all (selector, rule ids) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.map.iter()
    }

    /// Get all selectors
    pub fn selectors(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    /// Export to JSON for debugging
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.map)
    }
}
