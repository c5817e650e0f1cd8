use crate::graph::NodeType;
use indexmap::IndexMap;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Script text embedded in the document
    Internal,
    /// Script loaded from a `src` URL
    External,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Internal => "internal",
            ScriptKind::External => "external",
        }
    }
}

/// What triggered a list of effects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Cause {
    /// The script ran as part of loading the page
    PageLoad,
    /// The script was invoked by another node
    Caller { id: String, kind: NodeType },
}

impl Cause {
    pub fn caller(id: impl Into<String>, kind: NodeType) -> Self {
        Cause::Caller { id: id.into(), kind }
    }
}

/// One structural change a script made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub target: String,

    pub target_kind: NodeType,

    /// `create`, `delete` or `change`
    pub operation: String,

    /// Attribute list for creates, attribute deltas for changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<String>>,
}

impl Effect {
    pub fn new(target: impl Into<String>, target_kind: NodeType, operation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            target_kind,
            operation: operation.into(),
            changes: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = (!changes.is_empty()).then_some(changes);
        self
    }
}

/// One internal or external script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBlock {
    pub id: String,

    pub kind: ScriptKind,

    /// Resolved URL for external scripts
    pub src: Option<String>,

    pub content: String,

    pub is_async: bool,

    pub is_defer: bool,

    /// The `<script>` element
    pub owner: Option<String>,

    /// Effects per cause, in the order they were observed
    #[serde(serialize_with = "serialize_interaction", skip_deserializing)]
    pub interaction: IndexMap<Cause, Vec<Effect>>,

    pub deleted: bool,
}

impl ScriptBlock {
    pub fn new(id: impl Into<String>, kind: ScriptKind) -> Self {
        let mut interaction = IndexMap::new();
        interaction.insert(Cause::PageLoad, Vec::new());
        Self {
            id: id.into(),
            kind,
            src: None,
            content: String::new(),
            is_async: false,
            is_defer: false,
            owner: None,
            interaction,
            deleted: false,
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn is_external(&self) -> bool {
        self.kind == ScriptKind::External
    }

    /// Append an effect observed while the page loaded
    pub fn add_page_load_effect(&mut self, effect: Effect) {
        self.interaction.entry(Cause::PageLoad).or_default().push(effect);
    }

    /// Replace the effects recorded for `cause`
    pub fn add_interaction(&mut self, cause: Cause, effects: Vec<Effect>) {
        self.interaction.insert(cause, effects);
    }

    pub fn page_load_effects(&self) -> &[Effect] {
        self.interaction.get(&Cause::PageLoad).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn effect_count(&self) -> usize {
        self.interaction.values().map(Vec::len).sum()
    }
}

/// Structured map keys are not JSON object keys; write the map as `[{cause, effects}]`
fn serialize_interaction<S: Serializer>(
    interaction: &IndexMap<Cause, Vec<Effect>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        cause: &'a Cause,
        effects: &'a [Effect],
    }

    let mut seq = serializer.serialize_seq(Some(interaction.len()))?;
    for (cause, effects) in interaction {
        seq.serialize_element(&Entry { cause, effects })?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_has_page_load_cause() {
        let block = ScriptBlock::new("s1", ScriptKind::Internal);
        assert!(block.interaction.contains_key(&Cause::PageLoad));
        assert!(block.page_load_effects().is_empty());
    }

    #[test]
    fn test_effects_keep_order() {
        let mut block = ScriptBlock::new("s1", ScriptKind::External).with_src("https://e.com/a.js");
        block.add_page_load_effect(Effect::new("e1", NodeType::Markup, "create").with_changes(vec!["id::x".into()]));
        block.add_page_load_effect(Effect::new("e2", NodeType::Markup, "delete").with_changes(Vec::new()));
        block.add_interaction(Cause::caller("b1", NodeType::Markup), vec![Effect::new("e3", NodeType::Markup, "change")]);

        let ops: Vec<_> = block.page_load_effects().iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(ops, vec!["create", "delete"]);
        assert!(block.page_load_effects()[1].changes.is_none());
        assert_eq!(block.effect_count(), 3);
    }

    #[test]
    fn test_interaction_serializes_as_list() {
        let mut block = ScriptBlock::new("s1", ScriptKind::Internal);
        block.add_page_load_effect(Effect::new("e1", NodeType::Markup, "create"));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["interaction"][0]["cause"]["type"], "pageLoad");
        assert_eq!(json["interaction"][0]["effects"][0]["target"], "e1");
    }
}
