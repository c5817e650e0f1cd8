use serde::{Deserialize, Serialize};

/// Where a style block came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleOrigin {
    /// The `style` attribute of an element
    Inline,
    /// A `<style>` element
    Internal,
    /// A stylesheet fetched through `<link rel=stylesheet>`
    External,
}

impl StyleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleOrigin::Inline => "inline",
            StyleOrigin::Internal => "internal",
            StyleOrigin::External => "external",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Style,
    Charset,
    Import,
    Media,
    FontFace,
    Page,
    Unknown,
}

impl RuleKind {
    /// Kind of an at-rule from its keyword, without the `@`
    pub fn from_at_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_lowercase().as_str() {
            "charset" => RuleKind::Charset,
            "import" => RuleKind::Import,
            "media" => RuleKind::Media,
            "font-face" => RuleKind::FontFace,
            "page" => RuleKind::Page,
            _ => RuleKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Style => "style",
            RuleKind::Charset => "charset",
            RuleKind::Import => "import",
            RuleKind::Media => "media",
            RuleKind::FontFace => "font-face",
            RuleKind::Page => "page",
            RuleKind::Unknown => "unknown",
        }
    }
}

/// One inline, internal or external stylesheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleBlock {
    pub id: String,

    pub origin: StyleOrigin,

    /// Element carrying the attribute, `<style>` or `<link>`
    pub owner: Option<String>,

    /// Stylesheet URL for external blocks
    pub src: Option<String>,

    /// URL that relative references inside the block resolve against
    pub base_url: String,

    /// Unparsed text
    pub content: String,

    pub rules: Vec<String>,

    pub deleted: bool,
}

impl StyleBlock {
    pub fn new(id: impl Into<String>, origin: StyleOrigin, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin,
            owner: None,
            src: None,
            base_url: base_url.into(),
            content: String::new(),
            rules: Vec::new(),
            deleted: false,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn is_external(&self) -> bool {
        self.origin == StyleOrigin::External
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRule {
    pub id: String,

    /// Owning block
    pub block: String,

    pub kind: RuleKind,

    /// Selector text; only style rules have one, and the inline rule's is empty
    pub selector: Option<String>,

    pub text: String,

    /// Absolute URLs referenced through `url(...)` or `@import`
    pub links: Vec<String>,

    /// Element ids the selector currently matches
    pub applies_to: Vec<String>,

    pub deleted: bool,
}

impl StyleRule {
    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn is_style(&self) -> bool {
        self.kind == RuleKind::Style
    }
}
