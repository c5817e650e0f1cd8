use crate::error::{ExtractionError, Result};
use serde::{Deserialize, Serialize};

/// Selects which layers of the page are extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Element records (required by frames and selector matching)
    pub markup: bool,

    /// Inline, internal and external style blocks
    pub style: bool,

    /// Script blocks and the mutation-tracking loop
    pub script: bool,

    /// Captured network exchanges and their bindings
    pub network: bool,

    /// Recursion into child frames
    pub frames: bool,

    /// Shadow-attached subtrees
    pub shadow_dom: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            markup: true,
            style: true,
            script: true,
            network: true,
            frames: true,
            shadow_dom: false,
        }
    }
}

impl ExtractionOptions {
    /// Every layer switched off
    pub fn none() -> Self {
        Self {
            markup: false,
            style: false,
            script: false,
            network: false,
            frames: false,
            shadow_dom: false,
        }
    }

    /// Every layer switched on, shadow DOM included
    pub fn all() -> Self {
        Self {
            shadow_dom: true,
            ..Self::default()
        }
    }

    pub fn with_markup(mut self, on: bool) -> Self {
        self.markup = on;
        self
    }

    pub fn with_style(mut self, on: bool) -> Self {
        self.style = on;
        self
    }

    pub fn with_script(mut self, on: bool) -> Self {
        self.script = on;
        self
    }

    pub fn with_network(mut self, on: bool) -> Self {
        self.network = on;
        self
    }

    pub fn with_frames(mut self, on: bool) -> Self {
        self.frames = on;
        self
    }

    pub fn with_shadow_dom(mut self, on: bool) -> Self {
        self.shadow_dom = on;
        self
    }

    /// Reject combinations the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.frames && !self.markup {
            return Err(ExtractionError::Configuration(
                "Need markup extraction before frames".to_string(),
            ));
        }
        Ok(())
    }

    /// Selector matching needs both element records and rules
    pub fn matches_selectors(&self) -> bool {
        self.markup && self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layers() {
        let options = ExtractionOptions::default();
        assert!(options.markup && options.style && options.script && options.network && options.frames);
        assert!(!options.shadow_dom);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_frames_require_markup() {
        let options = ExtractionOptions::default().with_markup(false);
        let err = options.validate().unwrap_err();
        assert!(matches!(err, ExtractionError::Configuration(_)));

        let options = options.with_frames(false);
        assert!(options.validate().is_ok());
        assert!(!options.matches_selectors());
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let options: ExtractionOptions = serde_json::from_str(r#"{"shadow_dom": true, "network": false}"#).unwrap();
        assert!(options.shadow_dom);
        assert!(!options.network);
        assert!(options.markup);
    }
}
