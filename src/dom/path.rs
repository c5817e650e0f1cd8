use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker used in paths for a shadow-root hop
pub const SHADOW_ROOT: &str = "shadowRoot";

/// One hop of a positional path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    Child(usize),
    ShadowRoot,
}

/// Positional address of a node, rooted at the document element (`0`).
///
/// Rendered as `0>2>shadowRoot>1`. The root itself has no steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    steps: Vec<PathStep>,
}

impl NodePath {
    /// Path of the document element
    pub fn root() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Path extended by one child index
    pub fn child(&self, index: usize) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::Child(index));
        Self { steps }
    }

    /// Path extended by a shadow-root hop
    pub fn shadow_root(&self) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::ShadowRoot);
        Self { steps }
    }

    /// Split into the parent path and the last hop
    pub fn split_last(&self) -> Option<(NodePath, PathStep)> {
        let (last, rest) = self.steps.split_last()?;
        Some((Self { steps: rest.to_vec() }, *last))
    }

    pub fn crosses_shadow_root(&self) -> bool {
        self.steps.contains(&PathStep::ShadowRoot)
    }

    pub fn ends_in_shadow_root(&self) -> bool {
        self.steps.last() == Some(&PathStep::ShadowRoot)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0")?;
        for step in &self.steps {
            match step {
                PathStep::Child(i) => write!(f, ">{}", i)?,
                PathStep::ShadowRoot => write!(f, ">{}", SHADOW_ROOT)?,
            }
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('>');
        match parts.next() {
            Some("0") => {}
            _ => return Err(format!("Path must start at the document element: {}", s)),
        }

        let mut steps = Vec::new();
        for part in parts {
            if part == SHADOW_ROOT {
                steps.push(PathStep::ShadowRoot);
            } else {
                let index = part
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid path segment '{}' in {}", part, s))?;
                steps.push(PathStep::Child(index));
            }
        }
        Ok(Self { steps })
    }
}

impl TryFrom<String> for NodePath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path: NodePath = "0>1>shadowRoot>2".parse().unwrap();
        assert_eq!(path.steps(), &[PathStep::Child(1), PathStep::ShadowRoot, PathStep::Child(2)]);
        assert_eq!(path.to_string(), "0>1>shadowRoot>2");
        assert!(path.crosses_shadow_root());
        assert!(!path.ends_in_shadow_root());
    }

    #[test]
    fn test_root_path() {
        let root: NodePath = "0".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "0");
        assert!(root.split_last().is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("1>2".parse::<NodePath>().is_err());
        assert!("0>x".parse::<NodePath>().is_err());
        assert!("".parse::<NodePath>().is_err());
    }

    #[test]
    fn test_split_last_and_builders() {
        let path = NodePath::root().child(1).shadow_root();
        let (parent, last) = path.split_last().unwrap();
        assert_eq!(parent, NodePath::root().child(1));
        assert_eq!(last, PathStep::ShadowRoot);
        assert!(path.ends_in_shadow_root());
    }

    #[test]
    fn test_serde_as_string() {
        let path: NodePath = serde_json::from_str("\"0>3>0\"").unwrap();
        assert_eq!(path.depth(), 2);
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"0>3>0\"");
    }
}
