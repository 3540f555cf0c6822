//! Element path expressions used by plugin match predicates
//!
//! A small subset of XPath:
//! - `/A/B` starts at the root, which must be named `A`
//! - `A/B` starts at the children of the root
//! - `//A/B` finds `A` anywhere in the tree
//!
//! Namespace prefixes are ignored and `*` matches any name.

use super::Element;
use chaski_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Root,
    Children,
    Anywhere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Any,
    Name(String),
}

impl Step {
    fn matches(&self, element: &Element) -> bool {
        match self {
            Step::Any => true,
            Step::Name(name) => element.name == *name,
        }
    }
}

/// Compiled path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    anchor: Anchor,
    steps: Vec<Step>,
}

impl PathExpr {
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        let (anchor, rest) = if let Some(rest) = trimmed.strip_prefix("//") {
            (Anchor::Anywhere, rest)
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            (Anchor::Root, rest)
        } else {
            (Anchor::Children, trimmed)
        };

        let mut steps = Vec::new();
        for part in rest.split('/') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Config(format!("Invalid path expression: {:?}", source)));
            }
            // Prefixes are not resolved: every element lives in one namespace
            let local = part.rsplit_once(':').map(|(_, l)| l).unwrap_or(part);
            steps.push(match local {
                "*" => Step::Any,
                name if name.is_empty() => {
                    return Err(Error::Config(format!(
                        "Invalid path expression: {:?}",
                        source
                    )))
                }
                name => Step::Name(name.to_string()),
            });
        }

        Ok(Self {
            source: trimmed.to_string(),
            anchor,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every element the path selects, in document order
    pub fn select<'a>(&self, root: &'a Element) -> Vec<&'a Element> {
        let Some((first, rest)) = self.steps.split_first() else {
            return Vec::new();
        };

        let mut current: Vec<&'a Element> = match self.anchor {
            Anchor::Root => {
                if first.matches(root) {
                    vec![root]
                } else {
                    Vec::new()
                }
            }
            Anchor::Children => root.children.iter().filter(|c| first.matches(c)).collect(),
            Anchor::Anywhere => {
                let mut found = Vec::new();
                collect_descendants(root, first, &mut found);
                found
            }
        };

        for step in rest {
            current = current
                .into_iter()
                .flat_map(|e| e.children.iter().filter(|c| step.matches(c)))
                .collect();
        }

        current
    }

    /// Whether at least one element matches
    pub fn exists(&self, root: &Element) -> bool {
        !self.select(root).is_empty()
    }
}

fn collect_descendants<'a>(element: &'a Element, step: &Step, found: &mut Vec<&'a Element>) {
    if step.matches(element) {
        found.push(element);
    }
    for child in &element.children {
        collect_descendants(child, step, found);
    }
}

impl std::str::FromStr for PathExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
