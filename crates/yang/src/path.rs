//! XPath-compatible path expressions over data trees.
//!
//! The dialect is the instance-identifier subset NETCONF actually uses:
//! absolute paths of child steps, each optionally module-qualified and
//! carrying key predicates, e.g.
//! `/ietf-interfaces:interfaces/interface[name='eth0']/enabled`.

use std::fmt;

use crate::tree::{entry_matches_keys, DataNode};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path must be absolute (start with '/'): {0}")]
    NotAbsolute(String),

    #[error("empty step in path: {0}")]
    EmptyStep(String),

    #[error("malformed predicate in step `{0}`")]
    BadPredicate(String),
}

/// One step of a path: optional module prefix, node name, and zero or
/// more `[key='value']` predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub module: Option<String>,
    pub name: String,
    pub keys: Vec<(String, String)>,
}

/// A parsed absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub steps: Vec<Step>,
}

impl Path {
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let text = text.trim();
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| PathError::NotAbsolute(text.to_string()))?;

        let mut steps = Vec::new();
        for raw in split_steps(rest) {
            if raw.is_empty() {
                return Err(PathError::EmptyStep(text.to_string()));
            }
            steps.push(parse_step(&raw)?);
        }
        Ok(Path { steps })
    }

    /// Select every node the path addresses within `root`'s subtree.
    /// The first step must match `root` itself.
    pub fn select<'a>(&'a self, root: &'a DataNode) -> Vec<&'a DataNode> {
        let Some(first) = self.steps.first() else {
            return vec![root];
        };
        if root.name != first.name || !entry_matches_keys(root, &first.keys) {
            return Vec::new();
        }
        let mut current = vec![root];
        for step in &self.steps[1..] {
            let mut next = Vec::new();
            for node in current {
                for child in node.children_named(&step.name) {
                    if entry_matches_keys(child, &step.keys) {
                        next.push(child);
                    }
                }
            }
            current = next;
        }
        current
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "/")?;
            if let Some(module) = &step.module {
                write!(f, "{module}:")?;
            }
            write!(f, "{}", step.name)?;
            for (k, v) in &step.keys {
                write!(f, "[{k}='{v}']")?;
            }
        }
        Ok(())
    }
}

/// Split on `/` outside predicates. Quotes inside predicates may contain
/// slashes (`[destination='0.0.0.0/0']`).
fn split_steps(rest: &str) -> Vec<String> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut cur = String::new();
    for c in rest.chars() {
        match c {
            '\'' | '"' => {
                match quote {
                    Some(q) if q == c => quote = None,
                    None => quote = Some(c),
                    _ => {}
                }
                cur.push(c);
            }
            '[' if quote.is_none() => {
                depth += 1;
                cur.push(c);
            }
            ']' if quote.is_none() => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            '/' if depth == 0 && quote.is_none() => {
                steps.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    steps.push(cur);
    steps
}

fn parse_step(raw: &str) -> Result<Step, PathError> {
    let (head, predicates) = match raw.find('[') {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    };

    let (module, name) = match head.split_once(':') {
        Some((m, n)) => (Some(m.to_string()), n.to_string()),
        None => (None, head.to_string()),
    };
    if name.is_empty() {
        return Err(PathError::EmptyStep(raw.to_string()));
    }

    let mut keys = Vec::new();
    let mut rest = predicates;
    while !rest.is_empty() {
        let inner_end = rest
            .find(']')
            .ok_or_else(|| PathError::BadPredicate(raw.to_string()))?;
        let inner = &rest[1..inner_end];
        let (k, v) = inner
            .split_once('=')
            .ok_or_else(|| PathError::BadPredicate(raw.to_string()))?;
        let v = v.trim();
        let v = v
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| v.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .ok_or_else(|| PathError::BadPredicate(raw.to_string()))?;
        keys.push((k.trim().to_string(), v.to_string()));
        rest = &rest[inner_end + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(PathError::BadPredicate(raw.to_string()));
        }
    }

    Ok(Step { module, name, keys })
}
