//! Property tree (§4.M): a small recursive value type addressed by a dotted-path mini-language,
//! used to attach arbitrary user metadata to a calibration and to round-trip it through the YAML
//! codec (§4.N).
//!
//! Path grammar: a sequence of `{ .identifier | [index] | [index+] | [+] | {} | [] }` segments.
//! `.name` descends into a map key; `[n]` indexes a list; `[n+]` inserts-at/grows a list to index
//! `n`; `[+]` appends; `{}`/`[]` anchor an empty map/list as the path's final segment (used to
//! assert or create an empty container in place).

use crate::error::VnaError;
use std::collections::BTreeMap;
use std::fmt;

/// A property tree node: a scalar string, an ordered list, or a map keyed by identifier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PropertyNode {
    Scalar(String),
    List(Vec<PropertyNode>),
    Map(BTreeMap<String, PropertyNode>),
}

impl Default for PropertyNode {
    fn default() -> Self {
        PropertyNode::Map(BTreeMap::new())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    /// `[n+]`: grow the list to at least `n+1` elements, addressing index `n`.
    GrowIndex(usize),
    /// `[+]`: append a new element and address it.
    Append,
    EmptyMap,
    EmptyList,
}

/// Parses a property path into its segments.
fn parse_path(path: &str) -> Result<Vec<Segment>, VnaError> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'.' && bytes[j] != b'[' {
                    j += 1;
                }
                if j == start {
                    return Err(VnaError::syntax("property path: empty key after '.'"));
                }
                segments.push(Segment::Key(unescape_key(&path[start..j])?));
                i = j;
            }
            b'[' => {
                let close = path[i..]
                    .find(']')
                    .ok_or_else(|| VnaError::syntax("property path: unterminated '['"))?
                    + i;
                let inner = &path[i + 1..close];
                segments.push(match inner {
                    "" => Segment::EmptyList,
                    "+" => Segment::Append,
                    s if s.ends_with('+') => Segment::GrowIndex(
                        s[..s.len() - 1]
                            .parse()
                            .map_err(|_| VnaError::syntax("property path: bad '[n+]' index"))?,
                    ),
                    s => Segment::Index(
                        s.parse()
                            .map_err(|_| VnaError::syntax("property path: bad '[n]' index"))?,
                    ),
                });
                i = close + 1;
            }
            b'{' if path[i..].starts_with("{}") => {
                segments.push(Segment::EmptyMap);
                i += 2;
            }
            _ => {
                return Err(VnaError::syntax(format!(
                    "property path: unexpected character at offset {}",
                    i
                )))
            }
        }
    }
    Ok(segments)
}

/// Unescapes a `.key`'s backslash-escaped `.`, `[`, and `\` characters.
fn unescape_key(raw: &str) -> Result<String, VnaError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(esc @ ('.' | '[' | '\\')) => out.push(esc),
                _ => return Err(VnaError::syntax("property path: invalid escape in key")),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Escapes `.`, `[`, and `\` in a key so it can be safely embedded in a path.
pub fn quote_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, '.' | '[' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl PropertyNode {
    /// Reads the node at `path`, or `None` if any segment along the way does not exist.
    pub fn get(&self, path: &str) -> Result<Option<&PropertyNode>, VnaError> {
        let segments = parse_path(path)?;
        let mut node = self;
        for seg in &segments {
            node = match (seg, node) {
                (Segment::Key(k), PropertyNode::Map(m)) => match m.get(k) {
                    Some(n) => n,
                    None => return Ok(None),
                },
                (Segment::Index(i), PropertyNode::List(l)) => match l.get(*i) {
                    Some(n) => n,
                    None => return Ok(None),
                },
                (Segment::EmptyMap, PropertyNode::Map(_)) | (Segment::EmptyList, PropertyNode::List(_)) => node,
                _ => return Ok(None),
            };
        }
        Ok(Some(node))
    }

    /// Writes `value` at `path`, creating intermediate maps/lists as needed.
    pub fn set(&mut self, path: &str, value: PropertyNode) -> Result<(), VnaError> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            *self = value;
            return Ok(());
        }
        Self::set_rec(self, &segments, value)
    }

    fn set_rec(node: &mut PropertyNode, segments: &[Segment], value: PropertyNode) -> Result<(), VnaError> {
        let (head, rest) = segments.split_first().expect("non-empty");
        match head {
            Segment::Key(k) => {
                if !matches!(node, PropertyNode::Map(_)) {
                    *node = PropertyNode::Map(BTreeMap::new());
                }
                let PropertyNode::Map(m) = node else { unreachable!() };
                let entry = m.entry(k.clone()).or_insert_with(PropertyNode::default);
                if rest.is_empty() {
                    *entry = value;
                } else {
                    Self::set_rec(entry, rest, value)?;
                }
            }
            Segment::Index(i) => {
                let PropertyNode::List(l) = node else {
                    return Err(VnaError::usage("property path: '[n]' requires a list"));
                };
                let entry = l.get_mut(*i).ok_or_else(|| VnaError::usage("property path: list index out of range"))?;
                if rest.is_empty() {
                    *entry = value;
                } else {
                    Self::set_rec(entry, rest, value)?;
                }
            }
            Segment::GrowIndex(i) => {
                if !matches!(node, PropertyNode::List(_)) {
                    *node = PropertyNode::List(Vec::new());
                }
                let PropertyNode::List(l) = node else { unreachable!() };
                while l.len() <= *i {
                    l.push(PropertyNode::default());
                }
                if rest.is_empty() {
                    l[*i] = value;
                } else {
                    Self::set_rec(&mut l[*i], rest, value)?;
                }
            }
            Segment::Append => {
                if !matches!(node, PropertyNode::List(_)) {
                    *node = PropertyNode::List(Vec::new());
                }
                let PropertyNode::List(l) = node else { unreachable!() };
                l.push(PropertyNode::default());
                let idx = l.len() - 1;
                if rest.is_empty() {
                    l[idx] = value;
                } else {
                    Self::set_rec(&mut l[idx], rest, value)?;
                }
            }
            Segment::EmptyMap => {
                *node = PropertyNode::Map(BTreeMap::new());
            }
            Segment::EmptyList => {
                *node = PropertyNode::List(Vec::new());
            }
        }
        Ok(())
    }

    /// Deletes the value at `path`, returning it if present.
    pub fn delete(&mut self, path: &str) -> Result<Option<PropertyNode>, VnaError> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            return Ok(Some(std::mem::take(self)));
        }
        let (last, prefix) = segments.split_last().expect("non-empty");
        let mut node = self;
        for seg in prefix {
            node = match (seg, node) {
                (Segment::Key(k), PropertyNode::Map(m)) => match m.get_mut(k) {
                    Some(n) => n,
                    None => return Ok(None),
                },
                (Segment::Index(i), PropertyNode::List(l)) => match l.get_mut(*i) {
                    Some(n) => n,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }
        match (last, node) {
            (Segment::Key(k), PropertyNode::Map(m)) => Ok(m.remove(k)),
            (Segment::Index(i), PropertyNode::List(l)) => {
                if *i < l.len() {
                    Ok(Some(l.remove(*i)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }
}

impl fmt::Display for PropertyNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropertyNode::Scalar(s) => write!(f, "{}", s),
            PropertyNode::List(l) => write!(f, "[{} items]", l.len()),
            PropertyNode::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_scalar_through_nested_keys() {
        let mut root = PropertyNode::default();
        root.set(".operator.name", PropertyNode::Scalar("alice".into())).unwrap();
        let got = root.get(".operator.name").unwrap().unwrap();
        assert_eq!(got, &PropertyNode::Scalar("alice".into()));
    }

    #[test]
    fn append_and_index_list() {
        let mut root = PropertyNode::default();
        root.set(".tags[+]", PropertyNode::Scalar("a".into())).unwrap();
        root.set(".tags[+]", PropertyNode::Scalar("b".into())).unwrap();
        assert_eq!(root.get(".tags[0]").unwrap().unwrap(), &PropertyNode::Scalar("a".into()));
        assert_eq!(root.get(".tags[1]").unwrap().unwrap(), &PropertyNode::Scalar("b".into()));
    }

    #[test]
    fn grow_index_extends_list() {
        let mut root = PropertyNode::default();
        root.set(".xs[2+]", PropertyNode::Scalar("z".into())).unwrap();
        assert_eq!(root.get(".xs[2]").unwrap().unwrap(), &PropertyNode::Scalar("z".into()));
        assert_eq!(root.get(".xs[0]").unwrap().unwrap(), &PropertyNode::default());
    }

    #[test]
    fn delete_removes_key() {
        let mut root = PropertyNode::default();
        root.set(".k", PropertyNode::Scalar("v".into())).unwrap();
        let removed = root.delete(".k").unwrap();
        assert_eq!(removed, Some(PropertyNode::Scalar("v".into())));
        assert!(root.get(".k").unwrap().is_none());
    }

    #[test]
    fn quote_key_roundtrips_through_parse() {
        let mut root = PropertyNode::default();
        let key = quote_key("a.b[c");
        root.set(&format!(".{}", key), PropertyNode::Scalar("v".into())).unwrap();
        assert_eq!(root.get(&format!(".{}", key)).unwrap().unwrap(), &PropertyNode::Scalar("v".into()));
    }

    #[test]
    fn missing_path_returns_none_not_error() {
        let root = PropertyNode::default();
        assert_eq!(root.get(".nope.nested").unwrap(), None);
    }
}
