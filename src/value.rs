use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The two collection shapes a file can hold at any level of nesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollKind {
    Map,
    Seq,
}

impl CollKind {
    pub fn label(&self) -> &'static str {
        match self {
            CollKind::Map => "map",
            CollKind::Seq => "sequence",
        }
    }
}

/// A detached value tree.
///
/// `Node` is what goes in on `put` and what comes back out of `export` and
/// `delete`: plain owned data with no ties to any file. Scalars are byte
/// strings; maps and sequences may carry an optional class tag that is
/// stored and restored when the database is opened with `autobless`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Null,
    Scalar(Vec<u8>),
    Map {
        entries: BTreeMap<Vec<u8>, Node>,
        class: Option<Vec<u8>>,
    },
    Seq {
        items: Vec<Node>,
        class: Option<Vec<u8>>,
    },
}

impl Node {
    pub fn scalar(bytes: impl Into<Vec<u8>>) -> Self {
        Node::Scalar(bytes.into())
    }

    /// Builds a map node out of anything iterable as key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Node>,
        I: IntoIterator<Item = (K, V)>,
    {
        Node::Map {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            class: None,
        }
    }

    pub fn seq<V, I>(items: I) -> Self
    where
        V: Into<Node>,
        I: IntoIterator<Item = V>,
    {
        Node::Seq {
            items: items.into_iter().map(Into::into).collect(),
            class: None,
        }
    }

    pub fn with_class(self, class: impl Into<Vec<u8>>) -> Self {
        match self {
            Node::Map { entries, .. } => Node::Map {
                entries,
                class: Some(class.into()),
            },
            Node::Seq { items, .. } => Node::Seq {
                items,
                class: Some(class.into()),
            },
            other => other,
        }
    }

    pub fn as_scalar(&self) -> Option<&[u8]> {
        match self {
            Node::Scalar(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn class(&self) -> Option<&[u8]> {
        match self {
            Node::Map { class, .. } | Node::Seq { class, .. } => class.as_deref(),
            _ => None,
        }
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::Null
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Scalar(value.as_bytes().to_vec())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Scalar(value.into_bytes())
    }
}

impl From<&[u8]> for Node {
    fn from(value: &[u8]) -> Self {
        Node::Scalar(value.to_vec())
    }
}

impl From<Vec<u8>> for Node {
    fn from(value: Vec<u8>) -> Self {
        Node::Scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let node = Node::map([("a", Node::seq(["1", "2"])), ("b", Node::from("x"))]);

        let Node::Map { entries, class } = &node else {
            panic!("expected a map");
        };

        assert!(class.is_none());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&b"b"[..].to_vec()].as_scalar(), Some(&b"x"[..]));
    }

    #[test]
    fn class_tag_sticks_to_collections_only() {
        let tagged = Node::seq(["1"]).with_class("Acme::List");
        assert_eq!(tagged.class(), Some(&b"Acme::List"[..]));

        let scalar = Node::scalar("x").with_class("Acme::List");
        assert_eq!(scalar.class(), None);
    }
}
