use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Formatting properties of a node, keyed by property path.
///
/// Keys follow the flattened property encoding of the package reader:
/// `b`, `sz`, `spacing@after`, `numPr/ilvl`, `gridCol#1@w`. Order matters for
/// serialization (schema element order) but not for equality.
pub type Format = IndexMap<String, String>;

/// Document-unique node identifier. Allocated from a monotonic counter and
/// never reused within a document's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The body root every document owns.
    pub const ROOT: NodeId = NodeId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Root container of top-level blocks. Exactly one per document.
    Body,
    Paragraph,
    Run,
    Table,
    TableRow,
    TableCell,
    SectionBreak,
}

impl NodeKind {
    /// Whether a node of this kind may directly contain `child`.
    pub fn accepts(self, child: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            Body => matches!(child, Paragraph | Table | SectionBreak),
            Paragraph => child == Run,
            Table => child == TableRow,
            TableRow => child == TableCell,
            TableCell => matches!(child, Paragraph | Table),
            Run | SectionBreak => false,
        }
    }

    /// Kinds that may appear at the top level of the body.
    pub fn is_block(self) -> bool {
        matches!(self, NodeKind::Paragraph | NodeKind::Table | NodeKind::SectionBreak)
    }
}

/// A node stored in the document arena. Relationships are ids, never pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Run text. Always empty for other kinds.
    pub text: String,
    pub format: Format,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            id,
            kind,
            parent,
            children: Vec::new(),
            text: String::new(),
            format: Format::new(),
        }
    }

    /// Text length in chars (offsets are always char based).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A subtree without ids: parser output and the payload of insert intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub kind: NodeKind,
    pub text: String,
    pub format: Format,
    pub children: Vec<NodeTemplate>,
}

impl NodeTemplate {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            text: String::new(),
            format: Format::new(),
            children: Vec::new(),
        }
    }

    pub fn paragraph() -> Self {
        Self::new(NodeKind::Paragraph)
    }

    pub fn run(text: impl Into<String>) -> Self {
        let mut run = Self::new(NodeKind::Run);
        run.text = text.into();
        run
    }

    /// Paragraph holding a single run of `text`.
    pub fn paragraph_with_text(text: impl Into<String>) -> Self {
        Self::paragraph().with_child(Self::run(text))
    }

    pub fn with_child(mut self, child: NodeTemplate) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_format(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.format.insert(key.into(), value.into());
        self
    }

    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(NodeTemplate::node_count).sum::<usize>()
    }
}

/// A subtree with ids assigned, as carried by insert payloads so that replay
/// and undo restore exactly the same nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtree {
    pub id: NodeId,
    pub kind: NodeKind,
    pub text: String,
    pub format: Format,
    pub children: Vec<Subtree>,
}

impl Subtree {
    /// Assign ids to `template` in pre-order starting at `next`.
    pub fn from_template(template: &NodeTemplate, next: &mut u64) -> Self {
        let id = NodeId(*next);
        *next += 1;
        Self {
            id,
            kind: template.kind,
            text: template.text.clone(),
            format: template.format.clone(),
            children: template
                .children
                .iter()
                .map(|c| Subtree::from_template(c, next))
                .collect(),
        }
    }

    /// All ids of this subtree in pre-order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_rules() {
        assert!(NodeKind::Body.accepts(NodeKind::Paragraph));
        assert!(NodeKind::Body.accepts(NodeKind::SectionBreak));
        assert!(!NodeKind::Body.accepts(NodeKind::Run));
        assert!(NodeKind::Paragraph.accepts(NodeKind::Run));
        assert!(!NodeKind::Paragraph.accepts(NodeKind::Paragraph));
        assert!(NodeKind::TableCell.accepts(NodeKind::Table));
        assert!(!NodeKind::Run.accepts(NodeKind::Run));
    }

    #[test]
    fn test_subtree_ids_preorder() {
        let template = NodeTemplate::new(NodeKind::Table).with_child(
            NodeTemplate::new(NodeKind::TableRow)
                .with_child(NodeTemplate::new(NodeKind::TableCell).with_child(NodeTemplate::paragraph_with_text("a"))),
        );
        assert_eq!(template.node_count(), 5);

        let mut next = 10;
        let subtree = Subtree::from_template(&template, &mut next);
        assert_eq!(next, 15);
        let ids: Vec<u64> = subtree.ids().into_iter().map(NodeId::as_u64).collect();
        assert_eq!(ids, vec![10, 11, 12, 13, 14]);
    }
}
