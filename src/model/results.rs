//! Result trees produced when a detector re-parses a block
//!
//! Offsets are relative to the start of the rescanned data.

use serde::Serialize;
use std::collections::BTreeMap;
use std::mem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultNode {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    /// False when the parser hit malformed or missing data
    pub valid: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn new(name: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            name: name.into(),
            offset,
            length,
            valid: true,
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn push_child(&mut self, child: ResultNode) {
        self.children.push(child);
    }

    /// Depth-first search for the first node called `name`
    pub fn find(&self, name: &str) -> Option<&ResultNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Number of nodes in the tree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ResultNode::node_count).sum::<usize>()
    }

    /// Rough heap footprint, used for cache accounting
    pub fn approx_size(&self) -> u64 {
        let own = mem::size_of::<Self>()
            + self.name.capacity()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.capacity() + v.capacity() + 3 * mem::size_of::<usize>())
                .sum::<usize>();
        own as u64 + self.children.iter().map(ResultNode::approx_size).sum::<u64>()
    }
}
