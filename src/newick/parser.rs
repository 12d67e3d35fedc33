//! Strict Newick grammar.
//!
//! The parser is iterative, so nesting depth is bounded only by memory.
//! Nodes are appended in post-order: every child precedes its parent and
//! the root is the last node.

use crate::error::Location;

use super::tree::{NewickTree, Node};
use super::{NewickError, MAX_NODES};

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

fn is_structural(c: u8) -> bool {
    matches!(c, b'(' | b')' | b',' | b':' | b';' | b'{' | b'}' | b'[' | b']' | b'\'')
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> NewickError {
        NewickError::Parse {
            reason: reason.into(),
            location: Location::char(self.pos as u64),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Skip whitespace and `[...]` comments, which may nest.
    fn skip_filler(&mut self) -> Result<(), NewickError> {
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'[') {
                return Ok(());
            }
            let start = self.pos;
            let mut depth = 0usize;
            loop {
                match self.peek() {
                    None => {
                        self.pos = start;
                        return Err(self.error("unclosed comment"));
                    }
                    Some(b'[') => depth += 1,
                    Some(b']') => depth -= 1,
                    Some(_) => {}
                }
                self.pos += 1;
                if depth == 0 {
                    break;
                }
            }
        }
    }

    /// Advance while `keep` holds and return the consumed slice.
    fn token(&mut self, keep: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&keep) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn label(&mut self) -> Result<String, NewickError> {
        match self.peek() {
            Some(b'\'') => self.quoted_label(),
            _ => Ok(self
                .token(|c| !is_structural(c) && !c.is_ascii_whitespace())
                .to_string()),
        }
    }

    /// Single-quoted label; `''` inside stands for one quote.
    fn quoted_label(&mut self) -> Result<String, NewickError> {
        let open = self.pos;
        self.pos += 1;
        let mut label = String::new();
        loop {
            let rest = &self.text[self.pos..];
            let Some(end) = rest.bytes().position(|c| c == b'\'') else {
                self.pos = open;
                return Err(self.error("unclosed quote in label"));
            };
            label.push_str(&rest[..end]);
            self.pos += end + 1;
            if self.peek() == Some(b'\'') {
                label.push('\'');
                self.pos += 1;
            } else {
                return Ok(label);
            }
        }
    }

    fn branch_length(&mut self) -> Result<f64, NewickError> {
        self.skip_whitespace();
        let start = self.pos;
        let raw = self.token(|c| {
            !matches!(c, b'(' | b')' | b',' | b';' | b'{' | b'[') && !c.is_ascii_whitespace()
        });
        if raw.is_empty() {
            return Err(self.error("expected a number after ':'"));
        }
        let value: f64 = raw.parse().map_err(|_| NewickError::Parse {
            reason: format!("invalid branch length '{raw}'"),
            location: Location::char(start as u64),
        })?;
        if value < 0.0 || value.is_infinite() {
            return Err(NewickError::Parse {
                reason: format!("branch length '{raw}' must be a finite non-negative number"),
                location: Location::char(start as u64),
            });
        }
        Ok(value)
    }

    fn edge_id(&mut self) -> Result<i64, NewickError> {
        self.pos += 1;
        self.skip_whitespace();
        let start = self.pos;
        let raw = self.token(|c| {
            !matches!(c, b'}' | b'(' | b')' | b',' | b';' | b'[') && !c.is_ascii_whitespace()
        });
        if raw.is_empty() {
            return Err(self.error("expected an integer edge identifier"));
        }
        let value: i64 = raw.parse().map_err(|e: std::num::ParseIntError| NewickError::Parse {
            reason: format!("invalid edge identifier '{raw}': {e}"),
            location: Location::char(start as u64),
        })?;
        self.skip_whitespace();
        if self.peek() != Some(b'}') {
            return Err(self.error("unclosed brace in edge identifier"));
        }
        self.pos += 1;
        Ok(value)
    }

    /// Parse `label? (:length)? ({edge})?` and append the node.
    fn finish_node(
        &mut self,
        tree: &mut NewickTree,
        children: Vec<usize>,
    ) -> Result<usize, NewickError> {
        self.skip_filler()?;
        let name = self.label()?;
        self.skip_filler()?;
        let mut branch_length = f64::NAN;
        if self.peek() == Some(b':') {
            self.pos += 1;
            branch_length = self.branch_length()?;
            self.skip_filler()?;
        }
        let mut edge_id = None;
        if self.peek() == Some(b'{') {
            edge_id = Some(self.edge_id()?);
        }
        if tree.nodes.len() >= MAX_NODES {
            return Err(NewickError::TooLarge(tree.nodes.len() + 1));
        }
        let index = tree.nodes.len();
        for &child in &children {
            tree.nodes[child].parent = Some(index);
        }
        let mut node = Node::new(name, branch_length, edge_id);
        node.children = children;
        tree.nodes.push(node);
        Ok(index)
    }
}

impl NewickTree {
    /// Parse one tree terminated by `;`.
    ///
    /// A lone `;` yields a single unnamed root. Anything but whitespace or
    /// comments after the semicolon is an error, as are duplicate edge ids.
    pub fn parse(text: &str) -> Result<Self, NewickError> {
        let mut p = Parser { text, pos: 0 };
        p.skip_filler()?;
        match p.peek() {
            None => return Err(p.error("empty Newick string")),
            Some(b';') => {
                p.pos += 1;
                p.skip_filler()?;
                return match p.peek() {
                    None => Ok(NewickTree::single_root()),
                    Some(_) => Err(p.error("unexpected text after ';'")),
                };
            }
            Some(_) => {}
        }

        let mut tree = NewickTree {
            nodes: Vec::new(),
            root: 0,
        };
        // Open subtrees, each collecting its children so far.
        let mut open: Vec<Vec<usize>> = Vec::new();
        let root = 'subtree: loop {
            p.skip_filler()?;
            if p.peek() == Some(b'(') {
                p.pos += 1;
                open.push(Vec::new());
                continue;
            }
            let mut node = p.finish_node(&mut tree, Vec::new())?;
            loop {
                p.skip_filler()?;
                let Some(siblings) = open.last_mut() else {
                    break 'subtree node;
                };
                siblings.push(node);
                match p.peek() {
                    Some(b',') => {
                        p.pos += 1;
                        continue 'subtree;
                    }
                    Some(b')') => {
                        p.pos += 1;
                        let children = open.pop().unwrap_or_default();
                        node = p.finish_node(&mut tree, children)?;
                    }
                    _ => return Err(p.error("unbalanced parentheses: expected ',' or ')'")),
                }
            }
        };
        tree.root = root;

        p.skip_filler()?;
        if p.peek() != Some(b';') {
            return Err(p.error("missing semicolon at end of tree"));
        }
        p.pos += 1;
        p.skip_filler()?;
        if p.peek().is_some() {
            return Err(p.error("unexpected text after ';'"));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &tree.nodes {
            if let Some(edge) = node.edge_id {
                if !seen.insert(edge) {
                    return Err(NewickError::Parse {
                        reason: format!("duplicate edge identifier {{{edge}}}"),
                        location: Location::unknown(),
                    });
                }
            }
        }
        Ok(tree)
    }
}
