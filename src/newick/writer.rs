use std::fmt::Write as _;

use super::tree::NewickTree;

fn needs_quotes(name: &str) -> bool {
    name.bytes().any(|c| {
        matches!(
            c,
            b'(' | b')' | b',' | b':' | b';' | b'{' | b'}' | b'[' | b']' | b'\''
        ) || c.is_ascii_whitespace()
    })
}

fn push_label(out: &mut String, name: &str) {
    if !needs_quotes(name) {
        out.push_str(name);
        return;
    }
    out.push('\'');
    out.push_str(&name.replace('\'', "''"));
    out.push('\'');
}

enum Step {
    Enter(usize),
    Comma,
    Close(usize),
}

impl NewickTree {
    /// Serialise to Newick text.
    ///
    /// Branch lengths are written only when specified, using the shortest
    /// text that parses back to the same value; edge ids follow as `{n}`.
    pub fn to_newick(&self) -> String {
        let mut out = String::with_capacity(self.nodes.len() * 16);
        let mut stack = vec![Step::Enter(self.root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(index) => {
                    let children = &self.nodes[index].children;
                    if children.is_empty() {
                        self.push_node_info(&mut out, index);
                        continue;
                    }
                    out.push('(');
                    stack.push(Step::Close(index));
                    for (i, &child) in children.iter().enumerate().rev() {
                        stack.push(Step::Enter(child));
                        if i > 0 {
                            stack.push(Step::Comma);
                        }
                    }
                }
                Step::Comma => out.push(','),
                Step::Close(index) => {
                    out.push(')');
                    self.push_node_info(&mut out, index);
                }
            }
        }
        out.push(';');
        out
    }

    fn push_node_info(&self, out: &mut String, index: usize) {
        let node = &self.nodes[index];
        push_label(out, &node.name);
        if !node.branch_length.is_nan() {
            let _ = write!(out, ":{}", node.branch_length);
        }
        if let Some(edge) = node.edge_id {
            let _ = write!(out, "{{{edge}}}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_text() {
        for text in [
            "((A:1,B:2)AB:3,C:4)root;",
            "(A:0.5{0},B:1e-7{1}){2};",
            "('needs quote':1,'it''s':2);",
            "A;",
            ";",
        ] {
            let tree = NewickTree::parse(text).unwrap();
            let written = tree.to_newick();
            assert_eq!(NewickTree::parse(&written).unwrap(), tree, "{text} -> {written}");
        }
    }

    #[test]
    fn test_exact_output() {
        let tree = NewickTree::parse("((A:1,B:1):2{2} ,C:3)  ;").unwrap();
        assert_eq!(tree.to_newick(), "((A:1,B:1):2{2},C:3);");
        let quoted = NewickTree::parse("('a b':0.25,'x''y',\"z\");").unwrap();
        assert_eq!(quoted.to_newick(), "('a b':0.25,'x''y',\"z\");");
    }

    fn arb_label() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[A-Za-z0-9_]{1,6}",
            "[a-z ,:;'()]{1,6}",
        ]
    }

    fn arb_tree_text() -> impl Strategy<Value = String> {
        let leaf = (arb_label(), prop::option::of(0.0f64..100.0))
            .prop_map(|(name, bl)| render(vec![], &name, bl));
        leaf.prop_recursive(4, 32, 4, |inner| {
            (prop::collection::vec(inner, 1..4), arb_label(), prop::option::of(0.0f64..10.0))
                .prop_map(|(children, name, bl)| render(children, &name, bl))
        })
        .prop_map(|body| format!("{body};"))
    }

    fn render(children: Vec<String>, name: &str, bl: Option<f64>) -> String {
        let mut out = String::new();
        if !children.is_empty() {
            out.push('(');
            out.push_str(&children.join(","));
            out.push(')');
        }
        push_label(&mut out, name);
        if let Some(bl) = bl {
            let _ = write!(out, ":{bl}");
        }
        out
    }

    proptest! {
        #[test]
        fn prop_parse_write_round_trip(text in arb_tree_text()) {
            let tree = NewickTree::parse(&text).unwrap();
            let reparsed = NewickTree::parse(&tree.to_newick()).unwrap();
            prop_assert_eq!(reparsed.num_nodes(), tree.num_nodes());
            prop_assert_eq!(reparsed, tree);
        }
    }
}
