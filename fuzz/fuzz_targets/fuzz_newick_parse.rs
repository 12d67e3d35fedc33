#![no_main]

use libfuzzer_sys::fuzz_target;

use biocolumns::newick::NewickTree;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(tree) = NewickTree::parse(text) {
        // Whatever parses must survive a write and re-parse unchanged.
        let written = tree.to_newick();
        let reparsed = NewickTree::parse(&written).expect("written tree re-parses");
        assert_eq!(reparsed.num_nodes(), tree.num_nodes());
    }
});
