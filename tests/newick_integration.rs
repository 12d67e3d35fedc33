//! Newick parsing, placement grafting and the COPY path.

use tempfile::tempdir;

use biocolumns::error::ErrorKind;
use biocolumns::newick::{read_placements, read_tree_file, NewickTree, Placement};
use biocolumns::table::{collect, copy_newick, CopyNewickParams, ReadNewick, ReadNewickParams};

const TREE: &str = "((A:1{0},B:1{1}):2{2},C:3{3});";

fn placement(fragment: &str, edge: i64, distal: f64, pendant: f64) -> Placement {
    Placement {
        fragment_id: fragment.to_string(),
        edge_id: edge,
        like_weight_ratio: 1.0,
        distal_length: distal,
        pendant_length: pendant,
    }
}

#[test]
fn test_placement_on_internal_edge() {
    let mut tree = NewickTree::parse(TREE).unwrap();
    let ab_before = tree.find_by_edge_id(2).unwrap();
    let a = tree.find_by_name("A").unwrap();
    let depth_before = tree.distance_to_root(a).unwrap();

    tree.insert_fully_resolved(&[placement("frag1", 2, 0.5, 0.1)])
        .unwrap();

    assert_eq!(tree.num_nodes(), 7);
    let frag = tree.find_by_name("frag1").unwrap();
    assert_eq!(tree.node(frag).unwrap().branch_length, 0.1);

    // The old edge of length 2 is now a chain of two segments.
    let ab = tree.find_by_edge_id(2).unwrap();
    assert_eq!(ab, ab_before);
    let split = tree.node(ab).unwrap().parent().unwrap();
    assert_eq!(tree.node(frag).unwrap().parent(), Some(split));
    let chain = tree.node(ab).unwrap().branch_length + tree.node(split).unwrap().branch_length;
    assert!((chain - 2.0).abs() < 1e-12);
    assert!((tree.distance_to_root(a).unwrap() - depth_before).abs() < 1e-12);

    assert_eq!(
        tree.to_newick(),
        "(((A:1{0},B:1{1}):0.5{2},frag1:0.1):1.5,C:3{3});"
    );
}

#[test]
fn test_placement_errors_leave_tree_unchanged() {
    let mut tree = NewickTree::parse(TREE).unwrap();
    let err = tree
        .insert_fully_resolved(&[placement("ok", 0, 0.5, 0.1), placement("bad", 42, 0.0, 0.1)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownEdge);
    assert_eq!(tree.to_newick(), TREE);

    let err = tree
        .insert_fully_resolved(&[placement("far", 3, 3.5, 0.1)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DistalOutOfRange);
    assert_eq!(tree.num_nodes(), 5);
}

#[test]
fn test_tree_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.nwk");
    std::fs::write(&path, format!("{TREE}\n")).unwrap();
    let tree = read_tree_file(&path).unwrap();
    assert_eq!(NewickTree::parse(&tree.to_newick()).unwrap(), tree);
    assert_eq!(tree.tip_names(), vec!["A", "B", "C"]);
}

#[test]
fn test_copy_newick_with_placement_file() {
    let dir = tempdir().unwrap();
    let tree_path = dir.path().join("tree.nwk");
    std::fs::write(&tree_path, TREE).unwrap();
    let placements_path = dir.path().join("placements.tsv");
    std::fs::write(
        &placements_path,
        "fragment_id\tedge_id\tlike_weight_ratio\tdistal_length\tpendant_length\n\
         frag1\t2\t0.9\t0.5\t0.1\n",
    )
    .unwrap();
    assert_eq!(read_placements(&placements_path).unwrap().len(), 1);

    let function = ReadNewick::bind(&ReadNewickParams::new([tree_path.display().to_string()]))
        .unwrap();
    let nodes = collect(&function, 1).unwrap();
    assert_eq!(nodes.iter().map(|b| b.num_rows()).sum::<usize>(), 5);

    let output = dir.path().join("placed.nwk.gz");
    let params = CopyNewickParams {
        nodes,
        output_path: output.display().to_string(),
        placements_path: Some(placements_path.display().to_string()),
        ..Default::default()
    };
    assert_eq!(copy_newick(&params).unwrap(), 7);

    let written = read_tree_file(&output).unwrap();
    assert_eq!(written.num_tips(), 4);
    let frag = written.find_by_name("frag1").unwrap();
    assert_eq!(written.node(frag).unwrap().branch_length, 0.1);
}
