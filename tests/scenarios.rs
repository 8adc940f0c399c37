//! End-to-end scenarios S1-S6 against the public `BPlusTree` API, driven
//! with `CAP=4`, `HALF=2`, integer keys and values (except S6, which needs
//! a byte-vector value to exercise the lazy-record threshold).

use bptree_engine::record_manager::MemRecordManager;
use bptree_engine::tree::with_default_serializers;
use bptree_engine::BPlusTree;

fn new_tree() -> BPlusTree<i32, i32, MemRecordManager> {
    with_default_serializers(4, 64, MemRecordManager::new())
}

fn forward_keys(tree: &mut BPlusTree<i32, i32, MemRecordManager>) -> Vec<i32> {
    let mut out = Vec::new();
    let Some(mut cursor) = tree.find_first().unwrap() else {
        return out;
    };
    while let Some((k, _)) = tree.cursor_next(&mut cursor).unwrap() {
        out.push(k);
    }
    out
}

#[test]
fn s1_first_insert() {
    let mut tree = new_tree();
    assert_eq!(tree.insert(10, 100, false).unwrap(), None);
    assert_eq!(tree.find_value(&10).unwrap(), Some(100));
    assert_eq!(tree.find_value(&7).unwrap(), None);
}

#[test]
fn s2_leaf_split() {
    let mut tree = new_tree();
    for (k, v) in [(10, 100), (20, 200), (30, 300), (40, 400)] {
        tree.insert(k, v, false).unwrap();
    }
    assert_eq!(forward_keys(&mut tree), vec![10, 20, 30, 40]);
    assert_eq!(tree.find_value(&30).unwrap(), Some(300));
}

#[test]
fn s3_replace_semantics() {
    let mut tree = new_tree();
    for (k, v) in [(10, 100), (20, 200), (30, 300), (40, 400)] {
        tree.insert(k, v, false).unwrap();
    }
    assert_eq!(tree.insert(20, 222, true).unwrap(), Some(200));
    assert_eq!(tree.find_value(&20).unwrap(), Some(222));
    assert_eq!(tree.find_value(&10).unwrap(), Some(100));
}

#[test]
fn s4_remove_triggers_merge_and_root_collapse() {
    let mut tree = new_tree();
    for (k, v) in [(10, 100), (20, 200), (30, 300), (40, 400)] {
        tree.insert(k, v, false).unwrap();
    }
    assert_eq!(tree.remove(&40).unwrap(), 400);
    assert_eq!(forward_keys(&mut tree), vec![10, 20, 30]);
}

#[test]
fn s5_remove_merge_cascade() {
    let mut tree = new_tree();
    for k in 1..=8 {
        tree.insert(k, k * 10, false).unwrap();
    }
    for k in [1, 2, 3, 4] {
        tree.remove(&k).unwrap();
    }
    assert_eq!(forward_keys(&mut tree), vec![5, 6, 7, 8]);
    assert_eq!(tree.len(), 4);
}

#[test]
fn s6_large_value_is_lazy() {
    let mut tree: BPlusTree<i32, Vec<u8>, MemRecordManager> =
        with_default_serializers(4, 32, MemRecordManager::new());
    let big = vec![9u8; 64];
    tree.insert(1, big.clone(), false).unwrap();
    assert_eq!(tree.find_value(&1).unwrap(), Some(big.clone()));
    assert_eq!(tree.remove(&1).unwrap(), big);
    assert_eq!(tree.find_value(&1).unwrap(), None);
}
