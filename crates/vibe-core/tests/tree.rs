use std::collections::BTreeMap;

use serde_json::json;
use vibe_core::{files_to_tree, TreeItem};

#[test]
fn grouping_is_independent_of_key_order() {
    let forward = BTreeMap::from([
        ("a/b.txt".to_string(), "x".to_string()),
        ("a/c.txt".to_string(), "y".to_string()),
    ]);
    let mut reversed = BTreeMap::new();
    reversed.insert("a/c.txt".to_string(), "y".to_string());
    reversed.insert("a/b.txt".to_string(), "x".to_string());

    let tree = files_to_tree(&forward);
    assert_eq!(tree, files_to_tree(&reversed));
    assert_eq!(tree.len(), 1);
    match &tree[0] {
        TreeItem::Directory { name, children } => {
            assert_eq!(name, "a");
            assert_eq!(children.len(), 2);
        }
        other => panic!("expected directory, got {other:?}"),
    }
}

#[test]
fn next_app_layout() {
    let files: BTreeMap<String, String> = [
        "app/page.tsx",
        "app/layout.tsx",
        "components/counter/display.tsx",
        "components/counter/controls.tsx",
        "lib/utils.ts",
    ]
    .into_iter()
    .map(|p| (p.to_string(), String::new()))
    .collect();

    assert_eq!(
        serde_json::to_value(files_to_tree(&files)).unwrap(),
        json!([
            ["app", "layout.tsx", "page.tsx"],
            ["components", ["counter", "controls.tsx", "display.tsx"]],
            ["lib", "utils.ts"]
        ])
    );
}
