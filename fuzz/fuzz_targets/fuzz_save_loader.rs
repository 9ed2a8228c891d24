#![no_main]

use std::sync::Arc;

use goaltrack::catalog::Catalog;
use goaltrack::config::ContractConfig;
use goaltrack::config::build_contract;
use goaltrack::host::NameTable;
use goaltrack::persistence::{self, SaveNode};
use goaltrack::tracker::ContractTracker;
use libfuzzer_sys::fuzz_target;

const CONTRACT: &str = r"
id: fuzz
root:
  - type: group
    key: g
    duration: 10
    children:
      - type: unit
        key: leaf
        collection: crew
        filters: [{ tag: pilot }]
  - type: sequence
    key: seq
    children: [{ type: flag, key: a }, { type: flag, key: b }]
";

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(doc) = SaveNode::from_yaml(text) else {
        return;
    };
    let Ok(config) = serde_yaml::from_str::<ContractConfig>(CONTRACT) else {
        return;
    };
    let catalog = Arc::new(Catalog::default());
    let Ok(engine) = build_contract(&config, Arc::clone(&catalog)) else {
        return;
    };
    let mut tracker = ContractTracker::new(catalog);
    if tracker.insert(engine).is_err() {
        return;
    }
    let mut names = NameTable::new();
    let _ = persistence::load(&mut tracker, &mut names, &doc);
});
