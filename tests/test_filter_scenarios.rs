mod common;

use common::{load_yaml, status, step};
use goaltrack::engine::ContractStatus;
use goaltrack::scenario::ScenarioRunner;
use goaltrack::state::ParameterState;

const CREW_QUALIFICATION: &str = r"
scenario: { name: crew-qualification }
units:
  - { name: tanker, kind: vessel }
focus: tanker
contracts:
  - id: qualified-crew
    root:
      - type: unit
        key: qualified
        collection: crew
        filters:
          - value: { key: skill, op: ge, target: 2 }
          - count: { min: 2 }
  - id: all-trained
    root:
      - type: unit
        key: trained
        collection: crew
        filters:
          - { policy: validate_all, value: { key: skill, op: ge, target: 2 } }
  - id: nobody-injured
    root:
      - type: unit
        key: healthy
        collection: crew
        filters:
          - { policy: none, tag: injured }
steps:
  - at: 10
    action: update
    unit: tanker
    crew:
      - { name: ada, values: { skill: 2 } }
      - { name: ben, values: { skill: 1 } }
      - { name: cy, values: { skill: 3 } }
";

fn node_state(runner: &ScenarioRunner, contract: &str, key: &str) -> ParameterState {
    let tree = runner.tracker().get(contract).unwrap().tree();
    tree.state(tree.find(key).unwrap())
}

#[test]
fn empty_crew_cannot_be_judged() {
    let runner = ScenarioRunner::new(load_yaml(CREW_QUALIFICATION)).unwrap();
    assert_eq!(node_state(&runner, "qualified-crew", "qualified"), ParameterState::Incomplete);
    assert_eq!(node_state(&runner, "all-trained", "trained"), ParameterState::Incomplete);
    assert_eq!(status(&runner, "qualified-crew"), ContractStatus::Active);
    assert_eq!(status(&runner, "all-trained"), ContractStatus::Active);
    // nobody aboard means nobody is injured
    assert_eq!(status(&runner, "nobody-injured"), ContractStatus::Completed);
}

#[test]
fn filter_narrows_into_count() {
    let mut runner = ScenarioRunner::new(load_yaml(CREW_QUALIFICATION)).unwrap();
    step(&mut runner);

    assert_eq!(
        node_state(&runner, "qualified-crew", "qualified.filter0"),
        ParameterState::Complete
    );
    assert_eq!(
        node_state(&runner, "qualified-crew", "qualified.filter1"),
        ParameterState::Complete
    );
    assert_eq!(status(&runner, "qualified-crew"), ContractStatus::Completed);

    let leaf = runner
        .tracker()
        .get("qualified-crew")
        .unwrap()
        .tree()
        .leaf("qualified")
        .unwrap();
    let steps = leaf.chain().unwrap().steps();
    assert_eq!(steps[0].result().iter().by_vals().collect::<Vec<_>>(), [true, false, true]);
    assert_eq!(steps[1].result().count_ones(), 2);
}

#[test]
fn validate_all_fails_on_one_unqualified_member() {
    let mut runner = ScenarioRunner::new(load_yaml(CREW_QUALIFICATION)).unwrap();
    step(&mut runner);
    assert_eq!(node_state(&runner, "all-trained", "trained"), ParameterState::Failed);
    assert_eq!(status(&runner, "all-trained"), ContractStatus::Failed);
}

#[test]
fn explanation_lists_non_trivial_steps() {
    let runner = ScenarioRunner::new(load_yaml(CREW_QUALIFICATION)).unwrap();
    let notes = runner
        .presentation()
        .notes("qualified-crew", "qualified")
        .unwrap();
    assert!(notes.contains("Crew:"), "notes: {notes}");
    assert!(notes.contains("skill >= 2"), "notes: {notes}");
    assert!(!notes.contains("at least 2"), "count step is trivial: {notes}");
}

#[test]
fn tag_aliases_resolve_through_catalog() {
    let config = load_yaml(
        r"
scenario: { name: aliases }
catalog:
  tag_aliases: { scientist: science }
units:
  - name: lab
    kind: station
    crew: [{ name: bob, tags: [scientist] }]
focus: lab
contracts:
  - id: staffed
    root:
      - type: unit
        key: science_aboard
        kinds: [station]
        collection: crew
        filters:
          - tag: science
",
    );
    let runner = ScenarioRunner::new(config).unwrap();
    assert_eq!(status(&runner, "staffed"), ContractStatus::Completed);
}

#[test]
fn unmet_kind_blocks_a_passing_chain() {
    let config = load_yaml(
        r"
scenario: { name: wrong-kind }
units:
  - name: lab
    kind: base
    crew: [{ name: bob, tags: [scientist] }]
focus: lab
contracts:
  - id: staffed
    root:
      - type: unit
        key: science_aboard
        kinds: [station]
        collection: crew
        filters:
          - tag: scientist
",
    );
    let runner = ScenarioRunner::new(config).unwrap();
    assert_eq!(
        node_state(&runner, "staffed", "science_aboard"),
        ParameterState::Incomplete
    );
    assert_eq!(status(&runner, "staffed"), ContractStatus::Active);
}
