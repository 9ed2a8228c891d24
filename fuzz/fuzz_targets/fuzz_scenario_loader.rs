#![no_main]

use std::path::Path;

use goaltrack::config::ConfigLoader;
use goaltrack::observability::EventEmitter;
use goaltrack::scenario::ScenarioRunner;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(loaded) = ConfigLoader::with_defaults().load_str(yaml, Path::new("fuzz.yaml")) else {
        return;
    };
    // Scripts that reference missing units fail cleanly; nothing may panic.
    if let Ok(mut runner) = ScenarioRunner::new(loaded.config) {
        let _ = runner.run(&EventEmitter::noop());
    }
});
