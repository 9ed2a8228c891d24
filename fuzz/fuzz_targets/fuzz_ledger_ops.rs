#![no_main]

use goaltrack::ledger::{LeafPolicy, UnitLedger};
use goaltrack::state::ParameterState;
use goaltrack::unit::{FragmentKey, UnitId};
use libfuzzer_sys::fuzz_target;

fn unit(byte: u8) -> UnitId {
    UnitId(uuid::Uuid::from_u128(u128::from(byte % 8)))
}

fn fragments(byte: u8) -> Vec<FragmentKey> {
    (0..8)
        .filter(|bit| byte & (1 << bit) != 0)
        .map(FragmentKey)
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let Some((&flags, ops)) = data.split_first() else {
        return;
    };
    let mut ledger = UnitLedger::new(LeafPolicy {
        disable_on_state_change: flags & 1 != 0,
        fail_when_unmet: flags & 2 != 0,
    });

    for (time, chunk) in ops.chunks_exact(4).enumerate() {
        let [op, a, b, c] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        match op % 7 {
            0 => {
                let state = match c % 3 {
                    0 => ParameterState::Incomplete,
                    1 => ParameterState::Complete,
                    _ => ParameterState::Failed,
                };
                ledger.set_state(unit(a), state, time as f64);
            }
            1 => ledger.on_merge(unit(a), &fragments(b), unit(c), &fragments(c.rotate_left(3))),
            2 => ledger.on_split(unit(a), &fragments(b), &fragments(c)),
            3 => ledger.on_new_unit(unit(a), &fragments(b)),
            4 => ledger.on_transfer_out(unit(a), unit(b)),
            5 => ledger.on_transfer_back(unit(a), unit(b)),
            _ => ledger.set_disable_on_state_change(b & 1 != 0),
        }
    }

    for (_, record) in ledger.fragments().iter() {
        assert!(record.completion.is_none_or(f64::is_finite));
    }
});
