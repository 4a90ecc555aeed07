#![no_main]
use alloc_hater::AllocatorOp;
use arbitrary::{Arbitrary, Unstructured};
use buddy_table_hater::BuddySubject;
use libfuzzer_sys::fuzz_target;

/// Largest region size, expressed in bits.
const MAX_ORDER: u8 = 20;

#[derive(Clone, Debug)]
struct Args {
    total_size: usize,
    ops: Vec<AllocatorOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let order = u8::arbitrary(un)? % (MAX_ORDER + 1);
        let ops = Vec::arbitrary(un)?;

        Ok(Args {
            total_size: 1 << order,
            ops,
        })
    }
}

fuzz_target!(|args: Args| {
    let Args { total_size, ops } = args;

    let buddy = match BuddySubject::new(total_size) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = alloc_hater::Evaluator::new(buddy);
    eval.evaluate(ops).unwrap();
});
