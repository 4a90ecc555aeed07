#![no_main]
use alloc_hater::AllocatorOp;
use arbitrary::{Arbitrary, Unstructured};
use buddy_table_hater::BumpSubject;
use libfuzzer_sys::fuzz_target;

const MAX_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
struct Args {
    total_size: usize,
    ops: Vec<AllocatorOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let total_size = usize::arbitrary(un)? % MAX_SIZE;
        let ops = Vec::arbitrary(un)?;

        Ok(Args { total_size, ops })
    }
}

fuzz_target!(|args: Args| {
    let Args { total_size, ops } = args;

    let bump = match BumpSubject::new(total_size) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = alloc_hater::Evaluator::new(bump);
    eval.evaluate(ops).unwrap();
});
