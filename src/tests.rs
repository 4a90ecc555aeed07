#![cfg(test)]
extern crate std;

use core::{fmt::Debug, marker::PhantomData, ptr::NonNull, slice};

use crate::{AllocError, AllocInitError, Buddy, Bump, Global};

use alloc::{boxed::Box, vec::Vec};
use quickcheck::{Arbitrary, Gen, QuickCheck};

type AllocResult = Result<NonNull<[u8]>, AllocError>;

trait QcAllocator: Sized {
    type Params: Arbitrary + Debug;

    fn with_params(params: Self::Params) -> Result<Self, AllocInitError>;

    fn allocate(&mut self, size: usize) -> AllocResult;

    /// Returns `false` if the allocator rejected a pointer it handed out.
    fn deallocate(&mut self, ptr: NonNull<u8>) -> bool;
}

/// Limit on allocation size, expressed in bits.
const ALLOC_LIMIT_BITS: u8 = 12;

fn limited_size(g: &mut Gen) -> usize {
    let exp = u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1);
    usize::arbitrary(g) % 2_usize.pow(exp.into())
}

// Buddy ======================================================================

#[derive(Clone, Debug)]
struct BuddyParams {
    total_size: usize,
}

impl Arbitrary for BuddyParams {
    fn arbitrary(g: &mut Gen) -> Self {
        BuddyParams {
            total_size: 1 << (u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1)),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let smaller = (self.total_size > 1).then(|| BuddyParams {
            total_size: self.total_size / 2,
        });

        Box::new(smaller.into_iter())
    }
}

impl QcAllocator for Buddy<Global> {
    type Params = BuddyParams;

    fn with_params(params: Self::Params) -> Result<Self, AllocInitError> {
        Buddy::try_new(params.total_size)
    }

    fn allocate(&mut self, size: usize) -> AllocResult {
        Buddy::allocate(self, size)
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) -> bool {
        Buddy::deallocate(self, ptr).is_ok()
    }
}

// Bump ======================================================================

#[derive(Clone, Debug)]
struct BumpParams {
    total_size: usize,
}

impl Arbitrary for BumpParams {
    fn arbitrary(g: &mut Gen) -> Self {
        BumpParams {
            total_size: usize::arbitrary(g) % 8192 + 1,
        }
    }
}

impl QcAllocator for Bump<Global> {
    type Params = BumpParams;

    fn with_params(params: Self::Params) -> Result<Self, AllocInitError> {
        Bump::try_new(params.total_size)
    }

    fn allocate(&mut self, size: usize) -> AllocResult {
        Bump::allocate(self, size)
    }

    // Bump allocations are only released all at once.
    fn deallocate(&mut self, _: NonNull<u8>) -> bool {
        true
    }
}

enum AllocatorOpTag {
    Allocate,
    Free,
}

#[derive(Clone, Debug)]
enum AllocatorOp {
    /// Allocate a buffer of `len` bytes.
    Allocate { len: usize },
    /// Free an existing allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Free { index: usize },
}

impl Arbitrary for AllocatorOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match g
            .choose(&[AllocatorOpTag::Allocate, AllocatorOpTag::Free])
            .unwrap()
        {
            AllocatorOpTag::Allocate => AllocatorOp::Allocate {
                len: limited_size(g),
            },
            AllocatorOpTag::Free => AllocatorOp::Free {
                index: usize::arbitrary(g),
            },
        }
    }
}

type OpId = u32;

/// An outstanding allocation, trimmed to the requested length.
struct Allocation {
    id: OpId,
    bytes: NonNull<[u8]>,
}

impl Allocation {
    fn new(id: OpId, block: NonNull<[u8]>, len: usize) -> Allocation {
        assert!(block.len() >= len, "block shorter than request");

        let bytes = NonNull::slice_from_raw_parts(block.cast::<u8>(), len);
        Allocation { id, bytes }
    }

    /// Fills the allocation with the bytes of its id.
    fn paint(&mut self) {
        let slice = unsafe { self.bytes.as_mut() };
        for (byte, value) in slice.iter_mut().zip(self.id.to_le_bytes().into_iter().cycle()) {
            *byte = value;
        }
    }

    /// Checks that no other allocation has written over this one.
    fn verify(&self) -> bool {
        let slice = unsafe { self.bytes.as_ref() };
        slice
            .iter()
            .zip(self.id.to_le_bytes().into_iter().cycle())
            .all(|(&byte, value)| byte == value)
    }
}

trait Prop {
    /// The allocator to test for this property.
    type Allocator: QcAllocator;

    /// Examines the result of an allocation.
    fn post_allocate(len: usize, res: &AllocResult) -> bool {
        let _ = (len, res);
        true
    }

    fn pre_deallocate(allocation: &Allocation) -> bool {
        let _ = allocation;
        true
    }

    /// Examines the allocator after every operation.
    fn post_op(allocator: &Self::Allocator) -> bool {
        let _ = allocator;
        true
    }

    /// Examines the allocator once every allocation has been freed.
    fn post_run(allocator: &Self::Allocator) -> bool {
        let _ = allocator;
        true
    }
}

struct AllocatorChecker<P: Prop> {
    allocator: P::Allocator,
    allocations: Vec<Allocation>,
    num_ops: u32,
}

impl<P: Prop> AllocatorChecker<P> {
    fn new(
        params: <P::Allocator as QcAllocator>::Params,
        capacity: usize,
    ) -> Result<Self, AllocInitError> {
        Ok(AllocatorChecker {
            allocator: P::Allocator::with_params(params)?,
            allocations: Vec::with_capacity(capacity),
            num_ops: 0,
        })
    }

    fn do_op(&mut self, op: AllocatorOp) -> bool {
        let op_id = self.num_ops;
        self.num_ops += 1;

        match op {
            AllocatorOp::Allocate { len } => {
                let res = self.allocator.allocate(len);

                if !P::post_allocate(len, &res) {
                    return false;
                }

                if let Ok(block) = res {
                    let mut a = Allocation::new(op_id, block, len);
                    a.paint();
                    self.allocations.push(a);
                }
            }

            AllocatorOp::Free { index } => {
                if self.allocations.is_empty() {
                    return true;
                }

                let index = index % self.allocations.len();
                let a = self.allocations.swap_remove(index);

                if !P::pre_deallocate(&a) || !self.allocator.deallocate(a.bytes.cast()) {
                    return false;
                }
            }
        }

        P::post_op(&self.allocator)
    }

    fn run(&mut self, ops: Vec<AllocatorOp>) -> bool {
        if !ops.into_iter().all(|op| self.do_op(op)) {
            return false;
        }

        // Free any outstanding allocations.
        for a in core::mem::take(&mut self.allocations) {
            if !P::pre_deallocate(&a) || !self.allocator.deallocate(a.bytes.cast()) {
                return false;
            }
        }

        P::post_run(&self.allocator)
    }
}

fn check<P: Prop>(params: <P::Allocator as QcAllocator>::Params, ops: Vec<AllocatorOp>) -> bool {
    let mut checker: AllocatorChecker<P> = AllocatorChecker::new(params, ops.capacity()).unwrap();
    checker.run(ops)
}

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 200;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

/// Live allocations never overlap: each one still holds its own paint when it
/// is freed.
struct MutuallyExclusive<A: QcAllocator> {
    phantom: PhantomData<A>,
}

impl<A: QcAllocator> Prop for MutuallyExclusive<A> {
    type Allocator = A;

    fn pre_deallocate(allocation: &Allocation) -> bool {
        allocation.verify()
    }
}

/// The block table stays a partition of power-of-two blocks with no free
/// buddies, and freeing everything restores the single whole-region block.
struct TableInvariants;

impl Prop for TableInvariants {
    type Allocator = Buddy<Global>;

    fn post_allocate(len: usize, res: &AllocResult) -> bool {
        match res {
            Ok(block) => block.len() >= len && (block.len() / 2 < len),
            Err(_) => true,
        }
    }

    fn pre_deallocate(allocation: &Allocation) -> bool {
        allocation.verify()
    }

    fn post_op(buddy: &Buddy<Global>) -> bool {
        let total: usize = buddy.blocks().map(|b| b.size()).sum();
        total == buddy.total_size() && buddy.table().check_invariants().is_ok()
    }

    fn post_run(buddy: &Buddy<Global>) -> bool {
        let blocks: Vec<_> = buddy.blocks().collect();
        blocks.len() == 1 && blocks[0].is_free() && blocks[0].size() == buddy.total_size()
    }
}

#[test]
fn buddy_allocations_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<MutuallyExclusive<Buddy<Global>>> as fn(_, _) -> bool);
}

#[test]
fn bump_allocations_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<MutuallyExclusive<Bump<Global>>> as fn(_, _) -> bool);
}

#[test]
fn buddy_table_invariants_hold() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<TableInvariants> as fn(_, _) -> bool);
}

/// Drives `buddy` through `ops`, returning the outstanding allocations.
fn replay(buddy: &mut Buddy<Global>, ops: Vec<AllocatorOp>) -> Vec<Allocation> {
    let mut live = Vec::new();

    for (op_id, op) in ops.into_iter().enumerate() {
        match op {
            AllocatorOp::Allocate { len } => {
                if let Ok(block) = buddy.allocate(len) {
                    let mut a = Allocation::new(op_id as OpId, block, len);
                    a.paint();
                    live.push(a);
                }
            }
            AllocatorOp::Free { index } => {
                if !live.is_empty() {
                    let a = live.swap_remove(index % live.len());
                    buddy.deallocate(a.bytes.cast()).unwrap();
                }
            }
        }
    }

    live
}

fn invalid_free_is_a_no_op(params: BuddyParams, ops: Vec<AllocatorOp>, ofs: usize) -> bool {
    let mut buddy = Buddy::try_new(params.total_size).unwrap();
    let _live = replay(&mut buddy, ops);

    let ofs = ofs % buddy.total_size();
    let is_used_start = buddy.blocks().any(|b| b.is_used() && b.offset() == ofs);
    if is_used_start {
        return true;
    }

    let before = buddy.table().clone();
    let ptr = NonNull::new(unsafe { buddy.region().cast::<u8>().as_ptr().add(ofs) }).unwrap();

    buddy.deallocate(ptr) == Err(AllocError::InvalidFree) && buddy.table() == &before
}

#[test]
fn buddy_invalid_free_is_a_no_op() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(invalid_free_is_a_no_op as fn(_, _, _) -> bool);
}

fn resize_preserves_prefix(
    params: BuddyParams,
    ops: Vec<AllocatorOp>,
    index: usize,
    new_len: usize,
) -> bool {
    let mut buddy = Buddy::try_new(params.total_size).unwrap();
    let mut live = replay(&mut buddy, ops);
    if live.is_empty() {
        return true;
    }

    let a = live.swap_remove(index % live.len());
    let old_len = a.bytes.len();
    let old: Vec<u8> = unsafe { a.bytes.as_ref() }.to_vec();
    let before = buddy.table().clone();

    let new_len = new_len % (buddy.total_size() + 1);
    match buddy.resize(a.bytes.cast(), old_len, new_len) {
        Ok(block) => {
            let kept = old_len.min(block.len());
            let new = unsafe { slice::from_raw_parts(block.cast::<u8>().as_ptr(), kept) };

            block.len() >= new_len
                && new == &old[..kept]
                && live.iter().all(Allocation::verify)
                && buddy.table().check_invariants().is_ok()
        }
        Err(e) => {
            e == AllocError::ResizeFailed
                && buddy.table() == &before
                && a.verify()
                && live.iter().all(Allocation::verify)
        }
    }
}

#[test]
fn buddy_resize_preserves_prefix() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(resize_preserves_prefix as fn(_, _, _, _) -> bool);
}

// Logging =====================================================================

#[cfg(not(feature = "log"))]
#[test]
fn log_stand_ins_consume_their_arguments() {
    let mut evaluated = 0;
    let mut counted = |n: usize| {
        evaluated += 1;
        n
    };

    trace!("{}", counted(1));
    debug!("{:#x}", counted(2));
    warn!("{}", counted(3));
    assert_eq!(evaluated, 3);

    // A failed resize logs its error through `warn!` and still reports it.
    let mut buddy = Buddy::try_new(16).unwrap();
    let a = buddy.allocate(16).unwrap();
    assert_eq!(buddy.resize(a.cast(), 16, 32), Err(AllocError::ResizeFailed));
    buddy.deallocate(a.cast()).unwrap();
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}
