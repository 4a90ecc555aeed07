#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use alloc_hater::Subject;
use buddy_table::{AllocError, AllocInitError, Buddy, Bump, Global};

pub struct BuddySubject(Buddy<Global>);

impl BuddySubject {
    pub fn new(total_size: usize) -> Result<Self, AllocInitError> {
        let b = Buddy::try_new(total_size)?;
        Ok(BuddySubject(b))
    }
}

impl Subject for BuddySubject {
    type AllocError = AllocError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.allocate(size)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        self.0
            .deallocate(ptr)
            .expect("evaluator freed a block the allocator does not know");
        assert_eq!(self.0.table().check_invariants(), Ok(()));
    }

    unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<[u8]>> {
        let before = self.0.table().clone();

        match self.0.resize(ptr, old_size, new_size) {
            Ok(p) => Some(p),
            Err(AllocError::ResizeFailed) => {
                assert_eq!(self.0.table(), &before, "failed resize changed the table");
                None
            }
            Err(e) => panic!("unexpected resize error: {e}"),
        }
    }
}

pub struct BumpSubject(Bump<Global>);

impl BumpSubject {
    pub fn new(total_size: usize) -> Result<Self, AllocInitError> {
        let b = Bump::try_new(total_size)?;
        Ok(BumpSubject(b))
    }
}

impl Subject for BumpSubject {
    type AllocError = AllocError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.allocate(size)
    }

    // Bump allocations are reclaimed only when the whole region is released.
    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>) {}
}
