//! A small library for ~~hating on~~ evaluating the correctness of allocators.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{mem::MaybeUninit, ptr::NonNull, slice};

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are spread evenly across powers of two up to `2^MAX_SIZE_BITS`, so
/// small and large requests are both common.
#[derive(Clone, Copy, Debug)]
pub struct ArbSize(pub usize);

/// Limit on generated allocation sizes, expressed in bits.
pub const MAX_SIZE_BITS: u8 = 20;

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let shift = u8::arbitrary(u)? % (MAX_SIZE_BITS + 1);
        let size = usize::arbitrary(u)? % (1_usize << shift);

        Ok(ArbSize(size))
    }
}

#[derive(Clone, Debug, arbitrary::Arbitrary)]
pub enum AllocatorOp {
    /// Allocate a block of the given size.
    Alloc(ArbSize),
    /// Free the outstanding block at `index % n`.
    Dealloc(usize),
    /// Move the outstanding block at `index % n` into a block of the given
    /// size.
    Resize(usize, ArbSize),
}

pub trait Subject {
    type AllocError: core::fmt::Debug;

    /// Allocates a block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError>;

    /// Deallocates the block pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block of memory currently allocated by this
    /// allocator.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>);

    /// Moves the block at `ptr` into one of at least `new_size` bytes,
    /// preserving its first `old_size` bytes.
    ///
    /// Returns `None` if the subject cannot resize, in which case `ptr` must
    /// remain a valid allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block of memory currently allocated by this
    /// allocator, holding at least `old_size` bytes.
    unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<[u8]>> {
        let _ = (ptr, old_size, new_size);
        None
    }
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }

    /// Returns `true` if every block still holds its paint.
    pub fn verify_all(&self) -> bool {
        self.blocks.iter().all(Block::verify)
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory, trimmed to the requested size.
pub struct Block {
    // A pointer to the requested part of the allocated block.
    ptr: NonNull<[u8]>,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

unsafe fn slice_ptr_to_uninit_slice_mut<'a>(ptr: NonNull<[u8]>) -> &'a mut [MaybeUninit<u8>] {
    unsafe { slice::from_raw_parts_mut(ptr.cast().as_ptr(), ptr.len()) }
}

fn paint(slice: &mut [MaybeUninit<u8>], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        byte.write(value);
    }
}

fn painted_with(slice: &[u8], id: u64) -> bool {
    let id_bytes = id.to_le_bytes().into_iter().cycle();
    slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
}

impl Block {
    /// Creates a block covering the first `len` bytes of `ptr` and paints it
    /// according to `id`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `ptr` must be valid for reads and writes for `len` bytes, and `len`
    ///   must not exceed `ptr.len()`.
    /// - No references to the memory at `ptr` may exist when this function is called.
    /// - No accesses to the memory at `ptr` may be made except by way of the
    ///   returned `Block` until said `Block` is dropped.
    pub unsafe fn init(ptr: NonNull<[u8]>, len: usize, id: u64) -> Block {
        assert!(len <= ptr.len(), "allocation shorter than requested");

        let ptr = NonNull::slice_from_raw_parts(ptr.cast::<u8>(), len);
        let mut b = Block { ptr, id };
        b.paint(id);
        b
    }

    /// Returns the requested size of the block.
    pub fn len(&self) -> usize {
        self.ptr.len()
    }

    /// Returns `true` if the requested size was zero.
    pub fn is_empty(&self) -> bool {
        self.ptr.len() == 0
    }

    /// Returns a pointer to the start of the block.
    pub fn as_non_null(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// Returns the `Block`'s memory as a mutable slice of uninitialized bytes.
    pub fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: self is mutably borrowed, so no other references to the
        // slice can exist
        unsafe { slice_ptr_to_uninit_slice_mut(self.ptr) }
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        self.id = id;
        paint(self.as_uninit_slice_mut(), id);
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        painted_with(slice, self.id)
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: AllocatorOp,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();
            let failed = |completed: Vec<AllocatorOp>, op: AllocatorOp| Failed {
                completed,
                failed_op: op,
            };

            match op {
                AllocatorOp::Alloc(ArbSize(size)) => {
                    let ptr = match self.subject.allocate(size) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };

                    if ptr.len() < size {
                        return Err(failed(completed, op));
                    }

                    let block = unsafe { Block::init(ptr, size, op_id) };
                    blocks.push(block);
                }

                AllocatorOp::Dealloc(raw_idx) => {
                    let mut block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(failed(completed, op));
                    }

                    unsafe {
                        block.paint(op_id);
                        self.subject.deallocate(block.as_non_null());
                    }
                }

                AllocatorOp::Resize(raw_idx, ArbSize(new_size)) => {
                    let block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(failed(completed, op));
                    }

                    let (old_id, old_size) = (block.id, block.len());
                    match unsafe { self.subject.resize(block.as_non_null(), old_size, new_size) } {
                        Some(ptr) => {
                            if ptr.len() < new_size {
                                return Err(failed(completed, op));
                            }

                            let kept = old_size.min(new_size);
                            let prefix = unsafe { slice::from_raw_parts(ptr.cast::<u8>().as_ptr(), kept) };
                            if !painted_with(prefix, old_id) {
                                return Err(failed(completed, op));
                            }

                            blocks.push(unsafe { Block::init(ptr, new_size, op_id) });
                        }

                        // The old block must be untouched.
                        None => blocks.push(block),
                    }
                }
            }

            if !blocks.verify_all() {
                return Err(failed(completed, op));
            }

            completed.push(op);
        }

        for block in blocks {
            unsafe { self.subject.deallocate(block.as_non_null()) };
        }

        Ok(())
    }
}
