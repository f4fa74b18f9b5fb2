//! Finalization of dead objects' private storage

use crate::class::FinalizeOp;
use crate::object::ObjectStorage;
use otter_heap::FinalizeTask;

/// Storage of one dead object plus its class finalizer.
///
/// Holds nothing shared with live objects, so it may run on any thread.
pub(crate) struct FinalizeJob {
    finalize: Option<FinalizeOp>,
    storage: ObjectStorage,
}

impl FinalizeJob {
    pub(crate) fn new(finalize: Option<FinalizeOp>, storage: ObjectStorage) -> Self {
        Self { finalize, storage }
    }
}

impl FinalizeTask for FinalizeJob {
    fn finalize(self: Box<Self>) {
        let Self {
            finalize,
            mut storage,
        } = *self;
        if let Some(finalize) = finalize {
            finalize(&mut storage);
        }
        drop(storage);
    }
}
