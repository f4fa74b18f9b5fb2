//! # Otter Heap
//!
//! Collector side of the Otter object model.
//!
//! ## Design
//!
//! - **Cells**: payloads live in typed [`Space`] arenas addressed by
//!   generation-checked [`CellId`] handles
//! - **Incremental marking**: snapshot-at-the-beginning, kept sound by the
//!   pre-write barrier; cells allocated during a cycle start black
//! - **Generations**: young/old bit per header, old-to-young edges recorded
//!   precisely in the [`RememberedSet`] by the post-write barrier
//! - **Finalization**: private storage of dead objects can be released on a
//!   background thread

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
pub mod cell;
pub mod finalization;
pub mod heap;
pub mod space;
pub mod trace;

pub use barrier::{Edge, FieldRef, NotMarking, Region, RememberedSet, WriteBarrierBuffer};
pub use cell::{Age, CellId, CellKind, GcHeader, MarkColor};
pub use finalization::{BackgroundFinalizer, FinalizeTask};
pub use heap::{GcPhase, Heap, HeapConfig, HeapStats};
pub use space::Space;
pub use trace::HeapGraph;
