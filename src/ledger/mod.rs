//! Write-recording ledger over an immutable image.
//!
//! Submodules:
//! - `chunk`: interval chunks (`Data`/`Discard`) and carve helpers
//! - `disk`: the `VirtualDisk` ledger, the `DiskAccess` view shared with
//!   filesystem sessions, and the write-through `DestinationDisk`

pub mod chunk;
pub mod disk;

pub use chunk::{Chunk, ChunkKind};
pub use disk::{DestinationDisk, DiskAccess, DiskHandle, FrozenLedger, VirtualDisk};
