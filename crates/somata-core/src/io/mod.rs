pub mod atomic;
pub mod layout;
pub mod lock;
pub mod ser;
pub mod source;
pub mod tiff_stack;
pub mod volume;

pub use atomic::{write_atomic, write_json_atomic, AtomicFile};
pub use layout::{read_json, OutputLayout};
pub use lock::PlaneLock;
pub use source::{open_source, FrameSource, Interleave, MemorySource, PlaneFrames};
pub use volume::{FrameShift, RegisteredVolume, VolumeMetadata, VolumeWriter};
