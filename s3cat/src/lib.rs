#![doc = include_str!("../README.md")]

mod concat;
mod config;
mod error;
mod listing;
mod merge;
mod objstore;
mod part;
mod scheduler;
mod session;
mod source;
mod streamer;
mod temp;
mod work;

pub use concat::{
    concatenate, ConcatProgressCallback, ConcatSummary, ConcatenateJob, ConcatenateJobBuilder,
    PartSummary,
};
pub use config::{Config, SizeMismatchPolicy};
pub use error::{ErrorKind, Result, S3CatError};
pub use listing::{list_matching, ListFilter};
pub use objstore::{
    s3_store, MemoryStore, ObjectReader, ObjectStore, S3Store, StoreOperation, UploadedPart,
};
pub use source::{resolve_source, ObjectInfo, ObjectLocation, SourceItem};
pub use streamer::RemoteStreamer;
pub use work::PartKind;
