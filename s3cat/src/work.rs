use crate::temp::TempBlob;
use crate::{ObjectLocation, SourceItem};
use std::path::PathBuf;

/// How an uploaded part was populated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartKind {
    /// Copied server-side from an object already in object storage
    RemoteCopy,

    /// Streamed from a local file
    LocalStream,
}

/// Where the bytes of an item on the scheduler's work stack live
#[derive(Debug)]
pub(crate) enum Backing {
    /// An object in object storage
    Remote(ObjectLocation),

    /// A local file supplied by the caller
    Local(PathBuf),

    /// A temp blob produced by merging other items
    Temp(TempBlob),
}

/// An item on the scheduler's work stack: a source descriptor plus ownership of its bytes
#[derive(Debug)]
pub(crate) struct WorkItem {
    pub source: SourceItem,
    pub backing: Backing,
}

impl WorkItem {
    pub fn from_source(source: SourceItem) -> Self {
        let backing = match &source.bucket {
            Some(bucket) => Backing::Remote(ObjectLocation::new(bucket, &source.key)),
            None => Backing::Local(source.local_path()),
        };

        Self { source, backing }
    }

    /// An item produced by merging, whose bytes are in `blob`
    pub fn merged(blob: TempBlob, size: u64) -> Self {
        Self {
            source: SourceItem::local(blob.path(), size),
            backing: Backing::Temp(blob),
        }
    }

    pub fn size(&self) -> u64 {
        self.source.size
    }

    /// The kind of part this item would become if uploaded directly
    pub fn part_kind(&self) -> PartKind {
        match self.backing {
            Backing::Remote(_) => PartKind::RemoteCopy,
            Backing::Local(_) | Backing::Temp(_) => PartKind::LocalStream,
        }
    }
}
