//! Drive filesystem adapter
//!
//! Presents a channel-backed drive API as a filesystem: cursor-paged listing,
//! chunked uploads, per-object hash lookup and live change notifications.

pub mod providers;

pub use providers::{
    ChangeCallback, ChangeSource, ChangeSubscription, DirCache, DriveConfig, DriveObject,
    DriveProvider, EntryKind, HashKind, HashProvider, Lister, ObjectSource, Pacer, PollSignal,
    ProviderConfig, ProviderError, RemoteEntry, StorageProvider, Uploader,
};
