//! Streaming package assembly.
//!
//! A [`PackageStream`] decouples assembly from consumption: `open()` hands
//! the consumer a readable byte stream immediately, while a dedicated
//! blocking worker writes archive entries into a bounded in-memory pipe.
//! Every entry's bytes run through an observer stack computing content
//! length and digests; the full compressed body is digested on its way
//! into the pipe. Writer failures are stashed on the pipe and surface on
//! the reader side before EOF, with the full cause chain intact.

pub mod checksum;
pub mod pipe;

mod archive;
mod error;
mod stream;
mod zipwrite;

pub use checksum::{Checksum, ObserverStack};
pub use error::PackageError;
pub use stream::{
    EntryContent, OpenPackage, PackageEntry, PackageMetadata, PackageResource, PackageStream,
};
