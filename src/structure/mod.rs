//! Document structure primitives used by the signing protocol.
//!
//! - [`ObjectIndex`]: every object definition across all revisions, with byte spans
//! - [`page_refs`]: page tree enumeration
//! - [`RevisionWriter`]: append one incremental update

mod index;
mod pages;
mod revision;

pub use index::{IndexedObject, ObjectIndex, Trailer, parse_object_stream};
pub use pages::{page_count, page_refs};
pub use revision::{Revision, RevisionWriter};
