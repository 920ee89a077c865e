pub mod loader;
pub mod rate_limiter;
pub mod source;

pub use loader::{expand_paths, load_sources, LoadedSource};
pub use rate_limiter::{Admission, RateLimiter};
pub use source::{read_source, ByteStream, DocumentSource, FileSource, MemorySource};
