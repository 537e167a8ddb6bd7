//! FileSystem abstraction so project inspection can run against an in-memory tree

mod mock;
mod real;
mod r#trait;

pub use mock::MockFileSystem;
pub use r#trait::FileSystem;
pub use real::RealFileSystem;
