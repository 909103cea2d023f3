//! Testing helpers for use writing unit and integration tests of the `s3cat` crate
//!
//! This is internal to `s3cat` and is not intended for use by any other crates.  Breaking changes
//! can be made at any time.
//!
//! It deliberately doesn't depend on `s3cat` itself, so that `s3cat` can use it as a
//! dev-dependency.  Tests put the data generated here into whichever store they're exercising.
pub mod logging;
pub mod test_data;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
