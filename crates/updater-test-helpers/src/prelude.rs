//! Convenience re-exports for common test utilities.

pub use crate::must::{must, must_err, must_some};

#[cfg(feature = "mock")]
pub use crate::mock::{
    Call, CallLog, FakeLocator, FakeManifests, FakeRegister, FakeStore, FakeUnpacker, Harness,
    RecordingSink,
};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{PackageFixture, write_tar};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
