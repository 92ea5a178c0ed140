//! Small shared helpers.

pub mod lock;

pub(crate) use lock::recover;
