//! Protocol Buffer definitions and generated code for the change-tracking
//! service.
//!
//! The generated module is produced by [`tonic-build`] from
//! `proto/notify.proto` and checked in under `src/generated`.

pub mod notify {
    include!("../generated/changecache.notify.rs");
}

mod ext;
