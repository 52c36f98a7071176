//! System requirements validation.
//!
//! This module provides functions to check that the host system can run the
//! sandbox before anything is forked.

mod requirements;

pub use requirements::{
    MIN_KERNEL_VERSION, SystemRequirements, check_all, check_kernel_version, check_namespaces,
    check_privileges,
};
