//! Shared error definitions and filesystem guards used across loopgate crates.

pub mod error;
pub mod fs_guard;

pub use {
    error::{Error, FromMessage, Result},
    fs_guard::{
        PathCheckError, assert_path_allowed, ensure_private_dir, read_private_file,
        reject_symlink, remove_private_file, write_private_file,
    },
};
