//! Shared filesystem and path utilities.

pub mod files;
pub mod paths;

pub use files::{
    copy_file, copy_tree, ensure_parent_exists, move_path, remove_file, remove_tree, set_times,
    write_file_mode,
};
pub use paths::{normalize_lexically, normalize_relative, relative_path, split_extension};
