//! Pipeline tests: full backup runs against local storage and mocks
//!
//! Run with: `cargo test -p backup-manager-tests --test pipeline`

mod end_to_end;
mod restore;
