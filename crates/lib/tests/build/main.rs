//! End-to-end build tests against a shell-script toolchain.

#![cfg(unix)]

mod common;
mod compile_tests;
mod incremental_tests;
mod library_tests;
