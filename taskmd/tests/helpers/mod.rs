// Shared helpers for integration tests; not every test binary uses all of them
#![allow(dead_code)]

pub mod fixtures;
pub mod git;
pub mod polling;
pub mod scripted_runner;
