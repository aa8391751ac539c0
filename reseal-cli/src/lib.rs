//! reseal-cli: argument parsing and command bodies shared by the `reseal` and
//! `reseal-tool` binaries.

pub mod commands;
pub mod logging;
