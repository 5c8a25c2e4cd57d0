pub mod classify;
pub mod clean;
pub mod commands;
pub mod errs;
pub mod hasher;
pub mod layout;
pub mod logging;
pub mod modimizer;
pub mod modset;
pub mod overlap;
pub mod readset;
pub mod sequence;
mod util;
