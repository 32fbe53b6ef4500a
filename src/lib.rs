//! Backfill randomizer seed metadata (web id, generation time, file stem, hash
//! icons) into the race database, backing up patch and spoiler files on the way.

pub mod cli;
pub mod database_ops;
pub mod tracing;

pub mod util {
    pub mod env;
}
