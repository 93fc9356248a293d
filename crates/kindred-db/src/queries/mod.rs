//! `impl Database` blocks, one file per table group.

mod interactions;
mod locations;
mod matches;
mod messages;
mod profiles;
mod push_tokens;
