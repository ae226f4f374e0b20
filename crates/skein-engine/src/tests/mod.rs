//! Tests for the skein-engine crate.

mod helpers;
