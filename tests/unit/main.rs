//! Unit test modules.

mod fusion_test;
mod json_roundtrip_test;
mod reading_test;
