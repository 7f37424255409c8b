//! Shared set-up for tests. Available to other crates through the `test_utils` feature.
pub mod fixtures;
pub mod prepare_env;
