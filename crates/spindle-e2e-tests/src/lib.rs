//! End-to-end pipeline tests for Spindle.
//!
//! The tests live under `tests/` and share helpers in `tests/common`.
