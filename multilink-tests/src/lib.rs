//! Integration tests for the multilink connection-group core.
//!
//! The actual tests live in `tests/`; this crate only exists to host them.
