//! End-to-end scenario tests for the Tally escrow stack live under
//! `tests/`. This crate intentionally exports nothing.
