//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the measurement loop
//! against the mock board.  All tests run on the host with no real
//! hardware required.

mod console_tests;
mod loop_scenarios;
mod mock_hw;
