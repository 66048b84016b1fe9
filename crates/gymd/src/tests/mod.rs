//! Test suites for the simulation daemon.

mod support;
