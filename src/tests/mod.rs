//! Test modules for the speedometer binary.
