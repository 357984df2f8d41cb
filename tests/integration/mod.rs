//! Integration Tests Module
//!
//! End-to-end turns against the scripted provider and an in-process tool
//! backend, plus detection and layout over realistic model output.

// Fixtures shared by the test files
mod support;

// Round loop: plain, native, inline, timeout, round limit, cancellation
mod orchestration_test;

// Inline call detection and status block layout
mod detection_test;
