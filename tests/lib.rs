//! Conformance test package. The tests live under `conformance/`.
