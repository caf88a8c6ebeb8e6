//! End-to-end report scenarios over the in-memory collaborators.
