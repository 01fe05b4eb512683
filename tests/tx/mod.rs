//! Transaction manager tests against the in-memory pool.

mod concurrency_tests;
mod conn_tests;
