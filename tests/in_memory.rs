//! In-memory fabric integration tests.
//!
//! Tests are organized into modules by functionality:
//! - `single_flight_tests`: Container start deduplication under concurrency
//! - `server_tests`: Client sessions over TCP, dispatch and teardown

mod fabric {
    pub mod helpers;

    mod server_tests;
    mod single_flight_tests;
}
