//! Common utilities for the butterfly-osm query engine

pub mod error;

pub use error::{suggest_service, Error, Result};

#[cfg(test)]
mod tests {
    use crate::error::suggest_service;

    #[test]
    fn suggest_service_returns_expected_name() {
        assert_eq!(
            suggest_service("tabel", &["table", "route", "timestamp"]),
            Some("table".to_string())
        );
    }
}
