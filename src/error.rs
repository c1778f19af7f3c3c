//! Error types and result handling for producer-registry.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use producer_registry::{Error, Result};
//!
//! fn publish_record() -> Result<()> {
//!     // Simulating a broker outage
//!     Err(Error::BrokerUnavailable("delivery timed out".to_string()))
//! }
//!
//! match publish_record() {
//!     Ok(()) => println!("Published"),
//!     Err(Error::BrokerUnavailable(msg)) => eprintln!("Broker unavailable: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for producer-registry operations.
///
/// This enum represents all possible errors that can occur while
/// registering services and publishing records, from malformed topic
/// declarations to runtime delivery failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, typically an empty topic id.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The same topic id was declared with two different record types.
    #[error("Topic '{id}' declared with conflicting record types {first} and {second}")]
    DuplicateTopic {
        /// The conflicting topic id
        id: String,
        /// Record type of the first declaration
        first: &'static str,
        /// Record type of the second declaration
        second: &'static str,
    },

    /// Lookup failure: the topic was never registered for this service
    /// instance, or was registered with a different record type.
    #[error("Topic with name '{id}' and record type {type_name} is not registered for service instance '{instance}'")]
    UnregisteredTopic {
        /// The service instance the lookup ran against
        instance: String,
        /// The topic id that was looked up
        id: String,
        /// The record type the caller asked for
        type_name: &'static str,
    },

    /// The partition-key strategy failed while deriving a key.
    #[error("Partition key error: {0}")]
    PartitionKey(String),

    /// The record could not be encoded for transport.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The broker channel rejected or could not accept the record.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Configuration loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// A convenient Result type alias for producer-registry operations.
///
/// This is equivalent to `std::result::Result<T, producer_registry::Error>`.
///
/// # Example
///
/// ```rust
/// use producer_registry::Result;
///
/// fn do_something() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
