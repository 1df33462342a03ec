//! Validation of client-supplied identifiers and request parameters.
//!
//! Runs at the service layer, before anything is submitted to the log: a bad
//! request must never become a committed entry.
//!
//! # Usage
//!
//! ```
//! use jetlog::cluster::{validate_partition_count, validate_topic_name};
//!
//! assert!(validate_topic_name("orders.v1").is_ok());
//! assert!(validate_partition_count(3).is_ok());
//!
//! assert!(validate_topic_name("").is_err());
//! assert!(validate_topic_name("orders/eu").is_err());
//! assert!(validate_partition_count(0).is_err());
//! ```
//!
//! # Identifier Rules
//!
//! Identifiers (topic names, node ids, consumer ids) must:
//! - Not be empty
//! - Not exceed their maximum length
//! - Contain only ASCII alphanumeric characters, dots (`.`), underscores (`_`), and hyphens (`-`)
//! - Not be "." or ".." (reserved filesystem names)
//! - Not start with a hyphen
//!
//! Topic names become object store path segments.

use crate::constants::{MAX_PARTITIONS_PER_TOPIC, MAX_TOPIC_NAME_LENGTH};
use crate::error::{JetError, JetResult};

/// Maximum length for node and consumer ids.
pub const MAX_ID_LENGTH: usize = 255;

/// Validate a topic name.
pub fn validate_topic_name(topic: &str) -> JetResult<()> {
    validate_identifier(topic, MAX_TOPIC_NAME_LENGTH, "Topic name")
}

/// Validate a node or consumer id.
pub fn validate_id(value: &str, field_name: &str) -> JetResult<()> {
    validate_identifier(value, MAX_ID_LENGTH, field_name)
}

/// Validate the partition count of a new topic.
pub fn validate_partition_count(partitions: u32) -> JetResult<()> {
    if partitions == 0 || partitions > MAX_PARTITIONS_PER_TOPIC {
        return Err(JetError::InvalidRequest(format!(
            "Partition count {} must be between 1 and {}",
            partitions, MAX_PARTITIONS_PER_TOPIC
        )));
    }
    Ok(())
}

fn validate_identifier(value: &str, max_len: usize, field_name: &str) -> JetResult<()> {
    if value.is_empty() {
        return Err(JetError::InvalidRequest(format!(
            "{} cannot be empty",
            field_name
        )));
    }

    if value.len() > max_len {
        return Err(JetError::InvalidRequest(format!(
            "{} '{}' is too long ({} chars, max {} chars)",
            field_name,
            truncate_for_display(value, 50),
            value.len(),
            max_len
        )));
    }

    if value == "." || value == ".." {
        return Err(JetError::InvalidRequest(format!(
            "{} cannot be '.' or '..' (reserved names)",
            field_name
        )));
    }

    if value.starts_with('-') {
        return Err(JetError::InvalidRequest(format!(
            "{} '{}' cannot start with a hyphen",
            field_name,
            truncate_for_display(value, 50)
        )));
    }

    for (i, c) in value.chars().enumerate() {
        if c.is_ascii_control() {
            return Err(JetError::InvalidRequest(format!(
                "{} contains control character at position {} (byte value 0x{:02X})",
                field_name, i, c as u8
            )));
        }

        let is_valid = c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-';
        if !is_valid {
            return Err(JetError::InvalidRequest(format!(
                "Invalid character '{}' (U+{:04X}) in {} at position {}. \
                 Only ASCII letters, digits, '.', '_', and '-' are allowed.",
                c.escape_default(),
                c as u32,
                field_name,
                i
            )));
        }
    }

    Ok(())
}

/// Truncate a string for display in error messages.
fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}
