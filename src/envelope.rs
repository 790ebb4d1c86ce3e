use crate::Error;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Envelope {
    pub timestamp: String,
    pub message: String,
}

impl Envelope {
    /// Stamps the message with the current local time
    pub fn new(message: &str) -> Self {
        Self::with_time(message, &Local::now().naive_local())
    }
    pub fn with_time(message: &str, time: &NaiveDateTime) -> Self {
        Self {
            timestamp: time.format(TIMESTAMP_FORMAT).to_string(),
            message: message.to_owned(),
        }
    }
    pub fn to_payload(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// Builds a fresh envelope and serializes it, the timestamp is the call time
#[inline]
pub fn build_payload(message: &str) -> Result<Vec<u8>, Error> {
    Envelope::new(message).to_payload()
}
