//! Settings schema.
//!
//! The file is a flat JSON object with a fixed set of keys. Every key has a
//! builtin default, so a file missing some keys still loads. Numeric keys
//! accept either JSON numbers or numeric strings, because the command-line
//! editor stores everything it is given as a string.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::defaults::*;

/// Process-wide FastOCR settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Vendor API key forwarded to workers inside each task record.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible vendor endpoint.
    pub api_url: String,
    /// Vision model used for recognition.
    pub model_name: String,
    pub rabbitmq_host: String,
    #[serde(deserialize_with = "lenient_number")]
    pub rabbitmq_port: u16,
    pub rabbitmq_queue: String,
    /// Worker process count for the pool launcher, and per-worker prefetch.
    #[serde(deserialize_with = "lenient_number")]
    pub worker_concurrency: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            rabbitmq_host: DEFAULT_RABBITMQ_HOST.to_string(),
            rabbitmq_port: DEFAULT_RABBITMQ_PORT,
            rabbitmq_queue: DEFAULT_RABBITMQ_QUEUE.to_string(),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        }
    }
}

impl AppSettings {
    /// Names of every settings key, in file order.
    pub const KEYS: [&'static str; 7] = [
        "api_key",
        "api_url",
        "model_name",
        "rabbitmq_host",
        "rabbitmq_port",
        "rabbitmq_queue",
        "worker_concurrency",
    ];

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + FromStr,
    <T as TryFrom<u64>>::Error: fmt::Display,
    <T as FromStr>::Err: fmt::Display,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => T::try_from(n).map_err(D::Error::custom),
        NumberOrString::Text(s) => s.trim().parse::<T>().map_err(D::Error::custom),
    }
}
