//! Builtin setting values, used for a fresh config file and to backfill
//! keys missing from an existing one.

pub const DEFAULT_API_KEY: &str = "";

/// DashScope's OpenAI-compatible endpoint.
pub const DEFAULT_API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

pub const DEFAULT_MODEL_NAME: &str = "qwen-vl-ocr";

pub const DEFAULT_RABBITMQ_HOST: &str = "localhost";

pub const DEFAULT_RABBITMQ_PORT: u16 = 5672;

pub const DEFAULT_RABBITMQ_QUEUE: &str = "ocr_tasks";

/// Default number of worker processes, and each worker's prefetch window.
pub const DEFAULT_WORKER_CONCURRENCY: u32 = 3;
