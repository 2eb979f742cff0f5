use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fastocr_core::{FastOcrError, OcrClientFactory, OcrEngine, OcrOutput};

use crate::format::{data_uri, image_format};

/// Instruction sent alongside every image.
pub const OCR_PROMPT: &str = "Read all the text in the image.";

const DASHSCOPE_HOST: &str = "dashscope.aliyuncs.com";
const DASHSCOPE_COMPAT_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// DashScope only speaks the OpenAI protocol under `/compatible-mode/v1`;
/// any other DashScope URL is replaced with that base. Other vendors pass
/// through unchanged apart from a trailing slash.
pub fn normalize_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.contains(DASHSCOPE_HOST) && !trimmed.ends_with("/compatible-mode/v1") {
        return DASHSCOPE_COMPAT_BASE.to_string();
    }
    trimmed.to_string()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client bound to one API key.
pub struct VisionOcrClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl VisionOcrClient {
    pub fn new(
        api_key: impl Into<String>,
        api_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FastOcrError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FastOcrError::ClientInit(e.to_string()))?;
        let base_url = normalize_api_url(api_url);
        let model = model.into();
        info!(api_url = %base_url, model = %model, "Initialized OCR client");
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url,
            model,
        })
    }
}

#[async_trait]
impl OcrEngine for VisionOcrClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, FastOcrError> {
        let start = Instant::now();

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| FastOcrError::ImageRead {
                path: image_path.display().to_string(),
                message: e.to_string(),
            })?;
        let format = image_format(image_path);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_uri(format, &bytes),
                        },
                    },
                    ContentPart::Text { text: OCR_PROMPT },
                ],
            }],
        };

        debug!(
            model = %self.model,
            format,
            bytes = bytes.len(),
            "Sending OCR request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FastOcrError::Vendor {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(FastOcrError::Vendor {
                status: Some(status.as_u16()),
                message: error_body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| FastOcrError::Vendor {
            status: Some(status.as_u16()),
            message: format!("unreadable response: {e}"),
        })?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FastOcrError::Vendor {
                status: Some(status.as_u16()),
                message: "response contained no message content".into(),
            })?;

        Ok(OcrOutput {
            text,
            model: self.model.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Builds a [`VisionOcrClient`] per task, sharing endpoint, model and timeout.
#[derive(Debug, Clone)]
pub struct VisionClientFactory {
    api_url: String,
    model: String,
    timeout: Duration,
}

impl VisionClientFactory {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            timeout,
        }
    }
}

impl OcrClientFactory for VisionClientFactory {
    fn build(&self, api_key: &str) -> Result<Box<dyn OcrEngine>, FastOcrError> {
        let client = VisionOcrClient::new(api_key, &self.api_url, self.model.clone(), self.timeout)?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_vendor(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    async fn echo_vendor(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer sk-good" {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid api key"})));
        }
        let content = &body["messages"][0]["content"];
        let url = content[0]["image_url"]["url"].as_str().unwrap_or_default();
        let prompt = content[1]["text"].as_str().unwrap_or_default();
        let reply = format!("{} | {} | {}", body["model"].as_str().unwrap_or_default(), prompt, url);
        (
            StatusCode::OK,
            Json(json!({"choices": [{"message": {"role": "assistant", "content": reply}}]})),
        )
    }

    fn write_image(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"hi").unwrap();
        path
    }

    #[test]
    fn dashscope_urls_are_normalized() {
        assert_eq!(
            normalize_api_url("https://dashscope.aliyuncs.com/api/v1"),
            DASHSCOPE_COMPAT_BASE
        );
        assert_eq!(
            normalize_api_url("https://dashscope.aliyuncs.com/compatible-mode/v1/"),
            DASHSCOPE_COMPAT_BASE
        );
        assert_eq!(
            normalize_api_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1"
        );
    }

    #[tokio::test]
    async fn recognize_sends_image_and_prompt() {
        let base = spawn_vendor(Router::new().route("/v1/chat/completions", post(echo_vendor))).await;
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "scan.png");

        let client = VisionOcrClient::new("sk-good", &base, "qwen-vl-ocr", Duration::from_secs(5)).unwrap();
        let output = client.recognize(&image).await.unwrap();

        assert_eq!(
            output.text,
            "qwen-vl-ocr | Read all the text in the image. | data:image/png;base64,aGk="
        );
        assert_eq!(output.model, "qwen-vl-ocr");
    }

    #[tokio::test]
    async fn rejected_key_is_a_permanent_vendor_error() {
        let base = spawn_vendor(Router::new().route("/v1/chat/completions", post(echo_vendor))).await;
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "scan.bmp");

        let factory = VisionClientFactory::new(base, "m", Duration::from_secs(5));
        let client = factory.build("sk-bad").unwrap();
        let err = client.recognize(&image).await.unwrap_err();

        match &err {
            FastOcrError::Vendor { status, message } => {
                assert_eq!(*status, Some(401));
                assert!(message.contains("invalid api key"));
            }
            other => panic!("expected vendor error, got {other:?}"),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_image_is_reported() {
        let client =
            VisionOcrClient::new("sk", "http://127.0.0.1:9/v1", "m", Duration::from_secs(1)).unwrap();
        let err = client.recognize(Path::new("/nonexistent/a.png")).await.unwrap_err();
        assert!(matches!(err, FastOcrError::ImageRead { .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let base = spawn_vendor(router).await;
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "a.jpg");

        let client = VisionOcrClient::new("sk", &base, "m", Duration::from_secs(5)).unwrap();
        assert!(client.recognize(&image).await.is_err());
    }
}
