//! HTTP client for the speech backend
//!
//! The backend exposes four endpoints: `POST /stt` (multipart WAV upload),
//! `POST /chat`, `POST /tts`, and `GET /history`. [`VoiceBackend`] abstracts
//! them so the interaction loop can run against a scripted double in tests.

use async_trait::async_trait;
use url::Url;

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Transcript returned by the STT endpoint
#[derive(serde::Deserialize)]
struct TranscriptResponse {
    text: String,
}

/// Reply returned by the chat endpoint
#[derive(serde::Deserialize)]
struct ChatResponse {
    reply: String,
}

/// Conversation window returned by the history endpoint
#[derive(serde::Deserialize)]
struct HistoryResponse {
    messages: Vec<HistoryMessage>,
}

/// Error payload the backend attaches to non-success responses
#[derive(serde::Deserialize)]
struct ErrorBody {
    detail: String,
}

/// One entry of the backend's conversation history
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Synthesized speech plus the content type the backend labeled it with
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Operations the interaction loop needs from the backend
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Transcribe a WAV-encoded utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` if the backend rejects the audio or the
    /// request fails
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;

    /// Send a user message and return the assistant's reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Chat` if the backend rejects the message or the
    /// request fails
    async fn chat(&self, message: &str) -> Result<String>;

    /// Synthesize speech for a reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio>;

    /// Fetch the current conversation window
    ///
    /// # Errors
    ///
    /// Returns `Error::Chat` if the request fails
    async fn history(&self) -> Result<Vec<HistoryMessage>>;
}

/// Extract the `detail` field from an error payload, falling back to the
/// raw body
fn mine_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.detail.is_empty() => parsed.detail,
        _ => body.to_string(),
    }
}

async fn error_detail(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    mine_detail(&body)
}

/// reqwest-backed [`VoiceBackend`] talking to a running backend
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    stt_url: Url,
    chat_url: Url,
    tts_url: Url,
    history_url: Url,
}

impl BackendClient {
    /// Build a client from resolved backend configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the underlying client cannot be constructed
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            stt_url: config.stt_url.clone(),
            chat_url: config.chat_url.clone(),
            tts_url: config.tts_url.clone(),
            history_url: config.history_url.clone(),
        })
    }
}

#[async_trait]
impl VoiceBackend for BackendClient {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(wav_bytes = wav.len(), "uploading utterance");

        let form = reqwest::multipart::Form::new().part(
            "audio",
            reqwest::multipart::Part::bytes(wav)
                .file_name("utterance.wav")
                .mime_str("audio/wav")
                .map_err(|e| Error::Stt(e.to_string()))?,
        );

        let response = self
            .client
            .post(self.stt_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            tracing::error!(status = %status, detail = %detail, "transcription rejected");
            return Err(Error::Stt(format!("backend returned {status}: {detail}")));
        }

        let result: TranscriptResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcript response");
            e
        })?;

        let transcript = result.text.trim().to_string();
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    async fn chat(&self, message: &str) -> Result<String> {
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            message: &'a str,
        }

        tracing::debug!(chars = message.len(), "sending chat message");

        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            tracing::error!(status = %status, detail = %detail, "chat rejected");
            return Err(Error::Chat(format!("backend returned {status}: {detail}")));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat response");
            e
        })?;

        Ok(result.reply.trim().to_string())
    }

    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        #[derive(serde::Serialize)]
        struct SpeakRequest<'a> {
            text: &'a str,
        }

        tracing::debug!(chars = text.len(), "requesting speech synthesis");

        let response = self
            .client
            .post(self.tts_url.clone())
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "synthesis request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            tracing::error!(status = %status, detail = %detail, "synthesis rejected");
            return Err(Error::Tts(format!("backend returned {status}: {detail}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        tracing::debug!(
            audio_bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or("unknown"),
            "synthesis complete"
        );
        Ok(SpeechAudio {
            bytes,
            content_type,
        })
    }

    async fn history(&self) -> Result<Vec<HistoryMessage>> {
        let response = self
            .client
            .get(self.history_url.clone())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "history request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(Error::Chat(format!("backend returned {status}: {detail}")));
        }

        let result: HistoryResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse history response");
            e
        })?;

        Ok(result.messages)
    }
}

#[derive(Debug)]
struct ScriptState {
    transcript: Result<String>,
    reply: Result<String>,
    speech: Result<SpeechAudio>,
    history: Vec<HistoryMessage>,
    stall_transcribe: bool,
    stall_chat: bool,
    uploads: Vec<usize>,
    chat_messages: Vec<String>,
    spoken: Vec<String>,
    history_calls: usize,
}

impl Default for ScriptState {
    fn default() -> Self {
        let speech = crate::audio::wav::encode_wav(&vec![0.1; 160], 8_000)
            .map(|bytes| SpeechAudio {
                bytes,
                content_type: Some("audio/wav".to_string()),
            })
            .map_err(|e| Error::Tts(e.to_string()));
        Self {
            transcript: Ok("hello there".to_string()),
            reply: Ok("hi".to_string()),
            speech,
            history: Vec::new(),
            stall_transcribe: false,
            stall_chat: false,
            uploads: Vec::new(),
            chat_messages: Vec::new(),
            spoken: Vec::new(),
            history_calls: 0,
        }
    }
}

/// Deterministic [`VoiceBackend`] for tests
///
/// Clones share state, so a test can keep one handle for assertions after
/// moving the other into the interaction loop.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: std::sync::Arc<std::sync::Mutex<ScriptState>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer transcriptions with this text
    #[must_use]
    pub fn with_transcript(self, text: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.transcript = Ok(text.to_string());
        }
        self
    }

    /// Make transcription fail
    #[must_use]
    pub fn with_transcribe_failure(self, message: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.transcript = Err(Error::Stt(message.to_string()));
        }
        self
    }

    /// Answer chat with this reply
    #[must_use]
    pub fn with_reply(self, text: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.reply = Ok(text.to_string());
        }
        self
    }

    /// Make chat fail
    #[must_use]
    pub fn with_chat_failure(self, message: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.reply = Err(Error::Chat(message.to_string()));
        }
        self
    }

    /// Serve this conversation window from `history`
    #[must_use]
    pub fn with_history(self, messages: Vec<HistoryMessage>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.history = messages;
        }
        self
    }

    /// Park transcription forever; the call only ends by being dropped
    #[must_use]
    pub fn with_stalled_transcribe(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.stall_transcribe = true;
        }
        self
    }

    /// Park chat forever; the call only ends by being dropped
    #[must_use]
    pub fn with_stalled_chat(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.stall_chat = true;
        }
        self
    }

    /// Byte lengths of the WAVs uploaded so far
    #[must_use]
    pub fn uploads(&self) -> Vec<usize> {
        self.state.lock().map_or_else(|_| Vec::new(), |s| s.uploads.clone())
    }

    /// Messages sent to chat so far
    #[must_use]
    pub fn chat_messages(&self) -> Vec<String> {
        self.state
            .lock()
            .map_or_else(|_| Vec::new(), |s| s.chat_messages.clone())
    }

    /// Texts sent for synthesis so far
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.state.lock().map_or_else(|_| Vec::new(), |s| s.spoken.clone())
    }

    /// Number of history fetches so far
    #[must_use]
    pub fn history_calls(&self) -> usize {
        self.state.lock().map_or(0, |s| s.history_calls)
    }
}

#[async_trait]
impl VoiceBackend for ScriptedBackend {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let (stall, result) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Stt("script poisoned".to_string()))?;
            state.uploads.push(wav.len());
            (state.stall_transcribe, match &state.transcript {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Stt(e.to_string())),
            })
        };
        if stall {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn chat(&self, message: &str) -> Result<String> {
        let (stall, result) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Chat("script poisoned".to_string()))?;
            state.chat_messages.push(message.to_string());
            (state.stall_chat, match &state.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Chat(e.to_string())),
            })
        };
        if stall {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Tts("script poisoned".to_string()))?;
        state.spoken.push(text.to_string());
        match &state.speech {
            Ok(audio) => Ok(audio.clone()),
            Err(e) => Err(Error::Tts(e.to_string())),
        }
    }

    async fn history(&self) -> Result<Vec<HistoryMessage>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Chat("script poisoned".to_string()))?;
        state.history_calls += 1;
        Ok(state.history.clone())
    }
}
