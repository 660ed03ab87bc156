//! # Azure Speech Engine
//!
//! ## Synthesis:
//! Uses the streaming text-to-speech WebSocket endpoint. One connection per
//! request carries three text frames (`speech.config`, `synthesis.context`
//! with viseme events enabled, `ssml`); the service answers with binary
//! `audio` frames, `audio.metadata` text frames holding viseme events, and a
//! final `turn.end`. Audio is requested as raw 24 kHz 16-bit mono PCM and
//! wrapped in a WAV container once the turn ends.
//!
//! ## Recognition:
//! Captures one utterance from the microphone and posts it to the
//! short-audio REST endpoint.
//!
//! ## Frame Layout:
//! - Text: `Header: value\r\n...\r\n\r\n{body}`
//! - Binary: 2-byte big-endian header length, headers, then payload

use crate::config::SpeechConfig;
use crate::error::{SessionError, SessionResult};
use crate::speech::microphone::{self, CaptureLimits, CAPTURE_SAMPLE_RATE};
use crate::speech::{pcm, Recognizer, SpeechEngine, SpeechProfile, Viseme};
use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sample rate of `raw-24khz-16bit-mono-pcm`.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

const OUTPUT_FORMAT: &str = "raw-24khz-16bit-mono-pcm";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct AzureSpeechEngine {
    key: String,
    region: String,
    client: reqwest::Client,
}

impl AzureSpeechEngine {
    pub fn new(config: &SpeechConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.recognition_timeout())
            .build()?;

        Ok(Self {
            key: config.key.clone(),
            region: config.region.clone(),
            client,
        })
    }

    fn require_key(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("AZURE_SPEECH_KEY is not configured".to_string());
        }
        Ok(())
    }

    fn synthesis_url(&self) -> String {
        format!(
            "wss://{}.tts.speech.microsoft.com/cognitiveservices/websocket/v1?X-ConnectionId={}",
            self.region,
            Uuid::new_v4().simple()
        )
    }
}

#[async_trait]
impl SpeechEngine for AzureSpeechEngine {
    async fn synthesize(&self, ssml: &str, output: &Path) -> SessionResult<Vec<Viseme>> {
        self.require_key().map_err(SessionError::Synthesis)?;

        let mut request = self
            .synthesis_url()
            .into_client_request()
            .map_err(|e| SessionError::Synthesis(format!("invalid synthesis request: {}", e)))?;
        let key = HeaderValue::from_str(&self.key)
            .map_err(|e| SessionError::Synthesis(format!("invalid speech key: {}", e)))?;
        request.headers_mut().insert(KEY_HEADER, key);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::Synthesis(format!("failed to connect: {}", e)))?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let request_id = Uuid::new_v4().simple().to_string();
        let frames = [
            speech_config_frame(&request_id),
            synthesis_context_frame(&request_id),
            text_frame("ssml", &request_id, "application/ssml+xml", ssml),
        ];
        for frame in frames {
            ws_sink
                .send(Message::Text(frame.into()))
                .await
                .map_err(|e| SessionError::Synthesis(format!("failed to send request: {}", e)))?;
        }

        let mut collector = SynthesisCollector::default();
        while let Some(msg) = ws_stream.next().await {
            let msg = msg.map_err(|e| SessionError::Synthesis(format!("stream error: {}", e)))?;
            match msg {
                Message::Text(text) => {
                    if collector.handle_text(&text)? {
                        break;
                    }
                }
                Message::Binary(data) => collector.handle_binary(&data)?,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(SessionError::Synthesis(format!(
                        "connection closed before synthesis completed: {}",
                        reason
                    )));
                }
                _ => {}
            }
        }

        if !collector.finished {
            return Err(SessionError::Synthesis(
                "stream ended before turn.end".to_string(),
            ));
        }
        let _ = ws_sink.send(Message::Close(None)).await;

        let samples = pcm::pcm_bytes_to_samples(&collector.audio).map_err(SessionError::Synthesis)?;
        let wav = pcm::encode_wav(&samples, SYNTHESIS_SAMPLE_RATE)?;
        tokio::fs::write(output, wav).await?;

        debug!(
            request_id = %request_id,
            audio_bytes = collector.audio.len(),
            visemes = collector.visemes.len(),
            "Azure synthesis finished"
        );
        Ok(collector.visemes)
    }

    fn open_recognizer(&self, profile: &SpeechProfile) -> SessionResult<Box<dyn Recognizer>> {
        Ok(Box::new(AzureRecognizer {
            client: self.client.clone(),
            key: self.key.clone(),
            endpoint: format!(
                "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
                self.region, profile.language
            ),
            closed: false,
        }))
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn text_frame(path: &str, request_id: &str, content_type: &str, body: &str) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: {}\r\n\r\n{}",
        path,
        request_id,
        timestamp(),
        content_type,
        body
    )
}

fn speech_config_frame(request_id: &str) -> String {
    let body = json!({
        "context": {
            "system": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "build": "Rust",
                "lang": "Rust"
            },
            "os": {
                "platform": std::env::consts::OS,
                "name": std::env::consts::OS,
                "version": ""
            }
        }
    });
    text_frame("speech.config", request_id, "application/json", &body.to_string())
}

fn synthesis_context_frame(request_id: &str) -> String {
    let body = json!({
        "synthesis": {
            "audio": {
                "metadataOptions": {
                    "bookmarkEnabled": false,
                    "punctuationBoundaryEnabled": false,
                    "sentenceBoundaryEnabled": false,
                    "wordBoundaryEnabled": false,
                    "visemeEnabled": true
                },
                "outputFormat": OUTPUT_FORMAT
            },
            "language": { "autoDetection": false }
        }
    });
    text_frame("synthesis.context", request_id, "application/json", &body.to_string())
}

/// Value of header `name` in a CRLF-separated header block.
fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataMessage {
    metadata: Vec<MetadataEntry>,
}

#[derive(Deserialize)]
struct MetadataEntry {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Data")]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VisemeData {
    offset: u64,
    viseme_id: u32,
}

/// Accumulates the audio and visemes of one synthesis turn.
#[derive(Debug, Default)]
pub(crate) struct SynthesisCollector {
    audio: Vec<u8>,
    visemes: Vec<Viseme>,
    finished: bool,
}

impl SynthesisCollector {
    /// Handle a text frame. Returns true once the turn has ended.
    pub(crate) fn handle_text(&mut self, frame: &str) -> SessionResult<bool> {
        let (headers, body) = frame.split_once("\r\n\r\n").unwrap_or((frame, ""));
        let path = header_value(headers, "Path").unwrap_or_default();

        match path {
            "turn.end" => {
                self.finished = true;
            }
            "audio.metadata" => {
                let message: MetadataMessage = serde_json::from_str(body).map_err(|e| {
                    SessionError::Synthesis(format!("malformed metadata frame: {}", e))
                })?;
                for entry in message.metadata.into_iter().filter(|e| e.kind == "Viseme") {
                    let data: VisemeData = serde_json::from_value(entry.data).map_err(|e| {
                        SessionError::Synthesis(format!("malformed viseme event: {}", e))
                    })?;
                    self.visemes.push(Viseme {
                        viseme_id: data.viseme_id,
                        audio_offset: data.offset,
                    });
                }
            }
            "turn.start" | "response" => {}
            other => debug!(path = other, "Ignoring synthesis frame"),
        }

        Ok(self.finished)
    }

    /// Handle a binary frame, keeping its payload if it carries audio.
    pub(crate) fn handle_binary(&mut self, frame: &[u8]) -> SessionResult<()> {
        if frame.len() < 2 {
            return Err(SessionError::Synthesis("truncated binary frame".to_string()));
        }
        let header_len = BigEndian::read_u16(&frame[..2]) as usize;
        let payload_start = 2 + header_len;
        if frame.len() < payload_start {
            return Err(SessionError::Synthesis(format!(
                "binary frame shorter than its {} byte header",
                header_len
            )));
        }

        let headers = String::from_utf8_lossy(&frame[2..payload_start]);
        if header_value(&headers, "Path") == Some("audio") {
            self.audio.extend_from_slice(&frame[payload_start..]);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

/// Interpret a short-audio recognition response.
fn recognized_text(response: RecognitionResponse) -> SessionResult<String> {
    match response.recognition_status.as_str() {
        "Success" => Ok(response.display_text),
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(String::new()),
        other => Err(SessionError::Recognition(format!(
            "recognition ended with status {}",
            other
        ))),
    }
}

/// Microphone recognizer posting to the short-audio endpoint.
pub struct AzureRecognizer {
    client: reqwest::Client,
    key: String,
    endpoint: String,
    closed: bool,
}

impl AzureRecognizer {
    async fn transcribe(&self, samples: Vec<i16>) -> SessionResult<String> {
        let wav = pcm::encode_wav(&samples, CAPTURE_SAMPLE_RATE)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(KEY_HEADER, &self.key)
            .header(
                reqwest::header::CONTENT_TYPE,
                "audio/wav; codecs=audio/pcm; samplerate=16000",
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .body(wav)
            .send()
            .await
            .map_err(|e| SessionError::Recognition(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Recognition(format!(
                "recognition service returned {}: {}",
                status, body
            )));
        }

        let parsed: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Recognition(format!("malformed response: {}", e)))?;
        recognized_text(parsed)
    }
}

/// Resolves when `stop` fires. A dropped sender never counts as a stop.
async fn stop_requested(stop: oneshot::Receiver<()>) {
    if stop.await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl Recognizer for AzureRecognizer {
    async fn recognize_once(&mut self, stop: oneshot::Receiver<()>) -> SessionResult<String> {
        if self.closed {
            return Err(SessionError::Recognition("recognizer is closed".to_string()));
        }
        if self.key.is_empty() {
            return Err(SessionError::Recognition(
                "AZURE_SPEECH_KEY is not configured".to_string(),
            ));
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let capture_flag = stop_flag.clone();
        let capture = tokio::task::spawn_blocking(move || {
            microphone::capture_utterance(&capture_flag, CaptureLimits::default())
        });

        let stop = stop_requested(stop);
        tokio::pin!(stop);

        let samples = tokio::select! {
            _ = &mut stop => {
                stop_flag.store(true, Ordering::SeqCst);
                info!("Recognition stopped before speech ended");
                return Ok(String::new());
            }
            joined = capture => joined
                .map_err(|e| SessionError::Recognition(format!("capture task failed: {}", e)))??,
        };

        if samples.is_empty() {
            debug!("No speech captured");
            return Ok(String::new());
        }

        tokio::select! {
            _ = &mut stop => {
                info!("Recognition stopped while waiting for the result");
                Ok(String::new())
            }
            text = self.transcribe(samples) => text,
        }
    }

    fn close(&mut self) {
        if self.closed {
            warn!("Recognizer already closed");
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_frame(headers: &str, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(headers.len() as u16).to_be_bytes());
        frame.extend_from_slice(headers.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_text_frame_layout() {
        let frame = text_frame("ssml", "abc", "application/ssml+xml", "<speak/>");
        let (headers, body) = frame.split_once("\r\n\r\n").unwrap();
        assert_eq!(header_value(headers, "Path"), Some("ssml"));
        assert_eq!(header_value(headers, "x-requestid"), Some("abc"));
        assert_eq!(header_value(headers, "Content-Type"), Some("application/ssml+xml"));
        assert!(header_value(headers, "X-Timestamp").unwrap().ends_with('Z'));
        assert_eq!(body, "<speak/>");
    }

    #[test]
    fn test_synthesis_context_enables_visemes() {
        let frame = synthesis_context_frame("abc");
        let (_, body) = frame.split_once("\r\n\r\n").unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["synthesis"]["audio"]["metadataOptions"]["visemeEnabled"], true);
        assert_eq!(value["synthesis"]["audio"]["outputFormat"], OUTPUT_FORMAT);
    }

    #[test]
    fn test_collector_gathers_audio_and_visemes() {
        let mut collector = SynthesisCollector::default();

        assert!(!collector.handle_text("Path:turn.start\r\n\r\n{}").unwrap());
        collector
            .handle_binary(&binary_frame("X-RequestId:abc\r\nPath:audio\r\n", &[1, 0, 2, 0]))
            .unwrap();
        let metadata = r#"{"Metadata":[{"Type":"Viseme","Data":{"Offset":500000,"VisemeId":12,"AnimationChunk":""}},{"Type":"SessionEnd","Data":{"Offset":900000}}]}"#;
        assert!(!collector
            .handle_text(&format!("Path:audio.metadata\r\n\r\n{}", metadata))
            .unwrap());
        collector
            .handle_binary(&binary_frame("Path:audio\r\n", &[3, 0]))
            .unwrap();
        collector
            .handle_binary(&binary_frame("Path:other\r\n", &[9, 9]))
            .unwrap();
        assert!(collector.handle_text("Path:turn.end\r\n\r\n").unwrap());

        assert!(collector.finished);
        assert_eq!(collector.audio, vec![1, 0, 2, 0, 3, 0]);
        assert_eq!(
            collector.visemes,
            vec![Viseme {
                viseme_id: 12,
                audio_offset: 500_000
            }]
        );
    }

    #[test]
    fn test_collector_rejects_bad_frames() {
        let mut collector = SynthesisCollector::default();
        assert!(collector.handle_binary(&[0]).is_err());
        assert!(collector.handle_binary(&[0, 10, b'P']).is_err());
        assert!(collector
            .handle_text("Path:audio.metadata\r\n\r\nnot json")
            .is_err());
    }

    #[test]
    fn test_recognition_statuses() {
        let parse = |json: &str| recognized_text(serde_json::from_str(json).unwrap());

        assert_eq!(
            parse(r#"{"RecognitionStatus":"Success","DisplayText":"Hello there.","Offset":0}"#).unwrap(),
            "Hello there."
        );
        assert_eq!(parse(r#"{"RecognitionStatus":"NoMatch"}"#).unwrap(), "");
        assert_eq!(parse(r#"{"RecognitionStatus":"InitialSilenceTimeout"}"#).unwrap(), "");
        assert!(parse(r#"{"RecognitionStatus":"Error"}"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_at_use() {
        let engine = AzureSpeechEngine::new(&SpeechConfig {
            key: String::new(),
            region: "westeurope".to_string(),
            synthesis_timeout_secs: 5,
            recognition_timeout_secs: 5,
        })
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .synthesize("<speak/>", &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "synthesis_error");

        let profile = SpeechProfile {
            voice: "en-US-JennyNeural".to_string(),
            language: "en-US".to_string(),
        };
        let mut recognizer = engine.open_recognizer(&profile).unwrap();
        let (_stop_tx, stop_rx) = oneshot::channel();
        assert!(recognizer.recognize_once(stop_rx).await.is_err());
        recognizer.close();
    }
}
