use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

use viva_core::credentials::{CredentialKind, CredentialProvider};
use viva_core::error::SessionError;

use crate::audio;
use crate::provider::ChannelSink;

/// Sample rate the channel is asked to stream PCM16 at.
pub const STREAM_SAMPLE_RATE: u32 = 24_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire frames for the streaming speech relay.
mod stream_types {
    use serde::{Deserialize, Serialize};

    /// First frame after connect; authenticates and pins voice and pacing
    /// for the whole channel.
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetupFrame<'a> {
        pub api_key: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub voice_id: Option<&'a str>,
        pub sample_rate: u32,
        pub speed: f32,
    }

    /// A text increment. Empty text with `flush` set marks the end of the
    /// current utterance.
    #[derive(Debug, Serialize)]
    pub struct TextFrame<'a> {
        pub text: &'a str,
        pub flush: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServerFrame {
        /// Base64 PCM16 for the current utterance.
        pub audio: Option<String>,
        /// Set on the last frame of an utterance.
        pub is_final: Option<bool>,
        pub error: Option<ServerError>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ServerError {
        pub message: String,
    }
}

enum ChannelCommand {
    Speak(String),
    EndUtterance,
    Close,
}

/// Opener for duplex text-to-speech channels. Holds everything needed to
/// connect; the per-session channel itself lives in [`TtsChannel`].
pub struct StreamingTts {
    url: String,
    voice_id: Option<String>,
    speed: f32,
    open_timeout: Duration,
    api_key: Option<String>,
}

impl StreamingTts {
    pub fn new(
        credentials: &dyn CredentialProvider,
        url: &str,
        voice_id: Option<&str>,
        speed: f32,
        open_timeout: Duration,
    ) -> Self {
        StreamingTts {
            url: url.to_string(),
            voice_id: voice_id.map(str::to_string),
            speed,
            open_timeout,
            api_key: credentials
                .credential(CredentialKind::StreamingSpeech)
                .map(str::to_string),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Connects, authenticates, and spawns the reader task. The handler is
    /// recorded here, once; every chunk, error, and close notification for
    /// the channel's lifetime goes through it.
    ///
    /// Suspension happens only here. After open, text goes out through
    /// [`TtsChannel`] without waiting and audio comes back through the
    /// sink.
    pub async fn open_channel(
        &self,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<TtsChannel, SessionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SessionError::Precondition(
                "streaming speech credential missing".to_string(),
            ));
        };

        let (ws_stream, _) = tokio::time::timeout(self.open_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| SessionError::Timeout(self.open_timeout))?
            .map_err(|e| {
                SessionError::upstream_opaque(format!("websocket connect failed: {e}"))
            })?;

        let (mut ws_tx, ws_rx) = ws_stream.split();

        let setup = stream_types::SetupFrame {
            api_key,
            voice_id: self.voice_id.as_deref(),
            sample_rate: STREAM_SAMPLE_RATE,
            speed: self.speed,
        };
        send_json(&mut ws_tx, &setup).await?;
        info!(url = %self.url, "streaming speech channel open");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(ws_tx, ws_rx, command_rx, sink));

        Ok(TtsChannel { commands: command_tx, task })
    }
}

/// An open duplex speech channel. Commands are queued; the reader task owns
/// the socket.
#[derive(Debug)]
pub struct TtsChannel {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    task: JoinHandle<()>,
}

impl TtsChannel {
    /// Queues a text increment for the current utterance.
    pub fn push_text(&self, text: &str) -> Result<(), SessionError> {
        self.commands
            .send(ChannelCommand::Speak(text.to_string()))
            .map_err(|_| SessionError::ChannelClosed("speech channel task is gone".to_string()))
    }

    /// Marks the current utterance complete so the upstream flushes any
    /// buffered audio.
    pub fn end_utterance(&self) -> Result<(), SessionError> {
        self.commands
            .send(ChannelCommand::EndUtterance)
            .map_err(|_| SessionError::ChannelClosed("speech channel task is gone".to_string()))
    }

    /// Starts a graceful close. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.commands.send(ChannelCommand::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TtsChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_channel(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut ws_rx: SplitStream<WsStream>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    sink: Arc<dyn ChannelSink>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let error = match command {
                    Some(ChannelCommand::Speak(text)) => {
                        let frame = stream_types::TextFrame { text: &text, flush: false };
                        match send_json(&mut ws_tx, &frame).await {
                            Ok(()) => continue,
                            Err(e) => Some(e),
                        }
                    }
                    Some(ChannelCommand::EndUtterance) => {
                        let frame = stream_types::TextFrame { text: "", flush: true };
                        match send_json(&mut ws_tx, &frame).await {
                            Ok(()) => continue,
                            Err(e) => Some(e),
                        }
                    }
                    Some(ChannelCommand::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        None
                    }
                };
                if let Some(error) = error {
                    sink.on_error(error);
                }
                sink.on_closed();
                break;
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_server_frame(&text, sink.as_ref()),
                Some(Ok(Message::Close(_))) | None => {
                    info!("streaming speech channel closed by upstream");
                    sink.on_closed();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.on_error(SessionError::ChannelClosed(format!(
                        "websocket read failed: {e}"
                    )));
                    sink.on_closed();
                    break;
                }
            },
        }
    }
}

async fn send_json(
    ws_tx: &mut SplitSink<WsStream, Message>,
    frame: &impl Serialize,
) -> Result<(), SessionError> {
    let payload = serde_json::to_string(frame)
        .map_err(|e| SessionError::Decode(format!("could not encode channel frame: {e}")))?;
    ws_tx
        .send(Message::text(payload))
        .await
        .map_err(|e| SessionError::ChannelClosed(format!("websocket send failed: {e}")))
}

/// Chunks are decoded and handed to the sink in exactly the order frames
/// arrive; nothing here reorders or buffers across frames. Audio in a final
/// frame is delivered before the utterance-end notification.
fn handle_server_frame(raw: &str, sink: &dyn ChannelSink) {
    let frame: stream_types::ServerFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = ?e, "unparseable frame from speech channel");
            return;
        }
    };

    if let Some(error) = frame.error {
        sink.on_error(SessionError::upstream_opaque(error.message));
    }
    if let Some(audio) = frame.audio {
        let samples = audio::decode_pcm16(&audio);
        if !samples.is_empty() {
            sink.on_audio(samples);
        }
    }
    if frame.is_final.unwrap_or(false) {
        sink.on_utterance_end();
    }
}
