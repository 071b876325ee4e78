//! Driver for a video-avatar relay. The relay renders and voices the
//! interviewer; this side only sends lines to speak and receives lifecycle
//! notifications back.

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
use tracing::{debug, info, warn};

use viva_core::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire frames for the avatar relay.
mod avatar_types {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    #[serde(tag = "type", rename_all = "camelCase")]
    pub enum ClientFrame<'a> {
        Auth { token: &'a str },
        Speak { text: &'a str },
        Interrupt,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "camelCase")]
    pub enum ServerFrame {
        Ready,
        SpeakingStarted,
        SpeakingDone,
        Error { message: String },
    }
}

/// Callbacks for avatar lifecycle notifications, recorded once at connect.
pub trait AvatarSink: Send + Sync {
    fn on_speaking_started(&self);
    fn on_speaking_done(&self);
    fn on_error(&self, error: SessionError);
    /// The relay is gone; no further callbacks will arrive.
    fn on_closed(&self);
}

enum AvatarCommand {
    Speak(String),
    Interrupt,
    Close,
}

/// An open connection to the avatar relay.
pub struct AvatarChannel {
    commands: mpsc::UnboundedSender<AvatarCommand>,
    task: JoinHandle<()>,
}

impl AvatarChannel {
    /// Connects, authenticates, and waits for the relay's ready frame
    /// before returning. The whole handshake is bounded by `open_timeout`.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        open_timeout: Duration,
        sink: Arc<dyn AvatarSink>,
    ) -> Result<AvatarChannel, SessionError> {
        let (ws_stream, _) = tokio::time::timeout(open_timeout, connect_async(url))
            .await
            .map_err(|_| SessionError::Timeout(open_timeout))?
            .map_err(|e| {
                SessionError::upstream_opaque(format!("avatar connect failed: {e}"))
            })?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        if let Some(token) = token {
            send_json(&mut ws_tx, &avatar_types::ClientFrame::Auth { token }).await?;
        }

        tokio::time::timeout(open_timeout, await_ready(&mut ws_rx))
            .await
            .map_err(|_| SessionError::Timeout(open_timeout))??;
        info!(url = %url, "avatar channel ready");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(ws_tx, ws_rx, command_rx, sink));

        Ok(AvatarChannel { commands: command_tx, task })
    }

    /// Asks the avatar to speak one interviewer line. Speaking-started and
    /// speaking-done notifications come back through the sink.
    pub fn say(&self, text: &str) -> Result<(), SessionError> {
        self.commands
            .send(AvatarCommand::Speak(text.to_string()))
            .map_err(|_| SessionError::ChannelClosed("avatar channel task is gone".to_string()))
    }

    /// Cuts the avatar off mid-line. Used on barge-in.
    pub fn interrupt(&self) -> Result<(), SessionError> {
        self.commands
            .send(AvatarCommand::Interrupt)
            .map_err(|_| SessionError::ChannelClosed("avatar channel task is gone".to_string()))
    }

    /// Starts a graceful close. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.commands.send(AvatarCommand::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AvatarChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn await_ready(ws_rx: &mut SplitStream<WsStream>) -> Result<(), SessionError> {
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<avatar_types::ServerFrame>(&text) {
                    Ok(avatar_types::ServerFrame::Ready) => return Ok(()),
                    Ok(avatar_types::ServerFrame::Error { message }) => {
                        return Err(SessionError::upstream_opaque(message));
                    }
                    Ok(frame) => debug!(frame = ?frame, "ignoring frame before ready"),
                    Err(e) => warn!(error = ?e, "unparseable frame during avatar handshake"),
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SessionError::ChannelClosed(format!("websocket read failed: {e}")));
            }
        }
    }
    Err(SessionError::upstream_opaque("avatar channel closed during handshake"))
}

async fn run_channel(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut ws_rx: SplitStream<WsStream>,
    mut commands: mpsc::UnboundedReceiver<AvatarCommand>,
    sink: Arc<dyn AvatarSink>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let error = match command {
                    Some(AvatarCommand::Speak(text)) => {
                        let frame = avatar_types::ClientFrame::Speak { text: &text };
                        match send_json(&mut ws_tx, &frame).await {
                            Ok(()) => continue,
                            Err(e) => Some(e),
                        }
                    }
                    Some(AvatarCommand::Interrupt) => {
                        match send_json(&mut ws_tx, &avatar_types::ClientFrame::Interrupt).await {
                            Ok(()) => continue,
                            Err(e) => Some(e),
                        }
                    }
                    Some(AvatarCommand::Close) | None => {
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
                    info!("avatar channel closed by upstream");
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
        .map_err(|e| SessionError::Decode(format!("could not encode avatar frame: {e}")))?;
    ws_tx
        .send(Message::text(payload))
        .await
        .map_err(|e| SessionError::ChannelClosed(format!("websocket send failed: {e}")))
}

fn handle_server_frame(raw: &str, sink: &dyn AvatarSink) {
    match serde_json::from_str::<avatar_types::ServerFrame>(raw) {
        Ok(avatar_types::ServerFrame::Ready) => debug!("avatar re-sent ready"),
        Ok(avatar_types::ServerFrame::SpeakingStarted) => sink.on_speaking_started(),
        Ok(avatar_types::ServerFrame::SpeakingDone) => sink.on_speaking_done(),
        Ok(avatar_types::ServerFrame::Error { message }) => {
            sink.on_error(SessionError::upstream_opaque(message));
        }
        Err(e) => warn!(error = ?e, "unparseable frame from avatar relay"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum AvatarEvent {
        Started,
        Done,
        Error(String),
        Closed,
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AvatarEvent>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<AvatarEvent> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    impl AvatarSink for RecordingSink {
        fn on_speaking_started(&self) {
            self.events.lock().unwrap().push(AvatarEvent::Started);
        }

        fn on_speaking_done(&self) {
            self.events.lock().unwrap().push(AvatarEvent::Done);
        }

        fn on_error(&self, error: SessionError) {
            self.events.lock().unwrap().push(AvatarEvent::Error(error.to_string()));
        }

        fn on_closed(&self) {
            self.events.lock().unwrap().push(AvatarEvent::Closed);
        }
    }

    #[test]
    fn client_frames_serialize_with_type_tags() {
        let auth = serde_json::to_value(&avatar_types::ClientFrame::Auth { token: "t-1" }).unwrap();
        assert_eq!(auth["type"], "auth");
        assert_eq!(auth["token"], "t-1");

        let speak =
            serde_json::to_value(&avatar_types::ClientFrame::Speak { text: "Welcome." }).unwrap();
        assert_eq!(speak["type"], "speak");
        assert_eq!(speak["text"], "Welcome.");

        let interrupt = serde_json::to_value(&avatar_types::ClientFrame::Interrupt).unwrap();
        assert_eq!(interrupt["type"], "interrupt");
    }

    #[test]
    fn lifecycle_frames_reach_the_sink_in_order() {
        let sink = RecordingSink::default();

        handle_server_frame(r#"{"type":"speakingStarted"}"#, &sink);
        handle_server_frame(r#"{"type":"speakingDone"}"#, &sink);

        assert_eq!(sink.take(), vec![AvatarEvent::Started, AvatarEvent::Done]);
    }

    #[test]
    fn error_frames_carry_the_relay_message() {
        let sink = RecordingSink::default();

        handle_server_frame(r#"{"type":"error","message":"render farm on fire"}"#, &sink);

        let events = sink.take();
        assert!(matches!(&events[0], AvatarEvent::Error(m) if m.contains("render farm on fire")));
    }

    #[test]
    fn unknown_frames_are_dropped() {
        let sink = RecordingSink::default();
        handle_server_frame(r#"{"type":"blink"}"#, &sink);
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn commands_after_task_exit_report_channel_closed() {
        let (commands, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let channel = AvatarChannel { commands, task: tokio::spawn(async {}) };

        assert!(matches!(channel.say("hello").unwrap_err(), SessionError::ChannelClosed(_)));
        assert!(matches!(channel.interrupt().unwrap_err(), SessionError::ChannelClosed(_)));
    }
}
