/// Socket bridge adapter — newline-delimited JSON over a Unix socket.
///
/// The backend connector process listens on a local socket. On connect it
/// sends one line: either the full snapshot or an auth rejection. Every
/// subsequent line is an event. The gateway sends messages by writing one
/// `send` line per message. Lines the adapter cannot parse are logged and
/// skipped; the backend stays authoritative over its own sync protocol.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{AuthError, Backend, BackendEvent, ConvId, Conversation, SendError, Snapshot, UserId};

/// Inbound bridge lines.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Incoming {
    Snapshot(Snapshot),
    AuthError { reason: String },
    ChatMessage {
        conversation: ConvId,
        sender: UserId,
        text: String,
    },
    ConversationAdded { conversation: Conversation },
}

/// Outbound bridge lines.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outgoing<'a> {
    Send { conversation: &'a ConvId, text: &'a str },
}

/// Send-side handle for the bridge connection.
pub struct SocketBackend {
    writer: Mutex<OwnedWriteHalf>,
}

impl SocketBackend {
    /// Connect to the bridge socket and complete the handshake.
    ///
    /// Returns the send handle, the initial snapshot, and the event stream.
    /// The reader task runs until the bridge closes the connection.
    pub async fn connect(
        path: &Path,
    ) -> Result<(Arc<Self>, Snapshot, mpsc::UnboundedReceiver<BackendEvent>), AuthError> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut first = String::new();
        let n = reader.read_line(&mut first).await?;
        if n == 0 {
            return Err(AuthError::Handshake("connection closed before snapshot".into()));
        }
        let snapshot = match serde_json::from_str::<Incoming>(first.trim_end()) {
            Ok(Incoming::Snapshot(snapshot)) => snapshot,
            Ok(Incoming::AuthError { reason }) => return Err(AuthError::Rejected(reason)),
            Ok(other) => {
                return Err(AuthError::Handshake(format!(
                    "expected snapshot, got {other:?}"
                )))
            }
            Err(e) => return Err(AuthError::Handshake(e.to_string())),
        };
        info!(
            users = snapshot.users.len(),
            conversations = snapshot.conversations.len(),
            "backend snapshot received"
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(reader, event_tx));

        let backend = Arc::new(Self {
            writer: Mutex::new(write_half),
        });
        Ok((backend, snapshot, event_rx))
    }
}

/// Forward bridge lines into the gateway's event channel until EOF.
async fn read_events(
    mut reader: BufReader<OwnedReadHalf>,
    event_tx: mpsc::UnboundedSender<BackendEvent>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("backend event stream closed");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("backend read error: {e}");
                return;
            }
        }

        let event = match serde_json::from_str::<Incoming>(line.trim_end()) {
            Ok(Incoming::ChatMessage {
                conversation,
                sender,
                text,
            }) => BackendEvent::ChatMessage {
                conversation,
                sender,
                text,
            },
            Ok(Incoming::ConversationAdded { conversation }) => {
                BackendEvent::ConversationAdded(conversation)
            }
            Ok(other) => {
                debug!("ignoring backend line: {other:?}");
                continue;
            }
            Err(e) => {
                warn!("unparseable backend line: {e}");
                continue;
            }
        };
        if event_tx.send(event).is_err() {
            // Gateway dropped its receiver — nothing left to deliver to.
            return;
        }
    }
}

#[async_trait]
impl Backend for SocketBackend {
    async fn send_message(&self, conversation: &ConvId, text: &str) -> Result<(), SendError> {
        let mut payload = serde_json::to_string(&Outgoing::Send { conversation, text })
            .map_err(|e| SendError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        payload.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_line_parses() {
        let line = r#"{"type":"snapshot","self_user":"u-self","users":[{"id":"u-self","full_name":"Alice Example","chat_id":"1001"}],"conversations":[{"id":"c-1","name":"general","members":["u-self"]}]}"#;
        let Incoming::Snapshot(snapshot) = serde_json::from_str::<Incoming>(line).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.self_user, UserId("u-self".into()));
        assert_eq!(snapshot.conversations[0].name, "general");
    }

    #[test]
    fn chat_message_line_parses() {
        let line = r#"{"type":"chat_message","conversation":"c-1","sender":"u-2","text":"hi"}"#;
        let Incoming::ChatMessage { conversation, sender, text } =
            serde_json::from_str::<Incoming>(line).unwrap()
        else {
            panic!("expected chat message");
        };
        assert_eq!(conversation, ConvId("c-1".into()));
        assert_eq!(sender, UserId("u-2".into()));
        assert_eq!(text, "hi");
    }

    #[test]
    fn auth_error_line_parses() {
        let line = r#"{"type":"auth_error","reason":"bad cookies"}"#;
        assert!(matches!(
            serde_json::from_str::<Incoming>(line).unwrap(),
            Incoming::AuthError { .. }
        ));
    }

    #[test]
    fn send_line_serializes() {
        let conv = ConvId("c-1".into());
        let json = serde_json::to_string(&Outgoing::Send {
            conversation: &conv,
            text: "hello",
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"send","conversation":"c-1","text":"hello"}"#);
    }
}
