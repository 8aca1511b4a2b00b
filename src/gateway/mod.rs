/// Gateway core — shared state, client accept loop, backend event dispatch.
///
/// Owns the naming map, the live session table and the backend handle.
/// Backend events arrive on an explicit channel and are fanned out here;
/// session-originated sends flow the other way through the [`Backend`] trait.
/// Delivery to a session goes through its unbounded outbound queue, so a slow
/// client never blocks delivery to the others.
pub mod session;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendEvent, ConvId, Snapshot, User, UserId};
use crate::irc::message::Message;
use crate::names::{self, ChannelMap};
use crate::text;

/// Server identity used as the prefix of every server-originated reply.
pub static SERVER_NAME: LazyLock<String> = LazyLock::new(|| {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "palaver.local".into())
});

/// Cap on per-session pending-echo entries. Oldest entries are dropped first;
/// a stale entry only means one mis-delivered echo for a very chatty client.
const MAX_PENDING_ECHO: usize = 32;

/// Generated session identifier — never a transport or task handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway-side bookkeeping for one client session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Negotiated nickname, once NICK has been seen.
    pub nick: Option<String>,
    /// True once the welcome sequence has been sent.
    pub ready: bool,
    /// Channels this session believes it has joined.
    pub joined: HashSet<String>,
    /// Texts this session just sent, awaiting echo-suppression consumption.
    pub pending_echo: Vec<String>,
    /// Outbound queue drained by the session's own task.
    pub tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            nick: None,
            ready: false,
            joined: HashSet::new(),
            pending_echo: Vec::new(),
            tx,
        }
    }

    /// Remember a just-sent text for echo suppression.
    pub fn record_sent(&mut self, text: &str) {
        if self.pending_echo.len() == MAX_PENDING_ECHO {
            self.pending_echo.remove(0);
        }
        self.pending_echo.push(text.to_owned());
    }

    /// Consume the first pending entry matching `text`, if any.
    fn consume_echo(&mut self, text: &str) -> bool {
        match self.pending_echo.iter().position(|t| t == text) {
            Some(pos) => {
                self.pending_echo.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Shared gateway state.
pub struct GatewayState {
    /// Conversation ↔ channel-name assignments.
    pub channels: ChannelMap,
    /// Live sessions.
    pub sessions: HashMap<SessionId, SessionHandle>,
    /// Backend user view, keyed by stable id.
    pub users: HashMap<UserId, User>,
    /// Backend conversation view, keyed by stable id.
    pub conversations: HashMap<ConvId, crate::backend::Conversation>,
    /// The backend account's own identity.
    pub self_user: Option<UserId>,
    /// Send-side backend handle, present once connected.
    pub backend: Option<Arc<dyn Backend>>,
    /// False until the backend handshake completes. Sessions finishing their
    /// own handshake earlier are told the backend is unavailable and closed.
    pub connected: bool,
    /// Apply the ASCII smiley filter to delivered texts.
    pub ascii_smileys: bool,
}

pub type SharedState = Arc<RwLock<GatewayState>>;

impl GatewayState {
    pub fn shared(ascii_smileys: bool) -> SharedState {
        Arc::new(RwLock::new(Self {
            channels: ChannelMap::new(),
            sessions: HashMap::new(),
            users: HashMap::new(),
            conversations: HashMap::new(),
            self_user: None,
            backend: None,
            connected: false,
            ascii_smileys,
        }))
    }

    /// Nickname of the backend account the gateway is signed in as.
    pub fn self_nick(&self) -> Option<String> {
        let id = self.self_user.as_ref()?;
        self.users.get(id).map(names::nick_for)
    }
}

/// Accept loop. The listener is bound by the caller so startup fails fast on
/// port conflicts and tests can bind to an ephemeral port.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "palaver listening");
    }
    loop {
        let (socket, addr) = listener.accept().await?;
        info!(%addr, "client connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = session::run(socket, state).await {
                warn!(%addr, "session error: {e}");
            }
            info!(%addr, "client disconnected");
        });
    }
}

/// Install the backend's initial snapshot: build the user/conversation views,
/// pre-assign channel names for every known conversation, and flip the
/// connected flag.
pub async fn on_backend_ready(state: &SharedState, backend: Arc<dyn Backend>, snapshot: Snapshot) {
    let mut st = state.write().await;
    st.users = snapshot
        .users
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();
    for conv in snapshot.conversations {
        let channel = st.channels.assign_or_get(&conv);
        debug!(conversation = %conv.id, %channel, "conversation mapped");
        st.conversations.insert(conv.id.clone(), conv);
    }
    st.self_user = Some(snapshot.self_user);
    st.backend = Some(backend);
    st.connected = true;
    info!("backend connected — connect your IRC clients");
}

/// Consume the backend event stream until it closes.
pub async fn dispatch_events(state: SharedState, mut events: mpsc::UnboundedReceiver<BackendEvent>) {
    while let Some(event) = events.recv().await {
        on_backend_event(&state, event).await;
    }
    info!("backend event stream ended");
}

/// React to one backend event.
pub async fn on_backend_event(state: &SharedState, event: BackendEvent) {
    match event {
        BackendEvent::ConversationAdded(conv) => {
            let mut st = state.write().await;
            let channel = st.channels.assign_or_get(&conv);
            info!(conversation = %conv.id, %channel, "new conversation");
            st.conversations.insert(conv.id.clone(), conv);
        }
        BackendEvent::ChatMessage {
            conversation,
            sender,
            text,
        } => deliver_chat_message(state, conversation, sender, text).await,
    }
}

/// Fan a chat message out to every ready session.
///
/// Sessions that have not joined the channel yet get a synthetic JOIN first,
/// so channels materialize in clients as messages arrive in them. A session's
/// own just-sent text is suppressed: exact text match against its pending
/// list plus sender-nick equality, consuming the matched entry. Duplicate
/// texts in quick succession can be mis-suppressed — accepted limitation of
/// the text-match heuristic.
async fn deliver_chat_message(state: &SharedState, conversation: ConvId, sender: UserId, text: String) {
    let mut st = state.write().await;

    let Some(channel) = st.channels.name_for(&conversation).map(str::to_owned) else {
        warn!(%conversation, "message for unmapped conversation dropped");
        return;
    };
    let (sender_nick, hostmask) = match st.users.get(&sender) {
        Some(user) => (names::nick_for(user), names::hostmask_for(user)),
        // Sender outside the snapshot: fall back to the raw identifier.
        None => (sender.0.clone(), format!("{sender}!{sender}@palaver")),
    };
    let delivered = if st.ascii_smileys {
        text::ascii_smileys(&text)
    } else {
        text.clone()
    };

    for (id, sess) in st.sessions.iter_mut() {
        if !sess.ready {
            continue;
        }
        if !sess.joined.contains(&channel) {
            sess.joined.insert(channel.clone());
            let nick = sess.nick.as_deref().unwrap_or("*");
            let join =
                Message::with_prefix(format!("{nick}!{nick}@palaver"), "JOIN", vec![channel.clone()]);
            let _ = sess.tx.send(join);
        }
        // Suppression matches against the raw text the client sent, not the
        // smiley-filtered rendering.
        if sess.nick.as_deref() == Some(sender_nick.as_str()) && sess.consume_echo(&text) {
            debug!(session = %id, "echo suppressed");
            continue;
        }
        let msg = Message::with_prefix(
            hostmask.clone(),
            "PRIVMSG",
            vec![channel.clone(), delivered.clone()],
        );
        let _ = sess.tx.send(msg);
    }
}

/// Single teardown path: drop the session's bookkeeping. Safe for sessions
/// that never reached `Ready`. The transport closes when the session task
/// drops its framed stream; the backend connection and naming map are shared
/// and untouched.
pub async fn on_client_disconnect(state: &SharedState, id: SessionId) {
    let mut st = state.write().await;
    if st.sessions.remove(&id).is_some() {
        debug!(session = %id, "session removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Conversation;
    use pretty_assertions::assert_eq;

    fn snapshot() -> Snapshot {
        Snapshot {
            self_user: UserId("u-alice".into()),
            users: vec![
                User {
                    id: UserId("u-alice".into()),
                    full_name: "alice".into(),
                    chat_id: "1001".into(),
                },
                User {
                    id: UserId("u-bob".into()),
                    full_name: "bob".into(),
                    chat_id: "1002".into(),
                },
            ],
            conversations: vec![Conversation {
                id: ConvId("c-general".into()),
                name: "general".into(),
                members: vec![UserId("u-alice".into()), UserId("u-bob".into())],
            }],
        }
    }

    struct NullBackend;

    #[async_trait::async_trait]
    impl Backend for NullBackend {
        async fn send_message(
            &self,
            _conversation: &ConvId,
            _text: &str,
        ) -> Result<(), crate::backend::SendError> {
            Ok(())
        }
    }

    async fn ready_state() -> SharedState {
        let state = GatewayState::shared(false);
        on_backend_ready(&state, Arc::new(NullBackend), snapshot()).await;
        state
    }

    async fn add_session(
        state: &SharedState,
        nick: &str,
    ) -> (SessionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::next();
        let mut handle = SessionHandle::new(tx);
        handle.nick = Some(nick.to_owned());
        handle.ready = true;
        state.write().await.sessions.insert(id, handle);
        (id, rx)
    }

    fn chat(text: &str, sender: &str) -> BackendEvent {
        BackendEvent::ChatMessage {
            conversation: ConvId("c-general".into()),
            sender: UserId(sender.into()),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn synthetic_join_precedes_message() {
        let state = ready_state().await;
        let (_id, mut rx) = add_session(&state, "carol").await;

        on_backend_event(&state, chat("hello", "u-bob")).await;

        let join = rx.try_recv().unwrap();
        assert_eq!(join.command, "JOIN");
        assert_eq!(join.params, vec!["#general"]);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.prefix.as_deref(), Some("bob!1002@palaver"));
        assert_eq!(msg.params, vec!["#general", "hello"]);
    }

    #[tokio::test]
    async fn no_second_synthetic_join() {
        let state = ready_state().await;
        let (_id, mut rx) = add_session(&state, "carol").await;

        on_backend_event(&state, chat("one", "u-bob")).await;
        on_backend_event(&state, chat("two", "u-bob")).await;

        let commands: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.command)
            .collect();
        assert_eq!(commands, vec!["JOIN", "PRIVMSG", "PRIVMSG"]);
    }

    #[tokio::test]
    async fn own_echo_suppressed_others_still_delivered() {
        let state = ready_state().await;
        let (alice_id, mut alice_rx) = add_session(&state, "alice").await;
        let (_bob_id, mut bob_rx) = add_session(&state, "carol").await;

        // alice sent "hi" through the gateway; the backend echoes it back.
        state
            .write()
            .await
            .sessions
            .get_mut(&alice_id)
            .unwrap()
            .record_sent("hi");
        on_backend_event(&state, chat("hi", "u-alice")).await;

        let alice_cmds: Vec<String> = std::iter::from_fn(|| alice_rx.try_recv().ok())
            .map(|m| m.command)
            .collect();
        assert_eq!(alice_cmds, vec!["JOIN"], "echo must not be redelivered");

        let carol_cmds: Vec<String> = std::iter::from_fn(|| bob_rx.try_recv().ok())
            .map(|m| m.command)
            .collect();
        assert_eq!(carol_cmds, vec!["JOIN", "PRIVMSG"]);

        // The pending entry was consumed: a second identical event delivers.
        on_backend_event(&state, chat("hi", "u-alice")).await;
        let redelivered = alice_rx.try_recv().unwrap();
        assert_eq!(redelivered.command, "PRIVMSG");
    }

    #[tokio::test]
    async fn same_text_different_sender_not_suppressed() {
        let state = ready_state().await;
        let (alice_id, mut alice_rx) = add_session(&state, "alice").await;

        state
            .write()
            .await
            .sessions
            .get_mut(&alice_id)
            .unwrap()
            .record_sent("hi");
        on_backend_event(&state, chat("hi", "u-bob")).await;

        let cmds: Vec<String> = std::iter::from_fn(|| alice_rx.try_recv().ok())
            .map(|m| m.command)
            .collect();
        assert_eq!(cmds, vec!["JOIN", "PRIVMSG"]);
    }

    #[tokio::test]
    async fn unmapped_conversation_dropped() {
        let state = ready_state().await;
        let (_id, mut rx) = add_session(&state, "carol").await;

        on_backend_event(
            &state,
            BackendEvent::ChatMessage {
                conversation: ConvId("c-nowhere".into()),
                sender: UserId("u-bob".into()),
                text: "lost".into(),
            },
        )
        .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn conversation_added_becomes_routable() {
        let state = ready_state().await;
        let (_id, mut rx) = add_session(&state, "carol").await;

        on_backend_event(
            &state,
            BackendEvent::ConversationAdded(Conversation {
                id: ConvId("c-new".into()),
                name: "project x".into(),
                members: vec![UserId("u-bob".into())],
            }),
        )
        .await;
        on_backend_event(
            &state,
            BackendEvent::ChatMessage {
                conversation: ConvId("c-new".into()),
                sender: UserId("u-bob".into()),
                text: "kickoff".into(),
            },
        )
        .await;

        let join = rx.try_recv().unwrap();
        assert_eq!(join.params, vec!["#project_x"]);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.params, vec!["#project_x", "kickoff"]);
    }

    #[tokio::test]
    async fn not_ready_sessions_skipped() {
        let state = ready_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = SessionId::next();
        state
            .write()
            .await
            .sessions
            .insert(id, SessionHandle::new(tx));

        on_backend_event(&state, chat("hello", "u-bob")).await;
        assert!(rx.try_recv().is_err());
        on_client_disconnect(&state, id).await;
        assert!(state.read().await.sessions.is_empty());
    }

    #[test]
    fn pending_echo_is_bounded() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = SessionHandle::new(tx);
        for i in 0..(MAX_PENDING_ECHO + 5) {
            handle.record_sent(&format!("m{i}"));
        }
        assert_eq!(handle.pending_echo.len(), MAX_PENDING_ECHO);
        // Oldest entries were evicted.
        assert!(!handle.pending_echo.iter().any(|t| t == "m0"));
        assert!(handle.pending_echo.iter().any(|t| t == "m5"));
    }
}
