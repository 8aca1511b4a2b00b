/// Client session — one connection's protocol state machine.
///
/// Drives the line protocol from handshake to teardown: NICK/USER
/// negotiation, the welcome sequence, channel commands, and the outbound
/// queue that other tasks (backend fan-out) deliver through. Replies are
/// composed under the state lock but sent only after it is released.
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::irc::codec::{CodecError, LineCodec};
use crate::irc::command::ClientCommand;
use crate::irc::message::Message;
use crate::irc::replies::*;
use crate::names;

use super::{on_client_disconnect, SessionHandle, SessionId, SharedState, SERVER_NAME};

type Transport = Framed<TcpStream, LineCodec>;
type SessionError = Box<dyn std::error::Error + Send + Sync>;

/// Whether the session survives the command it just handled.
enum Flow {
    Continue,
    Close,
}

/// Handshake-side state kept by the session task itself; the shared
/// [`SessionHandle`] mirrors only what fan-out needs (nick, ready, joined,
/// pending echoes).
#[derive(Default)]
struct Negotiation {
    nick: Option<String>,
    username: Option<String>,
    ready: bool,
}

impl Negotiation {
    /// The nick replies are addressed to. `*` before NICK, as servers do.
    fn nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }
}

/// Run one client session to completion. Registers the session on entry and
/// removes it on the single teardown path, whatever state it died in.
pub async fn run(socket: TcpStream, state: SharedState) -> Result<(), SessionError> {
    let mut framed = Framed::new(socket, LineCodec);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = SessionId::next();
    state
        .write()
        .await
        .sessions
        .insert(id, SessionHandle::new(tx));

    let result = drive(&mut framed, &mut rx, id, &state).await;
    on_client_disconnect(&state, id).await;
    result
}

async fn drive(
    framed: &mut Transport,
    rx: &mut mpsc::UnboundedReceiver<Message>,
    id: SessionId,
    state: &SharedState,
) -> Result<(), SessionError> {
    let mut neg = Negotiation::default();

    loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    Some(Ok(line)) => line,
                    Some(Err(CodecError::InvalidUtf8)) => {
                        // Bad data (TLS client on a plaintext port?) — skip the line.
                        warn!(session = %id, "undecodable line skipped");
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(session = %id, "transport error: {e}");
                        break;
                    }
                    None => break,
                };

                // An empty line is this protocol's disconnect convention.
                if line.is_empty() {
                    debug!(session = %id, "empty line, closing session");
                    break;
                }
                debug!(session = %id, %line, "received");

                let Some(cmd) = ClientCommand::parse(&line) else {
                    continue;
                };
                match handle_command(framed, id, state, &mut neg, cmd).await? {
                    Flow::Continue => {}
                    Flow::Close => break,
                }
            }

            // Backend fan-out and other tasks deliver through the queue.
            Some(msg) = rx.recv() => {
                framed.send(msg).await?;
            }
        }
    }

    Ok(())
}

async fn handle_command(
    framed: &mut Transport,
    id: SessionId,
    state: &SharedState,
    neg: &mut Negotiation,
    cmd: ClientCommand,
) -> Result<Flow, SessionError> {
    match cmd {
        ClientCommand::Nick(nick) => {
            neg.nick = Some(nick.clone());
            if let Some(sess) = state.write().await.sessions.get_mut(&id) {
                sess.nick = Some(nick);
            }
            complete_handshake(framed, id, state, neg).await
        }

        ClientCommand::User(username) => {
            neg.username = Some(username);
            complete_handshake(framed, id, state, neg).await
        }

        ClientCommand::Ping(token) => {
            let mut params = vec![SERVER_NAME.clone()];
            params.extend(token);
            framed.send(server_reply("PONG", params)).await?;
            Ok(Flow::Continue)
        }

        ClientCommand::Unknown(command) => {
            debug!(session = %id, %command, "ignored");
            Ok(Flow::Continue)
        }

        // Channel commands are gated on a completed handshake.
        _ if !neg.ready => {
            let reply = server_reply(
                ERR_NOTREGISTERED,
                vec![neg.nick().to_owned(), "You have not registered".into()],
            );
            framed.send(reply).await?;
            Ok(Flow::Continue)
        }

        ClientCommand::List => {
            let replies = {
                let st = state.read().await;
                let nick = neg.nick();
                let mut replies = vec![server_reply(
                    RPL_LISTSTART,
                    vec![nick.into(), "Channel".into(), "Users  Name".into()],
                )];
                for conv in st.conversations.values() {
                    let Some(channel) = st.channels.name_for(&conv.id) else {
                        continue;
                    };
                    replies.push(server_reply(
                        RPL_LIST,
                        vec![
                            nick.into(),
                            channel.into(),
                            conv.members.len().to_string(),
                            names::topic_for(conv),
                        ],
                    ));
                }
                replies.push(server_reply(
                    RPL_LISTEND,
                    vec![nick.into(), "End of /LIST".into()],
                ));
                replies
            };
            send_all(framed, replies).await
        }

        ClientCommand::Privmsg { target, text } => {
            let forward = {
                let mut st = state.write().await;
                match st.channels.resolve(&target).cloned() {
                    Some(conv_id) => {
                        if let Some(sess) = st.sessions.get_mut(&id) {
                            sess.record_sent(&text);
                        }
                        st.backend.clone().map(|backend| (backend, conv_id))
                    }
                    None => None,
                }
            };
            match forward {
                Some((backend, conv_id)) => {
                    // Send failure is a logged warning only: the line protocol
                    // has no reliable NACK channel, and there are no retries.
                    if let Err(e) = backend.send_message(&conv_id, &text).await {
                        warn!(session = %id, conversation = %conv_id, "backend send failed: {e}");
                    }
                    Ok(Flow::Continue)
                }
                None => {
                    framed.send(no_such_channel(neg.nick(), &target)).await?;
                    Ok(Flow::Continue)
                }
            }
        }

        ClientCommand::Join(channels) => {
            for channel in channels {
                let replies = {
                    let mut st = state.write().await;
                    match st.channels.resolve(&channel).cloned() {
                        Some(conv_id) => {
                            if let Some(sess) = st.sessions.get_mut(&id) {
                                sess.joined.insert(channel.clone());
                            }
                            let nick = neg.nick();
                            let conv = st.conversations.get(&conv_id);
                            let topic = conv
                                .map(names::topic_for)
                                .unwrap_or_else(|| "Unknown".into());
                            let members = conv
                                .map(|c| {
                                    c.members
                                        .iter()
                                        .filter_map(|uid| st.users.get(uid))
                                        .map(names::nick_for)
                                        .collect::<Vec<_>>()
                                })
                                .unwrap_or_default();
                            vec![
                                Message::with_prefix(
                                    format!("{nick}!{nick}@palaver"),
                                    "JOIN",
                                    vec![channel.clone()],
                                ),
                                server_reply(
                                    RPL_TOPIC,
                                    vec![nick.into(), channel.clone(), topic],
                                ),
                                server_reply(
                                    RPL_NAMREPLY,
                                    vec![
                                        nick.into(),
                                        "=".into(),
                                        channel.clone(),
                                        members.join(" "),
                                    ],
                                ),
                                server_reply(
                                    RPL_ENDOFNAMES,
                                    vec![
                                        nick.into(),
                                        channel.clone(),
                                        "End of /NAMES list".into(),
                                    ],
                                ),
                            ]
                        }
                        None => vec![no_such_channel(neg.nick(), &channel)],
                    }
                };
                send_all(framed, replies).await?;
            }
            Ok(Flow::Continue)
        }

        ClientCommand::Who(target) => {
            let replies = {
                let st = state.read().await;
                let nick = neg.nick();
                let mut replies = Vec::new();
                if target.starts_with('#') {
                    match st.channels.resolve(&target) {
                        Some(conv_id) => {
                            if let Some(conv) = st.conversations.get(conv_id) {
                                for user in
                                    conv.members.iter().filter_map(|uid| st.users.get(uid))
                                {
                                    let member = names::nick_for(user);
                                    replies.push(server_reply(
                                        RPL_WHOREPLY,
                                        vec![
                                            nick.into(),
                                            target.clone(),
                                            member.clone(),
                                            "palaver".into(),
                                            SERVER_NAME.clone(),
                                            member,
                                            "H".into(),
                                            format!("0 {}", user.full_name),
                                        ],
                                    ));
                                }
                            }
                        }
                        None => replies.push(no_such_channel(nick, &target)),
                    }
                }
                replies.push(server_reply(
                    RPL_ENDOFWHO,
                    vec![nick.into(), target.clone(), "End of /WHO list".into()],
                ));
                replies
            };
            send_all(framed, replies).await
        }

        ClientCommand::Mode(target) => {
            let reply = {
                let st = state.read().await;
                let nick = neg.nick();
                if target.starts_with('#') {
                    match st.channels.resolve(&target) {
                        Some(_) => server_reply(
                            RPL_CHANNELMODEIS,
                            vec![nick.into(), target.clone(), "+".into()],
                        ),
                        None => no_such_channel(nick, &target),
                    }
                } else {
                    server_reply(RPL_UMODEIS, vec![nick.into(), "+".into()])
                }
            };
            framed.send(reply).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Complete the handshake once both nickname and username are known.
///
/// If the backend is not connected yet the session is told so and closed —
/// the client is expected to reconnect. On success, sends the welcome reply,
/// asserts the backend account's identity as the effective nickname, and
/// closes with the three-line MOTD banner; joined-channel tracking starts
/// empty here.
async fn complete_handshake(
    framed: &mut Transport,
    id: SessionId,
    state: &SharedState,
    neg: &mut Negotiation,
) -> Result<Flow, SessionError> {
    if neg.ready || neg.nick.is_none() || neg.username.is_none() {
        return Ok(Flow::Continue);
    }
    let nick = neg.nick().to_owned();

    let (connected, self_nick) = {
        let st = state.read().await;
        (st.connected, st.self_nick())
    };
    if !connected {
        warn!(session = %id, "handshake before backend ready, closing");
        framed
            .send(Message::new(
                "ERROR",
                vec!["Backend not connected, try again later".into()],
            ))
            .await?;
        return Ok(Flow::Close);
    }

    neg.ready = true;
    {
        let mut st = state.write().await;
        if let Some(sess) = st.sessions.get_mut(&id) {
            sess.ready = true;
            sess.nick = Some(nick.clone());
            sess.joined.clear();
        }
    }

    let identity = self_nick.unwrap_or_else(|| nick.clone());
    let welcome = vec![
        server_reply(
            RPL_WELCOME,
            vec![nick.clone(), "Welcome to palaver!".into()],
        ),
        Message::with_prefix(format!("{nick}!{nick}@palaver"), "NICK", vec![identity]),
        server_reply(
            RPL_MOTDSTART,
            vec![nick.clone(), "- palaver Message of the Day -".into()],
        ),
        server_reply(
            RPL_MOTD,
            vec![
                nick.clone(),
                "- Conversations appear as channels as messages arrive".into(),
            ],
        ),
        server_reply(
            RPL_ENDOFMOTD,
            vec![nick.clone(), "End of MOTD command".into()],
        ),
    ];
    send_all(framed, welcome).await?;
    info!(session = %id, %nick, "session ready");
    Ok(Flow::Continue)
}

fn server_reply(command: &str, params: Vec<String>) -> Message {
    Message::with_prefix(SERVER_NAME.clone(), command, params)
}

fn no_such_channel(nick: &str, channel: &str) -> Message {
    server_reply(
        ERR_NOSUCHCHANNEL,
        vec![nick.to_owned(), channel.to_owned(), "No such channel".into()],
    )
}

async fn send_all(framed: &mut Transport, replies: Vec<Message>) -> Result<Flow, SessionError> {
    for msg in replies {
        framed.send(msg).await?;
    }
    Ok(Flow::Continue)
}
