/// Client command parsing.
///
/// Each received line is parsed into one variant of a closed command set,
/// carrying its validated arguments; the session dispatches on the variant
/// exhaustively. Command tokens are matched case-sensitively. Anything the
/// gateway does not understand — unknown commands as well as known commands
/// with missing arguments — becomes [`ClientCommand::Unknown`] and is ignored
/// without a reply.
use super::message::Message;

/// The subset of client commands the gateway reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `NICK <name>`
    Nick(String),
    /// `USER <name> ...` — only the username is kept.
    User(String),
    /// `LIST`
    List,
    /// `PRIVMSG <target> <text>`
    Privmsg { target: String, text: String },
    /// `JOIN <chan1,chan2,...>`
    Join(Vec<String>),
    /// `WHO <target>`
    Who(String),
    /// `MODE <target>`
    Mode(String),
    /// `PING [token]`
    Ping(Option<String>),
    /// Anything else; carries the raw command token for logging.
    Unknown(String),
}

impl ClientCommand {
    /// Parse a raw protocol line. Returns `None` for lines that do not parse
    /// as an IRC message at all.
    pub fn parse(line: &str) -> Option<Self> {
        let msg = Message::parse(line).ok()?;
        Some(Self::from_message(msg))
    }

    fn from_message(msg: Message) -> Self {
        let mut params = msg.params.into_iter();
        match msg.command.as_str() {
            "NICK" => match params.next() {
                Some(nick) if !nick.is_empty() => Self::Nick(nick),
                _ => Self::Unknown("NICK".into()),
            },
            "USER" => match params.next() {
                Some(user) if !user.is_empty() => Self::User(user),
                _ => Self::Unknown("USER".into()),
            },
            "LIST" => Self::List,
            "PRIVMSG" => {
                let target = params.next();
                // Rejoin what positional splitting may have broken apart; a
                // leading `:` was already handled as the trailing marker.
                let text = params.collect::<Vec<_>>().join(" ");
                match target {
                    Some(target) if !text.is_empty() => Self::Privmsg { target, text },
                    _ => Self::Unknown("PRIVMSG".into()),
                }
            }
            "JOIN" => match params.next() {
                Some(list) => {
                    let channels: Vec<String> = list
                        .split(',')
                        .filter(|c| !c.is_empty())
                        .map(str::to_owned)
                        .collect();
                    if channels.is_empty() {
                        Self::Unknown("JOIN".into())
                    } else {
                        Self::Join(channels)
                    }
                }
                None => Self::Unknown("JOIN".into()),
            },
            "WHO" => match params.next() {
                Some(target) => Self::Who(target),
                None => Self::Unknown("WHO".into()),
            },
            "MODE" => match params.next() {
                Some(target) => Self::Mode(target),
                None => Self::Unknown("MODE".into()),
            },
            "PING" => Self::Ping(params.next()),
            other => Self::Unknown(other.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_nick_and_user() {
        assert_eq!(
            ClientCommand::parse("NICK alice"),
            Some(ClientCommand::Nick("alice".into()))
        );
        assert_eq!(
            ClientCommand::parse("USER alice 0 * :Alice Example"),
            Some(ClientCommand::User("alice".into()))
        );
    }

    #[test]
    fn parse_privmsg_strips_leading_colon() {
        assert_eq!(
            ClientCommand::parse("PRIVMSG #general :hello there"),
            Some(ClientCommand::Privmsg {
                target: "#general".into(),
                text: "hello there".into(),
            })
        );
    }

    #[test]
    fn parse_privmsg_without_colon() {
        // Clients may omit the trailing colon on single-word texts.
        assert_eq!(
            ClientCommand::parse("PRIVMSG #general hi"),
            Some(ClientCommand::Privmsg {
                target: "#general".into(),
                text: "hi".into(),
            })
        );
    }

    #[test]
    fn parse_join_splits_on_commas() {
        assert_eq!(
            ClientCommand::parse("JOIN #general,#random"),
            Some(ClientCommand::Join(vec![
                "#general".into(),
                "#random".into()
            ]))
        );
    }

    #[test]
    fn parse_ping_token_optional() {
        assert_eq!(ClientCommand::parse("PING"), Some(ClientCommand::Ping(None)));
        assert_eq!(
            ClientCommand::parse("PING :palaver.local"),
            Some(ClientCommand::Ping(Some("palaver.local".into())))
        );
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(
            ClientCommand::parse("nick alice"),
            Some(ClientCommand::Unknown("nick".into()))
        );
    }

    #[test]
    fn malformed_known_command_is_unknown() {
        assert_eq!(
            ClientCommand::parse("PRIVMSG #general"),
            Some(ClientCommand::Unknown("PRIVMSG".into()))
        );
        assert_eq!(
            ClientCommand::parse("JOIN"),
            Some(ClientCommand::Unknown("JOIN".into()))
        );
    }

    #[test]
    fn unparseable_line_is_none() {
        assert_eq!(ClientCommand::parse(":prefix_only"), None);
    }
}
