/// Numeric reply codes — the fixed small set the gateway emits.
pub const RPL_WELCOME: &str = "001";
pub const RPL_WHOREPLY: &str = "352";
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_LISTSTART: &str = "321";
pub const RPL_LIST: &str = "322";
pub const RPL_LISTEND: &str = "323";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_UMODEIS: &str = "221";
pub const RPL_TOPIC: &str = "332";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const RPL_MOTDSTART: &str = "375";
pub const RPL_MOTD: &str = "372";
pub const RPL_ENDOFMOTD: &str = "376";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_NOTREGISTERED: &str = "451";
