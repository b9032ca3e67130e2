//! Numeric reply / error name tables (spec.md section 2, `IrcReply` / `IrcError`).
//!
//! Generated by one macro so the symbolic-name lookup used for unknown-command logging and for
//! `protocol_error` events stays a single source of truth, the way reply-table crates in the
//! wider IRC ecosystem generate their `Response` enums from one table macro.

macro_rules! decl_replies {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        #[allow(non_camel_case_types)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_u16(val: u16) -> Option<Self> {
                match val {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn code(self) -> u16 {
                self as u16
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

decl_replies! {
    IrcReply {
        RPL_WELCOME = 001,
        RPL_YOURHOST = 002,
        RPL_CREATED = 003,
        RPL_MYINFO = 004,
        RPL_ISUPPORT = 005,
        RPL_BOUNCE = 010,
        RPL_UMODEIS = 221,
        RPL_STATSLINKINFO = 211,
        RPL_STATSCOMMANDS = 212,
        RPL_ENDOFSTATS = 219,
        RPL_STATSUPTIME = 242,
        RPL_STATSOLINE = 243,
        RPL_LUSERCLIENT = 251,
        RPL_LUSEROP = 252,
        RPL_LUSERUNKNOWN = 253,
        RPL_LUSERCHANNELS = 254,
        RPL_LUSERME = 255,
        RPL_AWAY = 301,
        RPL_USERHOST = 302,
        RPL_ISON = 303,
        RPL_UNAWAY = 305,
        RPL_NOWAWAY = 306,
        RPL_WHOISUSER = 311,
        RPL_WHOISSERVER = 312,
        RPL_WHOISOPERATOR = 313,
        RPL_WHOWASUSER = 314,
        RPL_ENDOFWHO = 315,
        RPL_WHOISIDLE = 317,
        RPL_ENDOFWHOIS = 318,
        RPL_WHOISCHANNELS = 319,
        RPL_LISTSTART = 321,
        RPL_LIST = 322,
        RPL_LISTEND = 323,
        RPL_CHANNELMODEIS = 324,
        RPL_NOTOPIC = 331,
        RPL_TOPIC = 332,
        RPL_INVITING = 341,
        RPL_VERSION = 351,
        RPL_WHOREPLY = 352,
        RPL_NAMREPLY = 353,
        RPL_LINKS = 364,
        RPL_ENDOFLINKS = 365,
        RPL_ENDOFNAMES = 366,
        RPL_BANLIST = 367,
        RPL_ENDOFBANLIST = 368,
        RPL_ENDOFWHOWAS = 369,
        RPL_MOTD = 372,
        RPL_MOTDSTART = 375,
        RPL_ENDOFMOTD = 376,
        RPL_YOUREOPER = 381,
        RPL_TIME = 391,
    }
}

decl_replies! {
    IrcError {
        ERR_NOSUCHNICK = 401,
        ERR_NOSUCHSERVER = 402,
        ERR_NOSUCHCHANNEL = 403,
        ERR_CANNOTSENDTOCHAN = 404,
        ERR_TOOMANYCHANNELS = 405,
        ERR_WASNOSUCHNICK = 406,
        ERR_TOOMANYTARGETS = 407,
        ERR_NOORIGIN = 409,
        ERR_NORECIPIENT = 411,
        ERR_NOTEXTTOSEND = 412,
        ERR_UNKNOWNCOMMAND = 421,
        ERR_NOMOTD = 422,
        ERR_NONICKNAMEGIVEN = 431,
        ERR_ERRONEUSNICKNAME = 432,
        ERR_NICKNAMEINUSE = 433,
        ERR_USERNOTINCHANNEL = 441,
        ERR_NOTONCHANNEL = 442,
        ERR_USERONCHANNEL = 443,
        ERR_NOTREGISTERED = 451,
        ERR_NEEDMOREPARAMS = 461,
        ERR_ALREADYREGISTRED = 462,
        ERR_PASSWDMISMATCH = 464,
        ERR_YOUREBANNEDCREEP = 465,
        ERR_CHANNELISFULL = 471,
        ERR_UNKNOWNMODE = 472,
        ERR_INVITEONLYCHAN = 473,
        ERR_BANNEDFROMCHAN = 474,
        ERR_BADCHANNELKEY = 475,
        ERR_NOPRIVILEGES = 481,
        ERR_CHANOPRIVSNEEDED = 482,
        ERR_UMODEUNKNOWNFLAG = 501,
        ERR_USERSDONTMATCH = 502,
    }
}

/// Look up the symbolic name for a numeric, trying [`IrcReply`] first and falling back to
/// [`IrcError`]. Used when logging an unrecognized-but-numeric command.
pub fn symbolic_name(code: u16) -> Option<&'static str> {
    IrcReply::from_u16(code)
        .map(IrcReply::name)
        .or_else(|| IrcError::from_u16(code).map(IrcError::name))
}

/// Numeric error range per spec.md section 4.3.
pub fn is_error_range(code: u16) -> bool {
    (400..=599).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_reply() {
        assert_eq!(IrcReply::from_u16(1), Some(IrcReply::RPL_WELCOME));
        assert_eq!(IrcReply::RPL_WELCOME.name(), "RPL_WELCOME");
    }

    #[test]
    fn lookup_known_error() {
        assert_eq!(IrcError::from_u16(433), Some(IrcError::ERR_NICKNAMEINUSE));
        assert_eq!(symbolic_name(433), Some("ERR_NICKNAMEINUSE"));
    }

    #[test]
    fn unknown_numeric_has_no_symbolic_name() {
        assert_eq!(symbolic_name(999), None);
    }

    #[test]
    fn error_range_detection() {
        assert!(is_error_range(401));
        assert!(is_error_range(599));
        assert!(!is_error_range(400 - 1));
        assert!(!is_error_range(600));
    }
}
