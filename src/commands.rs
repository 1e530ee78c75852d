use crate::settings::{UploadMode, MAX_AUTO_DELETE_MINUTES};

const DEEP_LINK_PREFIX: &str = "get_song_";
const CHECK_SUBSCRIPTION_PREFIX: &str = "checksub_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastTarget {
    Users,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeChange {
    Toggle,
    Set(UploadMode),
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` with its optional deep-link payload.
    Start(Option<String>),
    Admin,
    Stats,
    ToggleQueue,
    UploadMode(ModeChange),
    /// `None` when the argument is missing, not a number or longer than a week.
    SetDelay(Option<u64>),
    Queue,
    Broadcast(Option<BroadcastTarget>),
    SetCookies,
    DelCookies,
    Cookies,
    Unknown(String),
}

impl Command {
    pub fn is_admin_only(&self) -> bool {
        !matches!(self, Command::Start(_) | Command::Unknown(_))
    }
}

/// Parse `/name[@bot] [args]`. Returns `None` only for plain text; anything
/// starting with `/` is a command, and one addressed to another bot (or to
/// any bot while our own username is unknown) comes back as `Unknown`.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, addressee)) => {
            let ours = bot_username.is_some_and(|bot| bot.eq_ignore_ascii_case(addressee));
            if !ours {
                return Some(Command::Unknown(head.to_string()));
            }
            name
        }
        None => head,
    };
    let arg = args.split_whitespace().next();

    let command = match name.to_lowercase().as_str() {
        "start" => Command::Start(arg.map(str::to_string)),
        "admin" => Command::Admin,
        "stats" => Command::Stats,
        "togglequeue" => Command::ToggleQueue,
        "uploadmode" => Command::UploadMode(match arg {
            None => ModeChange::Toggle,
            Some(value) => UploadMode::parse(value)
                .map(ModeChange::Set)
                .unwrap_or_else(|| ModeChange::Invalid(value.to_string())),
        }),
        "setdelay" => Command::SetDelay(
            arg.and_then(|v| v.parse().ok())
                .filter(|minutes| *minutes <= MAX_AUTO_DELETE_MINUTES),
        ),
        "queue" => Command::Queue,
        "broadcast" => Command::Broadcast(match arg.map(str::to_lowercase).as_deref() {
            Some("users") => Some(BroadcastTarget::Users),
            Some("group") => Some(BroadcastTarget::Group),
            _ => None,
        }),
        "setcookies" => Command::SetCookies,
        "delcookies" => Command::DelCookies,
        "cookies" => Command::Cookies,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

/// Track id carried by a `/start get_song_<id>` payload.
pub fn deep_link_track(payload: &str) -> Option<&str> {
    payload.strip_prefix(DEEP_LINK_PREFIX).filter(|id| !id.is_empty())
}

pub fn song_deep_link(bot_username: &str, track_id: &str) -> String {
    format!("https://t.me/{bot_username}?start={DEEP_LINK_PREFIX}{track_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// "Try Again" after being asked to subscribe.
    CheckSubscription(String),
    Unknown,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Self {
        match data.strip_prefix(CHECK_SUBSCRIPTION_PREFIX) {
            Some(id) if !id.is_empty() => CallbackAction::CheckSubscription(id.to_string()),
            _ => CallbackAction::Unknown,
        }
    }

    pub fn check_subscription(track_id: &str) -> String {
        format!("{CHECK_SUBSCRIPTION_PREFIX}{track_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("Never Gonna Give You Up", None), None);
        assert_eq!(parse_command("https://youtu.be/x", None), None);
    }

    #[test]
    fn test_addressed_commands() {
        assert_eq!(parse_command("/stats@SongBot", Some("songbot")), Some(Command::Stats));
        assert_eq!(
            parse_command("/stats@otherbot", Some("songbot")),
            Some(Command::Unknown("stats@otherbot".into()))
        );
        assert_eq!(
            parse_command("/help@otherbot some song", Some("songbot")),
            Some(Command::Unknown("help@otherbot".into()))
        );
        assert_eq!(
            parse_command("/stats@songbot", None),
            Some(Command::Unknown("stats@songbot".into()))
        );
    }

    #[test]
    fn test_arguments() {
        assert_eq!(
            parse_command("/start get_song_dQw4w9WgXcQ", None),
            Some(Command::Start(Some("get_song_dQw4w9WgXcQ".into())))
        );
        assert_eq!(parse_command("/setdelay 5", None), Some(Command::SetDelay(Some(5))));
        assert_eq!(parse_command("/setdelay soon", None), Some(Command::SetDelay(None)));
        assert_eq!(parse_command("/setdelay 10080", None), Some(Command::SetDelay(Some(10080))));
        assert_eq!(parse_command("/setdelay 10081", None), Some(Command::SetDelay(None)));
        assert_eq!(
            parse_command("/setdelay 18446744073709551615", None),
            Some(Command::SetDelay(None))
        );
        assert_eq!(
            parse_command("/uploadmode", None),
            Some(Command::UploadMode(ModeChange::Toggle))
        );
        assert_eq!(
            parse_command("/uploadmode INFO", None),
            Some(Command::UploadMode(ModeChange::Set(UploadMode::Info)))
        );
        assert_eq!(
            parse_command("/uploadmode both", None),
            Some(Command::UploadMode(ModeChange::Invalid("both".into())))
        );
        assert_eq!(
            parse_command("/broadcast group", None),
            Some(Command::Broadcast(Some(BroadcastTarget::Group)))
        );
        assert_eq!(parse_command("/broadcast", None), Some(Command::Broadcast(None)));
        assert_eq!(parse_command("/dance", None), Some(Command::Unknown("dance".into())));
    }

    #[test]
    fn test_admin_only() {
        assert!(Command::Stats.is_admin_only());
        assert!(!Command::Start(None).is_admin_only());
    }

    #[test]
    fn test_deep_links_and_callbacks() {
        assert_eq!(deep_link_track("get_song_abc"), Some("abc"));
        assert_eq!(deep_link_track("get_song_"), None);
        assert_eq!(deep_link_track("hello"), None);
        assert_eq!(song_deep_link("songbot", "abc"), "https://t.me/songbot?start=get_song_abc");

        let data = CallbackAction::check_subscription("abc");
        assert_eq!(CallbackAction::parse(&data), CallbackAction::CheckSubscription("abc".into()));
        assert_eq!(CallbackAction::parse("admin_close"), CallbackAction::Unknown);
    }
}
