//! WhatsApp JID (Jabber ID) types.
//!
//! JIDs are the routing identifiers used on the network. The bridge only
//! needs enough of their structure to tell users from groups, to strip the
//! server decoration before relaying, and to turn a bare phone number into
//! something the session can send to.

use std::fmt;
use std::str::FromStr;

/// Known JID servers on WhatsApp
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
    pub const BROADCAST: &str = "broadcast";
}

/// Separator between the user part and the server part of a JID.
pub const SERVER_SEPARATOR: char = '@';

/// JID represents a WhatsApp endpoint: a user device, a group, or a
/// server-side channel such as the status broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JID {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl JID {
    /// Creates a new regular JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    /// Creates a JID on the default user server.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, servers::DEFAULT_USER)
    }

    /// Returns true if this JID addresses a group chat.
    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Returns true for any broadcast endpoint, including status updates.
    pub fn is_broadcast(&self) -> bool {
        self.server == servers::BROADCAST
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error type for JID parsing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to parse JID: {0}")]
pub struct ParseJIDError(pub String);

impl FromStr for JID {
    type Err = ParseJIDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((user_part, server)) = s.split_once(SERVER_SEPARATOR) else {
            return Ok(JID::new("", s));
        };

        if server.contains(SERVER_SEPARATOR) {
            return Err(ParseJIDError("unexpected number of @ in JID".to_string()));
        }

        // Agent-qualified users (user.agent:device) keep only the user.
        let user_part = match user_part.split_once('.') {
            Some((user, rest)) if server != servers::GROUP => {
                match rest.split_once(':') {
                    Some((_, device)) => return parse_device(user, device, server),
                    None => user,
                }
            }
            _ => user_part,
        };

        match user_part.split_once(':') {
            Some((user, device)) => parse_device(user, device, server),
            None => Ok(JID::new(user_part, server)),
        }
    }
}

fn parse_device(user: &str, device: &str, server: &str) -> Result<JID, ParseJIDError> {
    let device = device
        .parse()
        .map_err(|_| ParseJIDError("failed to parse device from JID".to_string()))?;
    Ok(JID {
        user: user.to_string(),
        device,
        server: server.to_string(),
    })
}

/// Strip the server (and device) decoration off a raw routing identifier,
/// leaving the bare user or group id.
pub fn strip_decoration(raw: &str) -> String {
    match raw.parse::<JID>() {
        Ok(jid) if !jid.user.is_empty() => jid.user,
        _ => raw
            .split(SERVER_SEPARATOR)
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Turn an operator supplied recipient into a routing identifier.
///
/// Anything that already carries a server is passed through untouched. A
/// bare number loses its leading `+` and is addressed on the default user
/// server.
pub fn normalize_recipient(recipient: &str) -> String {
    let recipient = recipient.trim();
    if recipient.contains(SERVER_SEPARATOR) {
        return recipient.to_string();
    }
    let number = recipient.strip_prefix('+').unwrap_or(recipient);
    JID::user(number).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: JID = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 0);
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: JID = "1234567890:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 2);
        assert_eq!(jid.to_string(), "1234567890:2@s.whatsapp.net");
    }

    #[test]
    fn test_parse_ad_jid() {
        let jid: JID = "1234567890.0:1@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 1);
    }

    #[test]
    fn test_parse_rejects_bad_device() {
        assert!("123:abc@s.whatsapp.net".parse::<JID>().is_err());
        assert!("a@b@c".parse::<JID>().is_err());
    }

    #[test]
    fn test_group_jid() {
        let jid: JID = "123456789-1234567890@g.us".parse().unwrap();
        assert_eq!(jid.user, "123456789-1234567890");
        assert!(jid.is_group());
        assert!(!jid.is_broadcast());
    }

    #[test]
    fn test_broadcast_jids() {
        for raw in ["status@broadcast", "1700000000@broadcast"] {
            let jid: JID = raw.parse().unwrap();
            assert!(jid.is_broadcast());
            assert!(!jid.is_group());
        }
    }

    #[test]
    fn test_strip_decoration() {
        assert_eq!(strip_decoration("5511999998888@s.whatsapp.net"), "5511999998888");
        assert_eq!(strip_decoration("5511999998888:12@s.whatsapp.net"), "5511999998888");
        assert_eq!(strip_decoration("120363-99@g.us"), "120363-99");
        assert_eq!(strip_decoration("plain"), "plain");
    }

    #[test]
    fn test_normalize_recipient() {
        assert_eq!(
            normalize_recipient("5511999998888"),
            "5511999998888@s.whatsapp.net"
        );
        assert_eq!(
            normalize_recipient("+5511999998888"),
            "5511999998888@s.whatsapp.net"
        );
        assert_eq!(normalize_recipient("120363-99@g.us"), "120363-99@g.us");
    }
}
