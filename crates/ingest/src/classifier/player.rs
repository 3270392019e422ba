//! Player lifecycle lines: join requests, registrations, channel closes.
//!
//! ```text
//! LogNet: Join request: /Game/Maps/world_0/World_0?logintype=eos&login=Njshh&Name=Njshh&eosid=|0002e69a...
//! LogOnline: Player |0002e69a... successfully registered!
//! LogNet: UChannel::Close: Sending CloseBunch. ChIndex == 0. UniqueId: EOS:|0002e69a...
//! ```

use regex::Regex;

use emerald_core::event::LogEvent;
use emerald_core::types::PlayerId;

use super::Classification;
use crate::error::IngestError;

const JOIN_REQUEST_MARKER: &str = "Join request:";
const CHANNEL_CLOSE_MARKER: &str = "UChannel::Close:";

pub(crate) struct PlayerPatterns {
    registered: Regex,
    unique_id: Regex,
}

impl PlayerPatterns {
    pub(crate) fn new() -> Result<Self, IngestError> {
        Ok(Self {
            registered: Regex::new(r"Player \|?([0-9A-Za-z]+) successfully registered")?,
            unique_id: Regex::new(r"UniqueId: EOS:\|?([0-9A-Za-z]+)")?,
        })
    }

    /// `None` if the line is not a player line at all.
    pub(crate) fn classify(&self, body: &str) -> Option<Classification> {
        if body.contains(JOIN_REQUEST_MARKER) {
            return Some(parse_join_request(body));
        }

        if let Some(caps) = self.registered.captures(body) {
            return Some(Classification::Event(LogEvent::Join {
                player_id: PlayerId::new(&caps[1]),
            }));
        }

        if body.contains(CHANNEL_CLOSE_MARKER) {
            return Some(match self.unique_id.captures(body) {
                Some(caps) => Classification::Event(LogEvent::Disconnect {
                    player_id: PlayerId::new(&caps[1]),
                }),
                // channel closes without a player id are not lifecycle events
                None => Classification::Unclassified,
            });
        }

        None
    }
}

/// Reads `eosid` and the optional `Name` from the request URL.
fn parse_join_request(body: &str) -> Classification {
    let mut player_id = None;
    let mut name = None;

    for token in body.split(|c: char| c.is_whitespace() || c == '?' || c == '&') {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.eq_ignore_ascii_case("eosid") {
            let id = value.trim_start_matches('|');
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) {
                player_id = Some(PlayerId::new(id));
            }
        } else if key.eq_ignore_ascii_case("name") && !value.is_empty() {
            name = Some(value.to_owned());
        }
    }

    match player_id {
        Some(player_id) => Classification::Event(LogEvent::Queue { player_id, name }),
        None => Classification::Unclassified,
    }
}
