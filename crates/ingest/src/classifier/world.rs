//! World and mission lines, plus the markers that are always suppressed.
//!
//! ```text
//! LogSFPS: AirDrop id=<id> status=Flying
//! LogSFPS: HeliCrash id=<id> status=Initial
//! LogSFPS: Trader id=<id> status=Initial
//! LogSFPS: Mission id=<id> level=<n> state=Ready
//! ```

use std::collections::HashMap;

use regex::Regex;

use emerald_core::event::LogEvent;
use emerald_core::types::WorldEventKind;

use super::{Classification, SuppressReason};
use crate::error::IngestError;

const AIRDROP_QUALIFYING: &str = "Flying";
const HELI_CRASH_QUALIFYING: &str = "Initial";
const TRADER_QUALIFYING: &str = "Initial";
const MISSION_QUALIFYING: &str = "Ready";

pub(crate) struct WorldPatterns {
    construction_save: Regex,
    encounter_reset: Regex,
    world: Regex,
}

impl WorldPatterns {
    pub(crate) fn new() -> Result<Self, IngestError> {
        Ok(Self {
            construction_save: Regex::new(r"(?i)LogSFPS:\s*Construction.*save|SaveConstructions")?,
            encounter_reset: Regex::new(r"(?i)LogSFPS:\s*Encounter.*reset")?,
            world: Regex::new(r"LogSFPS:\s*(AirDrop|HeliCrash|Trader|Mission)\s+(.*)$")?,
        })
    }

    pub(crate) fn suppressed_marker(&self, body: &str) -> Option<SuppressReason> {
        if self.construction_save.is_match(body) {
            Some(SuppressReason::ConstructionSave)
        } else if self.encounter_reset.is_match(body) {
            Some(SuppressReason::EncounterReset)
        } else {
            None
        }
    }

    /// `None` if the line is not a world line.
    pub(crate) fn classify(&self, body: &str, mission_min_level: u8) -> Option<Classification> {
        let caps = self.world.captures(body)?;
        let fields = key_values(caps.get(2).map_or("", |m| m.as_str()));

        let classification = match &caps[1] {
            "AirDrop" => status_event(WorldEventKind::Airdrop, &fields, AIRDROP_QUALIFYING),
            "HeliCrash" => status_event(WorldEventKind::HeliCrash, &fields, HELI_CRASH_QUALIFYING),
            "Trader" => status_event(WorldEventKind::Trader, &fields, TRADER_QUALIFYING),
            _ => mission_event(&fields, mission_min_level),
        };
        Some(classification)
    }
}

/// `key=value` tokens, keys lower-cased. Tokens without `=` are ignored.
fn key_values(rest: &str) -> HashMap<String, &str> {
    rest.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}

fn status_event(
    kind: WorldEventKind,
    fields: &HashMap<String, &str>,
    qualifying: &str,
) -> Classification {
    let (Some(id), Some(status)) = (fields.get("id"), fields.get("status")) else {
        return Classification::Unclassified;
    };

    if !status.eq_ignore_ascii_case(qualifying) {
        return Classification::Suppressed(SuppressReason::WorldStatus {
            kind,
            status: (*status).to_owned(),
        });
    }

    let event_id = (*id).to_owned();
    Classification::Event(match kind {
        WorldEventKind::Airdrop => LogEvent::Airdrop { event_id },
        WorldEventKind::HeliCrash => LogEvent::HeliCrash { event_id },
        WorldEventKind::Trader => LogEvent::Trader { event_id },
        WorldEventKind::Mission => return Classification::Unclassified,
    })
}

fn mission_event(fields: &HashMap<String, &str>, min_level: u8) -> Classification {
    let (Some(id), Some(level), Some(state)) =
        (fields.get("id"), fields.get("level"), fields.get("state"))
    else {
        return Classification::Unclassified;
    };
    let Ok(level) = level.parse::<u64>() else {
        return Classification::Unclassified;
    };
    let level = u8::try_from(level).unwrap_or(u8::MAX);

    if !state.eq_ignore_ascii_case(MISSION_QUALIFYING) {
        return Classification::Suppressed(SuppressReason::MissionNotReady {
            state: (*state).to_owned(),
        });
    }
    if level < min_level {
        return Classification::Suppressed(SuppressReason::MissionBelowLevel { level });
    }

    Classification::Event(LogEvent::Mission {
        mission_id: (*id).to_owned(),
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> Option<Classification> {
        WorldPatterns::new().unwrap().classify(line, 3)
    }

    fn marker(line: &str) -> Option<SuppressReason> {
        WorldPatterns::new().unwrap().suppressed_marker(line)
    }

    #[test]
    fn flying_airdrop_is_emitted() {
        assert_eq!(
            classify("LogSFPS: AirDrop id=drop-7 status=Flying"),
            Some(Classification::Event(LogEvent::Airdrop {
                event_id: "drop-7".to_owned()
            }))
        );
    }

    #[test]
    fn status_comparison_ignores_case() {
        assert!(matches!(
            classify("LogSFPS: AirDrop id=drop-7 status=FLYING"),
            Some(Classification::Event(_))
        ));
        assert!(matches!(
            classify("LogSFPS: Mission id=GA_Military_02_mis1 level=4 state=READY"),
            Some(Classification::Event(LogEvent::Mission { level: 4, .. }))
        ));
    }

    #[test]
    fn non_qualifying_status_is_suppressed() {
        assert_eq!(
            classify("LogSFPS: AirDrop id=drop-7 status=Dropped"),
            Some(Classification::Suppressed(SuppressReason::WorldStatus {
                kind: WorldEventKind::Airdrop,
                status: "Dropped".to_owned(),
            }))
        );
        assert!(matches!(
            classify("LogSFPS: Trader id=t-1 status=Despawned"),
            Some(Classification::Suppressed(_))
        ));
    }

    #[test]
    fn heli_crash_and_trader_require_initial() {
        assert!(matches!(
            classify("LogSFPS: HeliCrash id=crash-2 status=Initial"),
            Some(Classification::Event(LogEvent::HeliCrash { .. }))
        ));
        assert!(matches!(
            classify("LogSFPS: Trader id=t-1 status=initial"),
            Some(Classification::Event(LogEvent::Trader { .. }))
        ));
    }

    #[test]
    fn missions_below_level_or_not_ready_are_suppressed() {
        assert_eq!(
            classify("LogSFPS: Mission id=GA_Settle_05_mis1 level=2 state=Ready"),
            Some(Classification::Suppressed(SuppressReason::MissionBelowLevel {
                level: 2
            }))
        );
        assert_eq!(
            classify("LogSFPS: Mission id=GA_Settle_05_mis1 level=5 state=Initial"),
            Some(Classification::Suppressed(SuppressReason::MissionNotReady {
                state: "Initial".to_owned()
            }))
        );
    }

    #[test]
    fn huge_mission_level_saturates() {
        assert_eq!(
            classify("LogSFPS: Mission id=m9 level=300 state=Ready"),
            Some(Classification::Event(LogEvent::Mission {
                mission_id: "m9".to_owned(),
                level: u8::MAX,
            }))
        );
    }

    #[test]
    fn missing_fields_are_unclassified() {
        assert_eq!(
            classify("LogSFPS: AirDrop status=Flying"),
            Some(Classification::Unclassified)
        );
        assert_eq!(
            classify("LogSFPS: Mission id=m1 state=Ready"),
            Some(Classification::Unclassified)
        );
        assert_eq!(
            classify("LogSFPS: Mission id=m1 level=high state=Ready"),
            Some(Classification::Unclassified)
        );
    }

    #[test]
    fn real_mission_chatter_is_not_a_world_line() {
        assert_eq!(
            classify("LogSFPS: Mission GA_Military_02_mis1 will respawn in 1303"),
            Some(Classification::Unclassified)
        );
        assert_eq!(classify("LogSFPS: playersmaxcount=50"), None);
    }

    #[test]
    fn suppressed_markers() {
        assert_eq!(
            marker("LogSFPS: Construction objects SAVED in 0.3s"),
            Some(SuppressReason::ConstructionSave)
        );
        assert_eq!(
            marker("LogSFPS: SaveConstructions finished"),
            Some(SuppressReason::ConstructionSave)
        );
        assert_eq!(
            marker("LogSFPS: Encounter GA_Camp_03 Reset"),
            Some(SuppressReason::EncounterReset)
        );
        assert_eq!(marker("LogSFPS: AirDrop id=1 status=Flying"), None);
    }
}
