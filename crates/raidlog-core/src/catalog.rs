//! Static encounter knowledge: zone classification, skip lists and buff ids.

pub const QUICKNESS_BUFF_ID: i64 = 1187;
pub const ALACRITY_BUFF_ID: i64 = 30328;

/// A scripted event that is logged like a fight but is not a boss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoredEvent {
    pub name: &'static str,
    /// Every trigger id the parser reports for a part of this event.
    pub trigger_ids: &'static [i64],
}

pub const IGNORED_EVENTS: &[IgnoredEvent] = &[
    IgnoredEvent {
        name: "Spirit Race",
        trigger_ids: &[],
    },
    IgnoredEvent {
        name: "Escort",
        trigger_ids: &[16253],
    },
    IgnoredEvent {
        name: "Twisted Castle",
        trigger_ids: &[16247],
    },
    IgnoredEvent {
        name: "River of Souls",
        trigger_ids: &[19828],
    },
    IgnoredEvent {
        name: "Statues of Grenth",
        trigger_ids: &[19691, 19536, 19651, 19844],
    },
];

/// Targets that the parser logs as their own fight inside an ignored event
/// and that must still be tracked individually.
pub const TRACKED_SUB_ENCOUNTERS: &[&str] = &[
    "Broken King",
    "Eater of Souls",
    "Eye of Judgment",
    "Eye of Fate",
];

/// Successful-kill totals that emit a milestone notification.
pub const KILL_MILESTONES: &[i64] = &[
    50, 100, 250, 500, 750, 1000, 1500, 2000, 2500, 5000, 10000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub name: &'static str,
    pub wing: i64,
}

const UNKNOWN_ZONE: Zone = Zone {
    name: "Unknown",
    wing: 0,
};

pub fn zone_for_trigger(trigger_id: i64) -> Zone {
    let (name, wing) = match trigger_id {
        15438 | 15429 | 15375 => ("Spirit Vale", 1),
        16123 | 16088 | 16115 => ("Salvation Pass", 2),
        16253 | 16235 | 16247 | 16246 => ("Stronghold of the Faithful", 3),
        17194 | 17172 | 17188 | 17154 => ("Bastion of the Penitent", 4),
        19767 | 19828 | 19691 | 19536 | 19651 | 19844 | 19450 => ("Hall of Chains", 5),
        43974 | 21105 | 20934 => ("Mythwright Gambit", 6),
        22006 | 21964 | 22000 => ("The Key of Ahdashim", 7),
        26725 | 26774 | 26712 => ("Mount Balrior", 8),
        _ => return UNKNOWN_ZONE,
    };
    Zone { name, wing }
}

/// Fight names carry a mode suffix on some parser versions.
fn base_name(fight_name: &str) -> &str {
    let trimmed = fight_name.trim();
    trimmed
        .strip_suffix(" LCM")
        .or_else(|| trimmed.strip_suffix(" CM"))
        .unwrap_or(trimmed)
}

/// The ignored event an encounter belongs to, by trigger id or by the event
/// name appearing in the fight name.
pub fn containing_ignored_event(trigger_id: i64, fight_name: &str) -> Option<&'static IgnoredEvent> {
    let name = fight_name.to_ascii_lowercase();
    IGNORED_EVENTS.iter().find(|event| {
        event.trigger_ids.contains(&trigger_id) || name.contains(&event.name.to_ascii_lowercase())
    })
}

/// Whether an encounter should be excluded from import. Tracked sub-encounters
/// are kept even when their containing event is ignored.
pub fn is_ignored(trigger_id: i64, fight_name: &str) -> bool {
    if containing_ignored_event(trigger_id, fight_name).is_none() {
        return false;
    }
    let name = base_name(fight_name);
    !TRACKED_SUB_ENCOUNTERS
        .iter()
        .any(|tracked| tracked.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Normal,
    Challenge,
    LegendaryChallenge,
}

impl Mode {
    pub fn from_flags(is_cm: bool, is_legendary_cm: bool) -> Self {
        if is_legendary_cm {
            Mode::LegendaryChallenge
        } else if is_cm {
            Mode::Challenge
        } else {
            Mode::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Challenge => "cm",
            Mode::LegendaryChallenge => "lcm",
        }
    }
}
