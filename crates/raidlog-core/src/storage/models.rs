/// One recorded boss attempt, unique per content hash.
#[derive(Debug, Clone)]
pub struct Encounter {
    pub id: i64,
    pub content_hash: String,
    pub trigger_id: i64,
    pub fight_name: String,
    pub zone: String,
    pub wing: i64,
    pub mode: String,
    pub is_cm: bool,
    pub is_legendary_cm: bool,
    pub success: bool,
    pub duration_ms: i64,
    pub started_at: String,
    pub permalink: Option<String>,
    pub phase_reached: i64,
    pub remaining_health_pct: f64,
    pub source_name: String,
    pub storage_path: Option<String>,
    pub imported_at: String,
}

/// An account, created the first time it appears in a log.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: i64,
    pub account: String,
    pub first_seen: String,
}

/// Per-player snapshot for one encounter.
#[derive(Debug, Clone)]
pub struct PlayerEncounterResult {
    pub id: i64,
    pub encounter_id: i64,
    pub player_id: i64,
    pub account: String,
    pub character_name: String,
    pub profession: String,
    pub subgroup: i64,
    pub dps: f64,
    pub power_dps: f64,
    pub condi_dps: f64,
    pub damage: i64,
    pub damage_taken: i64,
    pub down_count: i64,
    pub dead_count: i64,
    pub dodge_count: i64,
    pub resurrects: i64,
    pub condi_cleanse: i64,
    pub boon_strips: i64,
    pub quickness_generation: f64,
    pub alacrity_generation: f64,
    pub healing: Option<i64>,
    pub hps: Option<f64>,
    pub barrier: Option<i64>,
    pub bps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MechanicEvent {
    pub id: i64,
    pub encounter_id: i64,
    pub player_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub actor: String,
    pub time_ms: i64,
}

/// Outbox row. `processed_at` is set once by the delivery process.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub id: i64,
    pub encounter_id: Option<i64>,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
    pub processed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterMember {
    pub account: String,
    pub added_at: String,
}
