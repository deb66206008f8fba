//! The parser's JSON output and its decoding into domain records.
//!
//! Raw structs mirror the tool's camelCase schema and default every field the
//! tool may omit. Nested detail blocks that vary between tool versions (the
//! extended healing and barrier stats) are kept as untyped JSON and decoded
//! defensively into zeroed values instead of failing the whole log.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::catalog::{self, Mode, Zone, ALACRITY_BUFF_ID, QUICKNESS_BUFF_ID};
use crate::error::{Error, Result};
use crate::hasher;

// ── Raw tool output ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(rename = "triggerID", default)]
    pub trigger_id: i64,
    #[serde(default)]
    pub fight_name: String,
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "isCM", default)]
    pub is_cm: bool,
    #[serde(rename = "isLegendaryCM", default)]
    pub is_legendary_cm: bool,
    #[serde(default)]
    pub is_late_start: bool,
    #[serde(rename = "durationMS", default)]
    pub duration_ms: i64,
    // Typed loosely: tool versions disagree on string vs number here.
    pub time_start_std: Option<Value>,
    #[serde(rename = "timeStartISO")]
    pub time_start_iso: Option<Value>,
    pub time_start_ms: Option<Value>,
    pub time_start: Option<Value>,
    #[serde(default)]
    pub upload_links: Vec<String>,
    #[serde(default)]
    pub players: Vec<RawPlayer>,
    #[serde(default)]
    pub mechanics: Vec<RawMechanic>,
    #[serde(default)]
    pub phases: Vec<RawPhase>,
    #[serde(default)]
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlayer {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profession: String,
    #[serde(default)]
    pub group: i64,
    /// Per target, per phase.
    #[serde(default)]
    pub dps_targets: Vec<Vec<RawDps>>,
    /// Per phase.
    #[serde(default)]
    pub dps_all: Vec<RawDps>,
    #[serde(default)]
    pub defenses: Vec<RawDefense>,
    #[serde(default)]
    pub support: Vec<RawSupport>,
    #[serde(default)]
    pub squad_buffs: Vec<RawBuffGeneration>,
    #[serde(default)]
    pub group_buffs: Vec<RawBuffGeneration>,
    pub ext_healing_stats: Option<Value>,
    pub ext_barrier_stats: Option<Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawDps {
    pub dps: f64,
    pub damage: i64,
    pub power_dps: f64,
    pub condi_dps: f64,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawDefense {
    pub damage_taken: i64,
    pub down_count: i64,
    pub dead_count: i64,
    pub dodge_count: i64,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSupport {
    pub resurrects: i64,
    pub condi_cleanse: i64,
    pub boon_strips: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBuffGeneration {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub buff_data: Vec<RawBuffData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawBuffData {
    pub generation: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMechanic {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mechanics_data: Vec<RawMechanicOccurrence>,
}

#[derive(Debug, Deserialize)]
pub struct RawMechanicOccurrence {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub actor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPhase {
    pub name: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTarget {
    pub name: String,
    pub health_percent_burned: f64,
}

// ── Domain records ───────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DpsStats {
    pub dps: f64,
    pub power_dps: f64,
    pub condi_dps: f64,
    pub damage: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefenseStats {
    pub damage_taken: i64,
    pub down_count: i64,
    pub dead_count: i64,
    pub dodge_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupportStats {
    pub resurrects: i64,
    pub condi_cleanse: i64,
    pub boon_strips: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoonGeneration {
    pub quickness: f64,
    pub alacrity: f64,
}

impl BoonGeneration {
    pub fn best(&self) -> f64 {
        self.quickness.max(self.alacrity)
    }
}

/// Outgoing healing and barrier. All zero when the detail block is absent or
/// shaped differently than expected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealingStats {
    pub healing: i64,
    pub hps: f64,
    pub barrier: i64,
    pub bps: f64,
}

impl HealingStats {
    pub fn decode(healing: Option<&Value>, barrier: Option<&Value>) -> Self {
        let (healing, hps) = sum_first_phase(healing, "outgoingHealingAllies", "healing", "hps")
            .unwrap_or_default();
        let (barrier, bps) = sum_first_phase(barrier, "outgoingBarrierAllies", "barrier", "bps")
            .unwrap_or_default();
        Self {
            healing,
            hps,
            barrier,
            bps,
        }
    }
}

/// Sum `{amount_key, rate_key}` over every ally for the first phase of
/// `block[list_key]`, which is shaped `[[{..}, ..], ..]` (ally, phase).
fn sum_first_phase(
    block: Option<&Value>,
    list_key: &str,
    amount_key: &str,
    rate_key: &str,
) -> Option<(i64, f64)> {
    let allies = block?.get(list_key)?.as_array()?;
    let mut amount = 0i64;
    let mut rate = 0.0f64;
    for ally in allies {
        let phase = ally.as_array()?.first()?;
        amount += phase.get(amount_key)?.as_i64()?;
        rate += phase.get(rate_key)?.as_f64()?;
    }
    Some((amount, rate))
}

#[derive(Debug, Clone)]
pub struct ParsedPlayer {
    pub account: String,
    pub character_name: String,
    pub profession: String,
    pub subgroup: i64,
    pub dps: DpsStats,
    pub defense: DefenseStats,
    pub support: SupportStats,
    pub boons: BoonGeneration,
    pub healing: HealingStats,
}

#[derive(Debug, Clone)]
pub struct ParsedMechanic {
    pub name: String,
    pub description: String,
    pub time_ms: i64,
    pub actor: String,
    /// Account of the player whose character name matched `actor`.
    pub account: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedLog {
    pub trigger_id: i64,
    pub fight_name: String,
    pub success: bool,
    pub is_cm: bool,
    pub is_legendary_cm: bool,
    pub is_late_start: bool,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub permalink: Option<String>,
    pub phase_reached: i64,
    pub remaining_health_pct: f64,
    pub players: Vec<ParsedPlayer>,
    pub mechanics: Vec<ParsedMechanic>,
}

impl ParsedLog {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = hasher::read_full_file(path)?;
        Self::from_json_slice(&bytes)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawLog = serde_json::from_slice(bytes)?;
        Self::from_raw(raw, Utc::now())
    }

    /// `now` is only used when every start time field is missing or unparsable.
    pub fn from_raw(raw: RawLog, now: DateTime<Utc>) -> Result<Self> {
        if raw.fight_name.trim().is_empty() {
            return Err(Error::InvalidLog("missing fight name".into()));
        }

        let started_at = resolve_start_time(&raw).unwrap_or(now);
        let players: Vec<ParsedPlayer> = raw.players.iter().map(decode_player).collect();

        let mechanics = raw
            .mechanics
            .iter()
            .flat_map(|mechanic| {
                mechanic.mechanics_data.iter().map(|occurrence| ParsedMechanic {
                    name: mechanic.name.clone(),
                    description: mechanic.description.clone(),
                    time_ms: occurrence.time,
                    actor: occurrence.actor.clone(),
                    account: players
                        .iter()
                        .find(|p| p.character_name == occurrence.actor)
                        .map(|p| p.account.clone()),
                })
            })
            .collect();

        let remaining_health_pct = raw
            .targets
            .first()
            .map(|t| (100.0 - t.health_percent_burned).clamp(0.0, 100.0))
            .unwrap_or(100.0);

        Ok(Self {
            trigger_id: raw.trigger_id,
            fight_name: raw.fight_name.trim().to_string(),
            success: raw.success,
            is_cm: raw.is_cm,
            is_legendary_cm: raw.is_legendary_cm,
            is_late_start: raw.is_late_start,
            duration_ms: raw.duration_ms,
            started_at,
            permalink: raw.upload_links.iter().find(|l| !l.is_empty()).cloned(),
            phase_reached: raw.phases.len().saturating_sub(1) as i64,
            remaining_health_pct,
            players,
            mechanics,
        })
    }

    pub fn mode(&self) -> Mode {
        Mode::from_flags(self.is_cm, self.is_legendary_cm)
    }

    pub fn zone(&self) -> Zone {
        catalog::zone_for_trigger(self.trigger_id)
    }
}

fn decode_player(raw: &RawPlayer) -> ParsedPlayer {
    let dps = raw
        .dps_targets
        .first()
        .and_then(|phases| phases.first())
        .or_else(|| raw.dps_all.first())
        .cloned()
        .unwrap_or_default();
    let defense = raw.defenses.first().cloned().unwrap_or_default();
    let support = raw.support.first().cloned().unwrap_or_default();

    ParsedPlayer {
        account: raw.account.clone(),
        character_name: raw.name.clone(),
        profession: raw.profession.clone(),
        subgroup: raw.group,
        dps: DpsStats {
            dps: dps.dps,
            power_dps: dps.power_dps,
            condi_dps: dps.condi_dps,
            damage: dps.damage,
        },
        defense: DefenseStats {
            damage_taken: defense.damage_taken,
            down_count: defense.down_count,
            dead_count: defense.dead_count,
            dodge_count: defense.dodge_count,
        },
        support: SupportStats {
            resurrects: support.resurrects,
            condi_cleanse: support.condi_cleanse,
            boon_strips: support.boon_strips,
        },
        boons: BoonGeneration {
            quickness: buff_generation(raw, QUICKNESS_BUFF_ID),
            alacrity: buff_generation(raw, ALACRITY_BUFF_ID),
        },
        healing: HealingStats::decode(raw.ext_healing_stats.as_ref(), raw.ext_barrier_stats.as_ref()),
    }
}

/// Squad-wide generation when reported, subgroup generation otherwise.
fn buff_generation(raw: &RawPlayer, buff_id: i64) -> f64 {
    let first_phase = |buffs: &[RawBuffGeneration]| {
        buffs
            .iter()
            .find(|b| b.id == buff_id)
            .and_then(|b| b.buff_data.first())
            .map(|d| d.generation)
    };
    first_phase(&raw.squad_buffs)
        .or_else(|| first_phase(&raw.group_buffs))
        .unwrap_or(0.0)
}

/// Walk the start time fields in order of reliability.
fn resolve_start_time(raw: &RawLog) -> Option<DateTime<Utc>> {
    text(&raw.time_start_std)
        .and_then(parse_offset_timestamp)
        .or_else(|| {
            text(&raw.time_start_iso)
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| raw.time_start_ms.as_ref().and_then(parse_epoch_millis))
        .or_else(|| text(&raw.time_start).and_then(parse_generic_timestamp))
}

/// String content of a loosely typed field; anything else counts as absent.
fn text(value: &Option<Value>) -> Option<&str> {
    value.as_ref().and_then(Value::as_str)
}

fn parse_offset_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %:z")
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_epoch_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_generic_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Some(dt) = parse_offset_timestamp(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
