use super::models::*;
use super::sqlite::Database;
use crate::log_model::{ParsedLog, ParsedMechanic, ParsedPlayer};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::HashSet;
use tracing::debug;

/// Timestamps are stored as fixed-width UTC RFC 3339 so they sort as text.
pub fn db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const ENCOUNTER_COLUMNS: &str = "id, content_hash, trigger_id, fight_name, zone, wing, mode, \
     is_cm, is_legendary_cm, success, duration_ms, started_at, permalink, phase_reached, \
     remaining_health_pct, source_name, storage_path, imported_at";

fn encounter_from_row(row: &Row<'_>) -> Result<Encounter> {
    Ok(Encounter {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        trigger_id: row.get(2)?,
        fight_name: row.get(3)?,
        zone: row.get(4)?,
        wing: row.get(5)?,
        mode: row.get(6)?,
        is_cm: row.get(7)?,
        is_legendary_cm: row.get(8)?,
        success: row.get(9)?,
        duration_ms: row.get(10)?,
        started_at: row.get(11)?,
        permalink: row.get(12)?,
        phase_reached: row.get(13)?,
        remaining_health_pct: row.get(14)?,
        source_name: row.get(15)?,
        storage_path: row.get(16)?,
        imported_at: row.get(17)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> Result<NotificationRecord> {
    Ok(NotificationRecord {
        id: row.get(0)?,
        encounter_id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        processed_at: row.get(5)?,
    })
}

impl Database {
    // ── Encounters ───────────────────────────────────────────────

    pub fn find_encounter_by_hash(&self, content_hash: &str) -> Result<Option<Encounter>> {
        self.connection()
            .query_row(
                &format!("SELECT {ENCOUNTER_COLUMNS} FROM encounter WHERE content_hash = ?1"),
                params![content_hash],
                encounter_from_row,
            )
            .optional()
    }

    pub fn get_encounter(&self, id: i64) -> Result<Option<Encounter>> {
        self.connection()
            .query_row(
                &format!("SELECT {ENCOUNTER_COLUMNS} FROM encounter WHERE id = ?1"),
                params![id],
                encounter_from_row,
            )
            .optional()
    }

    pub fn count_encounters(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM encounter", [], |row| row.get(0))
    }

    /// Record where the raw log and reports were stored after import.
    pub fn set_encounter_storage_path(&self, id: i64, storage_path: &str) -> Result<()> {
        self.connection().execute(
            "UPDATE encounter SET storage_path = ?1 WHERE id = ?2",
            params![storage_path, id],
        )?;
        Ok(())
    }

    // ── Players & results ────────────────────────────────────────

    pub fn get_player(&self, account: &str) -> Result<Option<Player>> {
        self.connection()
            .query_row(
                "SELECT id, account, first_seen FROM player WHERE account = ?1",
                params![account],
                |row| {
                    Ok(Player {
                        id: row.get(0)?,
                        account: row.get(1)?,
                        first_seen: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn results_for_encounter(&self, encounter_id: i64) -> Result<Vec<PlayerEncounterResult>> {
        let mut stmt = self.connection().prepare(
            "SELECT r.id, r.encounter_id, r.player_id, p.account, r.character_name, r.profession, \
                    r.subgroup, r.dps, r.power_dps, r.condi_dps, r.damage, r.damage_taken, \
                    r.down_count, r.dead_count, r.dodge_count, r.resurrects, r.condi_cleanse, \
                    r.boon_strips, r.quickness_generation, r.alacrity_generation, r.healing, \
                    r.hps, r.barrier, r.bps \
             FROM player_encounter_result r \
             JOIN player p ON p.id = r.player_id \
             WHERE r.encounter_id = ?1 \
             ORDER BY r.dps DESC",
        )?;
        let results = stmt
            .query_map(params![encounter_id], |row| {
                Ok(PlayerEncounterResult {
                    id: row.get(0)?,
                    encounter_id: row.get(1)?,
                    player_id: row.get(2)?,
                    account: row.get(3)?,
                    character_name: row.get(4)?,
                    profession: row.get(5)?,
                    subgroup: row.get(6)?,
                    dps: row.get(7)?,
                    power_dps: row.get(8)?,
                    condi_dps: row.get(9)?,
                    damage: row.get(10)?,
                    damage_taken: row.get(11)?,
                    down_count: row.get(12)?,
                    dead_count: row.get(13)?,
                    dodge_count: row.get(14)?,
                    resurrects: row.get(15)?,
                    condi_cleanse: row.get(16)?,
                    boon_strips: row.get(17)?,
                    quickness_generation: row.get(18)?,
                    alacrity_generation: row.get(19)?,
                    healing: row.get(20)?,
                    hps: row.get(21)?,
                    barrier: row.get(22)?,
                    bps: row.get(23)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(results)
    }

    pub fn mechanic_events_for_encounter(&self, encounter_id: i64) -> Result<Vec<MechanicEvent>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, encounter_id, player_id, name, description, actor, time_ms \
             FROM mechanic_event WHERE encounter_id = ?1 ORDER BY time_ms, id",
        )?;
        let events = stmt
            .query_map(params![encounter_id], |row| {
                Ok(MechanicEvent {
                    id: row.get(0)?,
                    encounter_id: row.get(1)?,
                    player_id: row.get(2)?,
                    name: row.get(3)?,
                    description: row.get(4)?,
                    actor: row.get(5)?,
                    time_ms: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(events)
    }

    // ── Outbox ───────────────────────────────────────────────────

    pub fn notifications_for_encounter(&self, encounter_id: i64) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, encounter_id, kind, payload, created_at, processed_at \
             FROM notification WHERE encounter_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![encounter_id], notification_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_notifications(&self) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, encounter_id, kind, payload, created_at, processed_at \
             FROM notification ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], notification_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Oldest-first entries the delivery process has not handled yet.
    pub fn unprocessed_notifications(&self, limit: i64) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, encounter_id, kind, payload, created_at, processed_at \
             FROM notification WHERE processed_at IS NULL ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], notification_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Returns false when the entry was already processed (or does not exist).
    pub fn mark_notification_processed(&self, id: i64) -> Result<bool> {
        let now = db_timestamp(&Utc::now());
        let changed = self.connection().execute(
            "UPDATE notification SET processed_at = ?1 WHERE id = ?2 AND processed_at IS NULL",
            params![now, id],
        )?;
        Ok(changed == 1)
    }

    // ── Roster ───────────────────────────────────────────────────

    pub fn add_roster_member(&self, account: &str) -> Result<bool> {
        let now = db_timestamp(&Utc::now());
        let changed = self.connection().execute(
            "INSERT INTO roster_member (account, added_at) VALUES (?1, ?2) \
             ON CONFLICT(account) DO NOTHING",
            params![account, now],
        )?;
        Ok(changed == 1)
    }

    pub fn remove_roster_member(&self, account: &str) -> Result<bool> {
        let changed = self.connection().execute(
            "DELETE FROM roster_member WHERE account = ?1",
            params![account],
        )?;
        Ok(changed == 1)
    }

    pub fn list_roster(&self) -> Result<Vec<RosterMember>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT account, added_at FROM roster_member ORDER BY account")?;
        let members = stmt
            .query_map([], |row| {
                Ok(RosterMember {
                    account: row.get(0)?,
                    added_at: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(members)
    }
}

// ── Import writes ────────────────────────────────────────────────
//
// These take a bare connection so they can run inside the caller's
// transaction.

pub fn find_encounter_id_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM encounter WHERE content_hash = ?1",
        params![content_hash],
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_encounter(
    conn: &Connection,
    log: &ParsedLog,
    content_hash: &str,
    source_name: &str,
) -> Result<i64> {
    let zone = log.zone();
    conn.execute(
        "INSERT INTO encounter \
         (content_hash, trigger_id, fight_name, zone, wing, mode, is_cm, is_legendary_cm, \
          success, duration_ms, started_at, permalink, phase_reached, remaining_health_pct, \
          source_name, imported_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            content_hash,
            log.trigger_id,
            log.fight_name,
            zone.name,
            zone.wing,
            log.mode().as_str(),
            log.is_cm,
            log.is_legendary_cm,
            log.success,
            log.duration_ms,
            db_timestamp(&log.started_at),
            log.permalink,
            log.phase_reached,
            log.remaining_health_pct,
            source_name,
            db_timestamp(&Utc::now()),
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!("Inserted encounter {} ({})", id, log.fight_name);
    Ok(id)
}

/// Create the player on first sight; otherwise only move `first_seen` earlier.
pub fn upsert_player(conn: &Connection, account: &str, seen_at: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO player (account, first_seen) VALUES (?1, ?2) \
         ON CONFLICT(account) DO UPDATE SET first_seen = excluded.first_seen \
         WHERE excluded.first_seen < player.first_seen",
        params![account, seen_at],
    )?;
    conn.query_row(
        "SELECT id FROM player WHERE account = ?1",
        params![account],
        |row| row.get(0),
    )
}

pub fn insert_player_result(
    conn: &Connection,
    encounter_id: i64,
    player_id: i64,
    player: &ParsedPlayer,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO player_encounter_result \
         (encounter_id, player_id, character_name, profession, subgroup, dps, power_dps, \
          condi_dps, damage, damage_taken, down_count, dead_count, dodge_count, resurrects, \
          condi_cleanse, boon_strips, quickness_generation, alacrity_generation, healing, hps, \
          barrier, bps) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                 ?18, ?19, ?20, ?21, ?22)",
    )?;
    stmt.execute(params![
        encounter_id,
        player_id,
        player.character_name,
        player.profession,
        player.subgroup,
        player.dps.dps,
        player.dps.power_dps,
        player.dps.condi_dps,
        player.dps.damage,
        player.defense.damage_taken,
        player.defense.down_count,
        player.defense.dead_count,
        player.defense.dodge_count,
        player.support.resurrects,
        player.support.condi_cleanse,
        player.support.boon_strips,
        player.boons.quickness,
        player.boons.alacrity,
        player.healing.healing,
        player.healing.hps,
        player.healing.barrier,
        player.healing.bps,
    ])?;
    Ok(())
}

pub fn insert_mechanic_event(
    conn: &Connection,
    encounter_id: i64,
    player_id: Option<i64>,
    mechanic: &ParsedMechanic,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO mechanic_event (encounter_id, player_id, name, description, actor, time_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        encounter_id,
        player_id,
        mechanic.name,
        mechanic.description,
        mechanic.actor,
        mechanic.time_ms,
    ])?;
    Ok(())
}

pub fn insert_notification(
    conn: &Connection,
    encounter_id: Option<i64>,
    kind: &str,
    payload: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO notification (encounter_id, kind, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![encounter_id, kind, payload, db_timestamp(&Utc::now())],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── History reads for detection ──────────────────────────────────

/// Fastest prior successful kill of this boss and mode.
pub fn best_kill_duration(
    conn: &Connection,
    trigger_id: i64,
    mode: &str,
    exclude_id: i64,
) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MIN(duration_ms) FROM encounter \
         WHERE trigger_id = ?1 AND mode = ?2 AND success = 1 AND id != ?3",
        params![trigger_id, mode, exclude_id],
        |row| row.get(0),
    )
}

/// Highest prior DPS figures from roster members on successful kills,
/// optionally restricted to results meeting a boon generation threshold.
pub fn top_roster_dps(
    conn: &Connection,
    trigger_id: i64,
    mode: &str,
    exclude_id: i64,
    min_boon_generation: Option<f64>,
    limit: i64,
) -> Result<Vec<f64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.dps FROM player_encounter_result r \
         JOIN encounter e ON e.id = r.encounter_id \
         JOIN player p ON p.id = r.player_id \
         JOIN roster_member rm ON rm.account = p.account \
         WHERE e.trigger_id = ?1 AND e.mode = ?2 AND e.success = 1 AND e.id != ?3 \
           AND (?4 IS NULL OR r.quickness_generation >= ?4 OR r.alacrity_generation >= ?4) \
         ORDER BY r.dps DESC LIMIT ?5",
    )?;
    let values = stmt
        .query_map(
            params![trigger_id, mode, exclude_id, min_boon_generation, limit],
            |row| row.get(0),
        )?
        .collect::<Result<Vec<f64>>>()?;
    Ok(values)
}

pub fn successful_kill_count(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM encounter WHERE success = 1",
        [],
        |row| row.get(0),
    )
}

/// Deepest phase and lowest remaining health across prior attempts, kills included.
pub fn best_progression(
    conn: &Connection,
    trigger_id: i64,
    mode: &str,
    exclude_id: i64,
) -> Result<Option<(i64, f64)>> {
    let (count, phase, health): (i64, Option<i64>, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), MAX(phase_reached), MIN(remaining_health_pct) FROM encounter \
         WHERE trigger_id = ?1 AND mode = ?2 AND id != ?3",
        params![trigger_id, mode, exclude_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some((phase.unwrap_or(0), health.unwrap_or(100.0))))
}

pub fn roster_accounts(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare_cached("SELECT account FROM roster_member")?;
    let accounts = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>>>()?;
    Ok(accounts)
}
