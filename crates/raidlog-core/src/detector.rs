//! Record and milestone detection.
//!
//! Runs inside the import transaction, after the encounter and its results
//! have been written, so every history query sees a consistent view that
//! includes the new encounter (and excludes it explicitly where a check is
//! about *prior* attempts).

use crate::catalog::KILL_MILESTONES;
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::log_model::{ParsedLog, ParsedPlayer};
use crate::storage::queries;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Number of leaderboard positions considered for placements.
pub const LEADERBOARD_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRef {
    pub encounter_id: i64,
    pub trigger_id: i64,
    pub fight_name: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFigure {
    pub account: String,
    pub character_name: String,
    pub profession: String,
    pub dps: f64,
}

impl PlayerFigure {
    fn from_player(player: &ParsedPlayer) -> Self {
        Self {
            account: player.account.clone(),
            character_name: player.character_name.clone(),
            profession: player.profession.clone(),
            dps: player.dps.dps,
        }
    }
}

/// Outbox payload. Serialized as JSON with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    KillTimeRecord {
        encounter: EncounterRef,
        previous_secs: f64,
        new_secs: f64,
    },
    DpsRecord {
        encounter: EncounterRef,
        player: PlayerFigure,
        previous_best: f64,
    },
    DpsPlacement {
        encounter: EncounterRef,
        player: PlayerFigure,
        rank: usize,
    },
    BoonDpsRecord {
        encounter: EncounterRef,
        player: PlayerFigure,
        previous_best: f64,
    },
    BoonDpsPlacement {
        encounter: EncounterRef,
        player: PlayerFigure,
        rank: usize,
    },
    FirstKill {
        encounter: EncounterRef,
        duration_secs: f64,
    },
    KillMilestone {
        encounter: EncounterRef,
        total_kills: i64,
    },
    Progression {
        encounter: EncounterRef,
        phase_reached: i64,
        remaining_health_pct: f64,
        previous_phase: Option<i64>,
        previous_remaining_health_pct: Option<f64>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::KillTimeRecord { .. } => "kill_time_record",
            Notification::DpsRecord { .. } => "dps_record",
            Notification::DpsPlacement { .. } => "dps_placement",
            Notification::BoonDpsRecord { .. } => "boon_dps_record",
            Notification::BoonDpsPlacement { .. } => "boon_dps_placement",
            Notification::FirstKill { .. } => "first_kill",
            Notification::KillMilestone { .. } => "kill_milestone",
            Notification::Progression { .. } => "progression",
        }
    }

    pub fn encounter(&self) -> &EncounterRef {
        match self {
            Notification::KillTimeRecord { encounter, .. }
            | Notification::DpsRecord { encounter, .. }
            | Notification::DpsPlacement { encounter, .. }
            | Notification::BoonDpsRecord { encounter, .. }
            | Notification::BoonDpsPlacement { encounter, .. }
            | Notification::FirstKill { encounter, .. }
            | Notification::KillMilestone { encounter, .. }
            | Notification::Progression { encounter, .. } => encounter,
        }
    }
}

/// Where a new figure lands against a prior leaderboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Standing {
    Record { previous_best: f64 },
    Placement { rank: usize },
    Unplaced,
}

/// `prior_top` must be sorted in descending order.
///
/// A figure strictly above the prior best is a record. Otherwise its rank is
/// one plus the number of prior figures strictly above it, and only ranks
/// 2 through [`LEADERBOARD_SIZE`] count as a placement. Without any prior
/// figure there is nothing to compare against.
pub fn standing(prior_top: &[f64], value: f64) -> Standing {
    let Some(&best) = prior_top.first() else {
        return Standing::Unplaced;
    };
    if value > best {
        return Standing::Record {
            previous_best: best,
        };
    }
    let rank = 1 + prior_top
        .iter()
        .take(LEADERBOARD_SIZE)
        .filter(|prior| **prior > value)
        .count();
    if (2..=LEADERBOARD_SIZE).contains(&rank) {
        Standing::Placement { rank }
    } else {
        Standing::Unplaced
    }
}

#[derive(Debug, Clone, Copy)]
enum Board {
    Dps,
    BoonDps,
}

pub struct Detector {
    settings: DetectorConfig,
}

impl Detector {
    pub fn new(settings: DetectorConfig) -> Self {
        Self { settings }
    }

    /// Evaluate every check for a freshly inserted encounter and append the
    /// results to the outbox through `conn`.
    pub fn run(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        log: &ParsedLog,
    ) -> Result<Vec<Notification>> {
        let notifications = self.evaluate(conn, encounter, log)?;
        for notification in &notifications {
            let payload = serde_json::to_string(notification)?;
            queries::insert_notification(
                conn,
                Some(encounter.encounter_id),
                notification.kind(),
                &payload,
            )?;
            info!(
                encounter_id = encounter.encounter_id,
                kind = notification.kind(),
                "Queued notification"
            );
        }
        Ok(notifications)
    }

    pub fn evaluate(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        log: &ParsedLog,
    ) -> Result<Vec<Notification>> {
        let mut out = Vec::new();

        if !log.success {
            if self.tracks_progression(log) {
                self.check_progression(conn, encounter, log, &mut out)?;
            }
            return Ok(out);
        }

        self.check_kill_time(conn, encounter, log, &mut out)?;

        let roster = queries::roster_accounts(conn)?;
        if roster.is_empty() {
            debug!("Roster is empty, skipping DPS leaderboards");
        } else {
            self.check_board(conn, encounter, log, &roster, Board::Dps, &mut out)?;
            self.check_board(conn, encounter, log, &roster, Board::BoonDps, &mut out)?;
        }

        self.check_milestone(conn, encounter, &mut out)?;
        Ok(out)
    }

    fn tracks_progression(&self, log: &ParsedLog) -> bool {
        match self.settings.progression_trigger_id {
            Some(trigger_id) => {
                log.trigger_id == trigger_id
                    && (!self.settings.progression_legendary || log.is_legendary_cm)
            }
            None => false,
        }
    }

    fn check_kill_time(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        log: &ParsedLog,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let previous = queries::best_kill_duration(
            conn,
            encounter.trigger_id,
            &encounter.mode,
            encounter.encounter_id,
        )?;
        match previous {
            None => out.push(Notification::FirstKill {
                encounter: encounter.clone(),
                duration_secs: millis_to_secs(log.duration_ms),
            }),
            Some(best) if log.duration_ms < best => out.push(Notification::KillTimeRecord {
                encounter: encounter.clone(),
                previous_secs: millis_to_secs(best),
                new_secs: millis_to_secs(log.duration_ms),
            }),
            Some(_) => {}
        }
        Ok(())
    }

    fn check_board(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        log: &ParsedLog,
        roster: &HashSet<String>,
        board: Board,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let threshold = match board {
            Board::Dps => None,
            Board::BoonDps => Some(self.settings.boon_threshold),
        };
        let prior_top = queries::top_roster_dps(
            conn,
            encounter.trigger_id,
            &encounter.mode,
            encounter.encounter_id,
            threshold,
            LEADERBOARD_SIZE as i64,
        )?;

        let eligible = log.players.iter().filter(|player| {
            roster.contains(&player.account)
                && threshold.map_or(true, |t| player.boons.best() >= t)
        });

        for player in eligible {
            let figure = PlayerFigure::from_player(player);
            let notification = match (standing(&prior_top, figure.dps), board) {
                (Standing::Record { previous_best }, Board::Dps) => Notification::DpsRecord {
                    encounter: encounter.clone(),
                    player: figure,
                    previous_best,
                },
                (Standing::Record { previous_best }, Board::BoonDps) => {
                    Notification::BoonDpsRecord {
                        encounter: encounter.clone(),
                        player: figure,
                        previous_best,
                    }
                }
                (Standing::Placement { rank }, Board::Dps) => Notification::DpsPlacement {
                    encounter: encounter.clone(),
                    player: figure,
                    rank,
                },
                (Standing::Placement { rank }, Board::BoonDps) => {
                    Notification::BoonDpsPlacement {
                        encounter: encounter.clone(),
                        player: figure,
                        rank,
                    }
                }
                (Standing::Unplaced, _) => continue,
            };
            out.push(notification);
        }
        Ok(())
    }

    fn check_milestone(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        // Equality against the running total; each import commits on its own.
        let total = queries::successful_kill_count(conn)?;
        if KILL_MILESTONES.contains(&total) {
            out.push(Notification::KillMilestone {
                encounter: encounter.clone(),
                total_kills: total,
            });
        }
        Ok(())
    }

    fn check_progression(
        &self,
        conn: &Connection,
        encounter: &EncounterRef,
        log: &ParsedLog,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let prior = queries::best_progression(
            conn,
            encounter.trigger_id,
            &encounter.mode,
            encounter.encounter_id,
        )?;
        let improved = match prior {
            None => true,
            Some((phase, health)) => {
                log.phase_reached > phase || log.remaining_health_pct < health
            }
        };
        if improved {
            out.push(Notification::Progression {
                encounter: encounter.clone(),
                phase_reached: log.phase_reached,
                remaining_health_pct: log.remaining_health_pct,
                previous_phase: prior.map(|(phase, _)| phase),
                previous_remaining_health_pct: prior.map(|(_, health)| health),
            });
        }
        Ok(())
    }
}

fn millis_to_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}
