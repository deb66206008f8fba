use crate::catalog;
use crate::detector::{Detector, EncounterRef, Notification};
use crate::error::Result;
use crate::log_model::ParsedLog;
use crate::storage::{queries, Database};
use rusqlite::TransactionBehavior;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Why a parsed log was excluded before persistence. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    LateStart,
    Ignored(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LateStart => write!(f, "late start"),
            SkipReason::Ignored(name) => write!(f, "ignored encounter '{}'", name),
        }
    }
}

/// Result of a single file that made it through the pipeline.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Imported {
        encounter_id: i64,
        notifications: Vec<Notification>,
    },
    Duplicate {
        encounter_id: i64,
    },
    Skipped(SkipReason),
}

pub struct Importer {
    detector: Detector,
}

impl Importer {
    pub fn new(detector: Detector) -> Self {
        Self { detector }
    }

    pub fn check_skip(log: &ParsedLog) -> Option<SkipReason> {
        if log.is_late_start {
            return Some(SkipReason::LateStart);
        }
        if catalog::is_ignored(log.trigger_id, &log.fight_name) {
            return Some(SkipReason::Ignored(log.fight_name.clone()));
        }
        None
    }

    /// Cheap lookup used before the parser is invoked.
    pub fn find_duplicate(db: &Database, content_hash: &str) -> Result<Option<i64>> {
        Ok(queries::find_encounter_id_by_hash(
            db.connection(),
            content_hash,
        )?)
    }

    /// Persist one parsed log and run detection, all in one `IMMEDIATE`
    /// transaction. The hash is checked again under the write lock so two
    /// workers racing on identical bytes still create a single encounter.
    pub fn import(
        &self,
        db: &mut Database,
        content_hash: &str,
        source_name: &str,
        log: &ParsedLog,
    ) -> Result<ImportOutcome> {
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(encounter_id) = queries::find_encounter_id_by_hash(&tx, content_hash)? {
            debug!(hash = content_hash, encounter_id, "Duplicate content");
            return Ok(ImportOutcome::Duplicate { encounter_id });
        }
        if let Some(reason) = Self::check_skip(log) {
            debug!(hash = content_hash, %reason, "Skipping log");
            return Ok(ImportOutcome::Skipped(reason));
        }

        let encounter_id = queries::insert_encounter(&tx, log, content_hash, source_name)?;
        let seen_at = queries::db_timestamp(&log.started_at);

        let mut player_ids: HashMap<&str, i64> = HashMap::new();
        for player in &log.players {
            if player_ids.contains_key(player.account.as_str()) {
                continue;
            }
            let player_id = queries::upsert_player(&tx, &player.account, &seen_at)?;
            queries::insert_player_result(&tx, encounter_id, player_id, player)?;
            player_ids.insert(player.account.as_str(), player_id);
        }

        for mechanic in &log.mechanics {
            let player_id = mechanic
                .account
                .as_deref()
                .and_then(|account| player_ids.get(account).copied());
            queries::insert_mechanic_event(&tx, encounter_id, player_id, mechanic)?;
        }

        let encounter = EncounterRef {
            encounter_id,
            trigger_id: log.trigger_id,
            fight_name: log.fight_name.clone(),
            mode: log.mode().as_str().to_string(),
        };
        let notifications = self.detector.run(&tx, &encounter, log)?;

        tx.commit()?;
        info!(
            encounter_id,
            hash = content_hash,
            fight = %log.fight_name,
            success = log.success,
            players = log.players.len(),
            notifications = notifications.len(),
            "Imported encounter"
        );
        Ok(ImportOutcome::Imported {
            encounter_id,
            notifications,
        })
    }
}
