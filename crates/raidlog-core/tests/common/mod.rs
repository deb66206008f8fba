#![allow(dead_code)]

use async_trait::async_trait;
use raidlog_core::config::{AppConfig, DetectorConfig};
use raidlog_core::detector::Detector;
use raidlog_core::error::{Error, Result};
use raidlog_core::importer::{ImportOutcome, Importer};
use raidlog_core::invoker::{self, ParserInvoker, ParserOutput};
use raidlog_core::log_model::ParsedLog;
use raidlog_core::storage::Database;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds parser output JSON in the shape the external tool writes.
pub struct LogBuilder {
    value: Value,
}

impl LogBuilder {
    pub fn new(trigger_id: i64, fight_name: &str) -> Self {
        Self {
            value: json!({
                "triggerID": trigger_id,
                "fightName": fight_name,
                "success": true,
                "isCM": false,
                "isLegendaryCM": false,
                "isLateStart": false,
                "durationMS": 120000,
                "timeStartStd": "2024-03-01 20:15:00 +01:00",
                "uploadLinks": [""],
                "players": [],
                "mechanics": [],
                "phases": [{ "name": "Full Fight", "start": 0, "end": 120000 }],
                "targets": [{ "name": fight_name, "healthPercentBurned": 100.0 }],
            }),
        }
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.value["durationMS"] = json!(ms);
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.value["success"] = json!(success);
        self
    }

    pub fn cm(mut self) -> Self {
        self.value["isCM"] = json!(true);
        self
    }

    pub fn legendary_cm(mut self) -> Self {
        self.value["isCM"] = json!(true);
        self.value["isLegendaryCM"] = json!(true);
        self
    }

    pub fn late_start(mut self) -> Self {
        self.value["isLateStart"] = json!(true);
        self
    }

    pub fn started(mut self, std_timestamp: &str) -> Self {
        self.value["timeStartStd"] = json!(std_timestamp);
        self
    }

    pub fn upload_link(mut self, link: &str) -> Self {
        self.value["uploadLinks"] = json!([link]);
        self
    }

    /// Phases beyond the full-fight phase, so `phase_reached == extra`.
    pub fn phases(mut self, extra: usize) -> Self {
        let mut phases = vec![json!({ "name": "Full Fight", "start": 0, "end": 1 })];
        for i in 0..extra {
            phases.push(json!({ "name": format!("Phase {}", i + 1), "start": 0, "end": 1 }));
        }
        self.value["phases"] = Value::Array(phases);
        self
    }

    pub fn health_burned(mut self, pct: f64) -> Self {
        self.value["targets"][0]["healthPercentBurned"] = json!(pct);
        self
    }

    pub fn player(self, account: &str, dps: f64) -> Self {
        self.player_with_boons(account, dps, 0.0, 0.0)
    }

    pub fn player_with_boons(mut self, account: &str, dps: f64, quickness: f64, alacrity: f64) -> Self {
        let character = format!("{} Character", account.split('.').next().unwrap_or(account));
        let player = json!({
            "account": account,
            "name": character,
            "profession": "Firebrand",
            "group": 1,
            "dpsTargets": [[{ "dps": dps, "damage": (dps * 120.0) as i64, "powerDps": dps, "condiDps": 0.0 }]],
            "dpsAll": [{ "dps": dps, "damage": (dps * 120.0) as i64, "powerDps": dps, "condiDps": 0.0 }],
            "defenses": [{ "damageTaken": 1000, "downCount": 0, "deadCount": 0, "dodgeCount": 3 }],
            "support": [{ "resurrects": 0, "condiCleanse": 5, "boonStrips": 0 }],
            "squadBuffs": [
                { "id": 1187, "buffData": [{ "generation": quickness }] },
                { "id": 30328, "buffData": [{ "generation": alacrity }] }
            ],
        });
        self.value["players"]
            .as_array_mut()
            .expect("players array")
            .push(player);
        self
    }

    pub fn mechanic(mut self, name: &str, actor: &str, time: i64) -> Self {
        self.value["mechanics"]
            .as_array_mut()
            .expect("mechanics array")
            .push(json!({
                "name": name,
                "description": format!("{} description", name),
                "mechanicsData": [{ "time": time, "actor": actor }],
            }));
        self
    }

    pub fn build(self) -> Value {
        self.value
    }

    pub fn parsed(self) -> ParsedLog {
        ParsedLog::from_json_slice(&serde_json::to_vec(&self.value).unwrap()).unwrap()
    }
}

pub fn importer() -> Importer {
    Importer::new(Detector::new(DetectorConfig::default()))
}

pub fn importer_with(settings: DetectorConfig) -> Importer {
    Importer::new(Detector::new(settings))
}

/// Import a parsed log under a hash derived from `key`.
pub fn import(importer: &Importer, db: &mut Database, key: &str, log: &ParsedLog) -> ImportOutcome {
    let hash = raidlog_core::hasher::content_hash(key.as_bytes());
    importer
        .import(db, &hash, &format!("{}.zevtc", key), log)
        .unwrap()
}

pub fn imported_id(outcome: &ImportOutcome) -> i64 {
    match outcome {
        ImportOutcome::Imported { encounter_id, .. } => *encounter_id,
        other => panic!("expected an import, got {:?}", other),
    }
}

type Render = dyn Fn(&[u8]) -> Option<Value> + Send + Sync;

/// In-memory stand-in for the external parser. It derives the output JSON
/// from the raw input bytes and writes it next to the input, the way the
/// real tool does. `None` from the render function simulates a tool crash.
pub struct FakeInvoker {
    render: Box<Render>,
    delay: Duration,
}

impl FakeInvoker {
    pub fn new(render: impl Fn(&[u8]) -> Option<Value> + Send + Sync + 'static) -> Self {
        Self {
            render: Box::new(render),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every input becomes a kill of a distinct trigger id encoded in the bytes
    /// as `trigger:<id>`, or a failing tool run when the bytes say `crash`.
    pub fn by_marker() -> Self {
        Self::new(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            if text.contains("crash") {
                return None;
            }
            let trigger = text
                .split("trigger:")
                .nth(1)
                .and_then(|rest| rest.trim().split_whitespace().next())
                .and_then(|id| id.parse::<i64>().ok())
                .unwrap_or(15438);
            let mut log = LogBuilder::new(trigger, "Vale Guardian").player("Alpha.1234", 20000.0);
            if text.contains("late") {
                log = log.late_start();
            }
            Some(log.build())
        })
    }
}

#[async_trait]
impl ParserInvoker for FakeInvoker {
    async fn invoke(
        &self,
        input: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ParserOutput> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        let bytes = fs::read(input)?;
        let Some(json) = (self.render)(&bytes) else {
            return Err(Error::ToolFailed {
                code: Some(1),
                stderr: "fake parser crashed".into(),
            });
        };
        let stem = input.file_stem().unwrap().to_string_lossy().into_owned();
        let dir = input.parent().unwrap();
        fs::write(dir.join(format!("{}_fake.json", stem)), serde_json::to_vec(&json)?)?;
        fs::write(dir.join(format!("{}_fake.html", stem)), b"<html></html>")?;
        invoker::collect_outputs(input, output_dir)
    }
}

pub fn test_config(root: &Path, workers: usize) -> AppConfig {
    AppConfig {
        storage_root: root.to_path_buf(),
        workers,
        rescan_interval_secs: 1,
        settle_delay_ms: 0,
        ..AppConfig::default()
    }
}

pub fn fake(invoker: FakeInvoker) -> Arc<dyn ParserInvoker> {
    Arc::new(invoker)
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

pub fn count_files_recursive(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files_recursive(&path);
            } else if path.is_file() {
                count += 1;
            }
        }
    }
    count
}
