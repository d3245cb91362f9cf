//! Process wiring: one history database, one controller, and the services
//! built over them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use vigil_feedback::{FeedbackInterpreter, FeedbackRecorder};
use vigil_policy::{PolicyEngine, ReminderGate};
use vigil_ranking::{AttentionService, LinearScorer, ModeController, ScoringHarness};
use vigil_replay::{ExperimentLab, ReplayEvaluator};
use vigil_settings::{vigil_home, VigilSettings};
use vigil_store::{Database, HistoryStore, MarkerStore, SqliteHistory, SqliteMarkers};

pub struct App {
    pub settings: VigilSettings,
    pub history: Arc<dyn HistoryStore>,
    pub markers: Arc<dyn MarkerStore>,
    pub controller: Arc<ModeController>,
}

impl App {
    pub fn open(settings: VigilSettings, db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(|| default_db_path(&settings));
        ensure_parent_dir(&path)?;
        let db = Database::open(&path).with_context(|| format!("Failed to open history at {}", path.display()))?;
        info!(path = %path.display(), "history opened");

        let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistory::new(db.clone()));
        let markers: Arc<dyn MarkerStore> = Arc::new(SqliteMarkers::new(db));
        let controller = Arc::new(
            ModeController::restore(history.clone(), &settings.personalization, Utc::now())
                .context("Failed to restore personalization config")?,
        );
        Ok(Self {
            settings,
            history,
            markers,
            controller,
        })
    }

    pub fn engine(&self) -> PolicyEngine {
        PolicyEngine::new(self.settings.policy.clone())
    }

    pub fn attention(&self) -> AttentionService {
        let harness = ScoringHarness::new(
            Arc::new(LinearScorer),
            Duration::from_millis(self.settings.scoring.timeout_ms),
        );
        AttentionService::new(
            self.engine(),
            harness,
            self.controller.clone(),
            self.history.clone(),
            self.settings.views.clone(),
        )
    }

    pub fn reminders(&self) -> ReminderGate {
        ReminderGate::new(self.engine(), self.markers.clone(), self.history.clone())
    }

    pub fn feedback(&self) -> FeedbackRecorder {
        FeedbackRecorder::new(
            self.history.clone(),
            FeedbackInterpreter::new(self.settings.feedback.clone()),
        )
    }

    pub fn evaluator(&self) -> ReplayEvaluator {
        ReplayEvaluator::new(self.engine(), self.settings.replay.clone())
    }

    pub fn lab(&self) -> ExperimentLab {
        ExperimentLab::new(
            self.history.clone(),
            self.controller.clone(),
            self.evaluator(),
            self.settings.personalization.threshold_floor,
        )
    }
}

fn default_db_path(settings: &VigilSettings) -> PathBuf {
    if settings.storage.history_db_path.is_empty() {
        vigil_home().join("history.db")
    } else {
        PathBuf::from(&settings.storage.history_db_path)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
