//! File-backed stand-ins for the execution and trigger services.
//!
//! A fixture is the JSON form of an [`Application`]. The backend serves its
//! data sets as load events and records triggered executions in memory, so the
//! appearance poller sees them on its next listing.

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use runboard_engine::{ExecutionSource, ManualExecutionPrompt, PipelineTriggerService};
use runboard_types::{Application, ApplicationEvent, Execution, ExecutionStatus, PipelineConfig, TriggerCommand, TriggerReceipt};
use serde_json::Value;
use tracing::debug;

/// Reads an application fixture from disk.
pub fn load_fixture(file_path: &Path) -> Result<Application> {
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read fixture: {}", file_path.display()))?;
    let application: Application =
        serde_json::from_str(&content).with_context(|| format!("Invalid application fixture: {}", file_path.display()))?;
    if application.name.trim().is_empty() {
        bail!("fixture {} has no application name", file_path.display());
    }
    Ok(application)
}

struct FixtureData {
    executions: Vec<Execution>,
    configs: Vec<PipelineConfig>,
}

pub struct FixtureBackend {
    application: String,
    data: Mutex<FixtureData>,
    next_run: AtomicU64,
}

impl FixtureBackend {
    pub fn new(application: &Application) -> Self {
        Self {
            application: application.name.clone(),
            data: Mutex::new(FixtureData {
                executions: application.executions.clone(),
                configs: application.pipeline_configs.clone(),
            }),
            next_run: AtomicU64::new(1),
        }
    }

    /// The two initial load notifications, configurations first.
    pub fn load_events(&self) -> Vec<ApplicationEvent> {
        let data = self.data.lock().expect("fixture lock poisoned");
        vec![
            ApplicationEvent::PipelineConfigsLoaded {
                configs: data.configs.clone(),
            },
            ApplicationEvent::ExecutionsLoaded {
                executions: data.executions.clone(),
            },
        ]
    }

    /// A refresh carrying every execution recorded so far.
    pub fn reload_event(&self) -> ApplicationEvent {
        let data = self.data.lock().expect("fixture lock poisoned");
        ApplicationEvent::ExecutionsReloaded {
            executions: data.executions.clone(),
        }
    }

    fn check_application(&self, application: &str) -> Result<()> {
        if application != self.application {
            bail!("fixture serves '{}', not '{application}'", self.application);
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTriggerService for FixtureBackend {
    async fn trigger_pipeline(&self, application: &str, pipeline_name: &str, trigger: &Value) -> Result<TriggerReceipt> {
        self.check_application(application)?;
        let mut data = self.data.lock().expect("fixture lock poisoned");
        let Some(config) = data.configs.iter().find(|config| config.name == pipeline_name) else {
            bail!("no pipeline named '{pipeline_name}' in application '{application}'");
        };

        let run = self.next_run.fetch_add(1, Ordering::SeqCst);
        let execution_id = format!("manual-{}-{run}", Utc::now().timestamp_millis());
        let trigger_type = trigger.get("type").and_then(Value::as_str).unwrap_or("manual").to_string();
        let mut execution = Execution::new(&execution_id, pipeline_name)
            .with_config_id(config.id.clone())
            .with_status(ExecutionStatus::NotStarted)
            .with_start_time(Utc::now());
        execution.trigger_type = Some(trigger_type);
        data.executions.push(execution);

        debug!(application, pipeline = pipeline_name, execution_id = %execution_id, "recorded fixture execution");
        Ok(TriggerReceipt {
            reference: format!("/pipelines/{execution_id}"),
        })
    }
}

#[async_trait]
impl ExecutionSource for FixtureBackend {
    async fn execution_ids(&self, application: &str) -> Result<Vec<String>> {
        self.check_application(application)?;
        let data = self.data.lock().expect("fixture lock poisoned");
        Ok(data.executions.iter().map(|execution| execution.id.clone()).collect())
    }
}

/// Prompt that answers with a command fixed on the command line.
pub struct PresetPrompt {
    command: Option<TriggerCommand>,
}

impl PresetPrompt {
    pub fn new(command: Option<TriggerCommand>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ManualExecutionPrompt for PresetPrompt {
    async fn request_trigger(&self, _application: &Application) -> Option<TriggerCommand> {
        self.command.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn application() -> Application {
        Application::loaded(
            "deck",
            vec![Execution::new("e1", "Deploy").with_config_id("cfg-deploy")],
            vec![PipelineConfig::new("cfg-deploy", "Deploy")],
        )
    }

    #[test]
    fn loads_fixture_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deck.json");
        fs::write(&path, serde_json::to_string(&application()).expect("serialize")).expect("write fixture");

        let loaded = load_fixture(&path).expect("fixture");
        assert_eq!(loaded.name, "deck");
        assert_eq!(loaded.executions.len(), 1);

        fs::write(&path, r#"{"name": " "}"#).expect("write fixture");
        assert!(load_fixture(&path).is_err());
    }

    #[tokio::test]
    async fn triggered_execution_becomes_listed() {
        let backend = FixtureBackend::new(&application());
        let receipt = backend
            .trigger_pipeline("deck", "Deploy", &json!({"type": "webhook"}))
            .await
            .expect("receipt");
        let execution_id = receipt.reference.trim_start_matches("/pipelines/").to_string();

        let ids = backend.execution_ids("deck").await.expect("ids");
        assert!(ids.contains(&execution_id));

        let ApplicationEvent::ExecutionsReloaded { executions } = backend.reload_event() else {
            panic!("expected a reload event");
        };
        let created = executions.iter().find(|execution| execution.id == execution_id).expect("created");
        assert_eq!(created.trigger_type.as_deref(), Some("webhook"));
        assert_eq!(created.pipeline_config_id.as_deref(), Some("cfg-deploy"));
    }

    #[tokio::test]
    async fn unknown_pipeline_or_application_is_rejected() {
        let backend = FixtureBackend::new(&application());
        assert!(backend.trigger_pipeline("deck", "Bake", &Value::Null).await.is_err());
        assert!(backend.execution_ids("gate").await.is_err());
    }
}
