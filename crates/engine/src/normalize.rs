//! Joins executions to their pipeline configurations by id.
//!
//! Executions are renamed in place. The session is the only writer and nothing
//! reads the collection while a normalization pass runs.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use runboard_types::{Application, Execution, PipelineConfig};
use tracing::{debug, warn};

/// What a normalization pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Executions whose name actually changed.
    pub renamed: usize,
    /// Configuration ids defined more than once; the first definition won.
    pub duplicate_config_ids: Vec<String>,
}

/// Renames every execution that references a known configuration to that configuration's name.
///
/// Executions without a `pipeline_config_id`, or whose id matches no configuration,
/// keep their name. Running the pass twice changes nothing the second time.
pub fn normalize_execution_names(executions: &mut [Execution], configs: &[PipelineConfig]) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    let mut names_by_id: HashMap<&str, &str> = HashMap::with_capacity(configs.len());

    for config in configs {
        match names_by_id.entry(config.id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(config.name.as_str());
            }
            Entry::Occupied(_) => {
                if !report.duplicate_config_ids.contains(&config.id) {
                    report.duplicate_config_ids.push(config.id.clone());
                }
            }
        }
    }

    if !report.duplicate_config_ids.is_empty() {
        warn!(
            duplicate_ids = ?report.duplicate_config_ids,
            "pipeline configurations share ids; the first definition names their executions"
        );
    }

    for execution in executions.iter_mut() {
        let Some(config_id) = execution.pipeline_config_id.as_deref() else {
            continue;
        };
        if let Some(config_name) = names_by_id.get(config_id)
            && execution.name != *config_name
        {
            execution.name = (*config_name).to_string();
            report.renamed += 1;
        }
    }

    debug!(
        execution_count = executions.len(),
        config_count = configs.len(),
        renamed = report.renamed,
        "normalized execution names"
    );
    report
}

/// Normalizes the executions of `application` against its own configurations.
pub fn normalize_application(application: &mut Application) -> NormalizeReport {
    normalize_execution_names(&mut application.executions, &application.pipeline_configs)
}
