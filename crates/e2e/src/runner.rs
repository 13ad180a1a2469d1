//! Journey runner: one browser per journey, steps, then the correlated submit

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use refcheck_core::{AttemptReport, CorrelationConfig, Disposition, SubmissionAttempt};

use crate::error::{E2eError, E2eResult};
use crate::playwright::{PlaywrightBridge, PlaywrightConfig, StepResult};
use crate::spec::{Expectation, JourneySpec, SubmitSpec};

/// Result of running a single journey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,

    /// Present when the journey reached its submit action
    pub attempt: Option<AttemptReport>,

    /// The transaction reference both channels agreed on
    pub reference: Option<String>,

    pub error: Option<String>,

    /// Why a tolerated outcome passed without a verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation: Option<String>,
}

impl JourneyResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            duration_ms: 0,
            steps: Vec::new(),
            attempt: None,
            reference: None,
            error: None,
            limitation: None,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.success = false;
        self.error = Some(reason.into());
    }

    /// Judge a submission attempt against what the journey expects
    pub fn record(&mut self, submit: &SubmitSpec, report: AttemptReport) {
        let verified = report.verify();

        match (submit.expect, &report.disposition) {
            (_, Disposition::Ambiguous) => {
                if let Err(e) = &verified {
                    if submit.allow_ambiguous {
                        warn!(
                            "{}: no completion signal after submit, tolerated for this environment ({})",
                            self.name, e
                        );
                        self.limitation = Some(e.to_string());
                    } else {
                        self.fail(e.to_string());
                    }
                }
            }
            (Expectation::Rejected, Disposition::Rejected { .. }) => {}
            (Expectation::Rejected, Disposition::Confirmed) => {
                self.fail("expected the payment to be rejected, but it was confirmed");
            }
            (_, Disposition::Rejected { .. }) => {
                if let Err(e) = &verified {
                    self.fail(e.to_string());
                }
            }
            (Expectation::Verified, Disposition::Confirmed) => match &verified {
                Ok(reference) => self.reference = Some(reference.clone()),
                Err(e) => self.fail(e.to_string()),
            },
            (Expectation::Confirmed, Disposition::Confirmed) => {
                self.reference = verified.ok();
            }
        }

        self.attempt = Some(report);
    }
}

/// Result of running a set of journeys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<JourneyResult>,
}

impl SuiteResult {
    pub fn from_results(
        started_at: DateTime<Utc>,
        duration_ms: u64,
        results: Vec<JourneyResult>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }
}

/// Configuration for the journey runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub playwright: PlaywrightConfig,
    pub correlation: CorrelationConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,

    /// Journeys run at the same time, each in its own browser
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            playwright: PlaywrightConfig::default(),
            correlation: CorrelationConfig::default(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
            workers: 1,
        }
    }
}

pub struct JourneyRunner {
    config: RunnerConfig,
}

impl JourneyRunner {
    pub fn new(config: RunnerConfig) -> E2eResult<Self> {
        config.correlation.validate()?;
        Ok(Self { config })
    }

    /// Run all journeys in the specs directory
    pub async fn run_all(&self) -> E2eResult<SuiteResult> {
        let specs = JourneySpec::load_all(&self.config.specs_dir)?;
        Ok(self.run_specs(&specs).await)
    }

    /// Run journeys carrying a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<SuiteResult> {
        let specs = JourneySpec::load_all(&self.config.specs_dir)?;
        let tagged: Vec<JourneySpec> = JourneySpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        Ok(self.run_specs(&tagged).await)
    }

    /// Run one journey by name
    pub async fn run_test(&self, name: &str) -> E2eResult<SuiteResult> {
        let specs = JourneySpec::load_all(&self.config.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::JourneyNotFound(name.to_string()))?;
        Ok(self.run_specs(std::slice::from_ref(&spec)).await)
    }

    /// Run journeys with bounded concurrency, results in spec order
    pub async fn run_specs(&self, specs: &[JourneySpec]) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let workers = self.config.workers.max(1);

        info!("Running {} journey(s) on {} worker(s)...", specs.len(), workers);

        let results: Vec<JourneyResult> = stream::iter(specs)
            .map(|spec| async move {
                let result = match self.run_spec(spec).await {
                    Ok(result) => result,
                    Err(e) => {
                        let mut result = JourneyResult::new(&spec.name);
                        result.fail(e.to_string());
                        result
                    }
                };
                if result.success {
                    match &result.reference {
                        Some(reference) => info!(
                            "✓ {} [{}] ({} ms)",
                            result.name, reference, result.duration_ms
                        ),
                        None => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                    }
                } else {
                    error!(
                        "✗ {} - {}",
                        result.name,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                result
            })
            .buffered(workers)
            .collect()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let suite = SuiteResult::from_results(started_at, duration_ms, results);

        info!(
            "Journey results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, duration_ms
        );
        suite
    }

    /// Run a single journey in a fresh browser
    pub async fn run_spec(&self, spec: &JourneySpec) -> E2eResult<JourneyResult> {
        let start = Instant::now();
        debug!("Running journey: {}", spec.name);

        let mut playwright = self.config.playwright.clone();
        if let Some(viewport) = spec.viewport {
            playwright.viewport = viewport;
        }

        let bridge = Arc::new(PlaywrightBridge::launch(&playwright).await?);

        let mut result = JourneyResult::new(&spec.name);
        let outcome = self.drive(&bridge, spec, &mut result).await;
        bridge.shutdown().await;

        if let Err(e) = outcome {
            result.fail(e.to_string());
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn drive(
        &self,
        bridge: &Arc<PlaywrightBridge>,
        spec: &JourneySpec,
        result: &mut JourneyResult,
    ) -> E2eResult<()> {
        for step in &spec.steps {
            let step_result = bridge.execute_step(step).await;
            let failure = step_result.error.clone().map(|reason| E2eError::StepFailed {
                step: step_result.step_name.clone(),
                reason,
            });
            result.steps.push(step_result);

            if let Some(failure) = failure {
                // Stop on first failure
                result.fail(failure.to_string());
                return Ok(());
            }
        }

        let Some(submit) = &spec.submit else {
            return Ok(());
        };

        let attempt = SubmissionAttempt::new(bridge.clone(), &self.config.correlation)?;
        let report = attempt.run(|| bridge.submit(submit)).await?;
        result.record(submit, report);
        Ok(())
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.config.output_dir, results)
    }
}

/// Write suite results as `test-results.json` under `output_dir`
pub fn write_results(output_dir: &Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
