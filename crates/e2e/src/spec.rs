//! Declarative YAML journey specification

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A donation journey parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneySpec {
    /// Unique name for this journey
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering journeys
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps leading up to the submit action, executed in order
    pub steps: Vec<JourneyStep>,

    /// The submit action whose outcome is raced and correlated
    #[serde(default)]
    pub submit: Option<SubmitSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A single step in a journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JourneyStep {
    /// Navigate to a URL, relative ones are joined to the base URL
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Click an element
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Skip instead of failing when the element never shows up
        #[serde(default)]
        optional: bool,
        /// Click through overlays
        #[serde(default)]
        force: bool,
    },

    /// Fill an input field, inside the n-th iframe when `frame` is set
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        frame: Option<usize>,
    },

    /// Select a dropdown option by its label
    Select { selector: String, label: String },

    Check {
        selector: String,
        #[serde(default)]
        force: bool,
    },

    Uncheck {
        selector: String,
        #[serde(default)]
        force: bool,
    },

    /// Press a key, on an element or the page
    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    /// Wait for an element to reach a state
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Log a message
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// The final action of a journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitSpec {
    pub selector: String,

    #[serde(default = "default_submit_timeout")]
    pub timeout_ms: u64,

    /// What a passing run looks like
    #[serde(default)]
    pub expect: Expectation,

    /// Pass with a warning when no completion signal arrives, for
    /// environments whose payment sandbox never answers
    #[serde(default)]
    pub allow_ambiguous: bool,
}

fn default_submit_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Payment confirmed and both references present and equal
    #[default]
    Verified,
    /// Payment confirmed, references are reported but not required
    Confirmed,
    /// The payment error banner is shown
    Rejected,
}

impl JourneySpec {
    /// Parse a journey from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.check()?;
        Ok(spec)
    }

    /// Parse a journey from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all journeys from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        specs.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = specs.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(E2eError::SpecParse(format!(
                "duplicate journey name '{}'",
                pair[0].name
            )));
        }

        Ok(specs)
    }

    /// Filter journeys by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn check(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("journey name is empty".to_string()));
        }
        if self.steps.is_empty() && self.submit.is_none() {
            return Err(E2eError::SpecParse(format!(
                "journey '{}' has neither steps nor a submit action",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_donation_journey() {
        let yaml = r#"
name: card-donation
description: Ten pound card donation
tags:
  - payment
  - smoke
steps:
  - action: navigate
    url: /support-us/your-donation
  - action: click
    selector: '#onetrust-accept-btn-handler'
    optional: true
  - action: fill
    selector: '#credit-card-number'
    value: '4000000000001000'
    frame: 0
  - action: select
    selector: 'role=combobox'
    label: In memory of someone
submit:
  selector: 'role=button[name=/Complete.*donation/i]'
"#;
        let spec = JourneySpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "card-donation");
        assert_eq!(spec.steps.len(), 4);
        assert!(matches!(spec.steps[1], JourneyStep::Click { optional: true, force: false, .. }));
        assert!(matches!(spec.steps[2], JourneyStep::Fill { frame: Some(0), .. }));

        let submit = spec.submit.unwrap();
        assert_eq!(submit.timeout_ms, 10_000);
        assert_eq!(submit.expect, Expectation::Verified);
        assert!(!submit.allow_ambiguous);
    }

    #[test]
    fn test_parse_rejection_journey() {
        let yaml = r#"
name: blocked-card
viewport:
  width: 390
  height: 844
steps:
  - action: wait
    selector: '#payment-form'
    state: attached
submit:
  selector: '#complete'
  timeout_ms: 2000
  expect: rejected
"#;
        let spec = JourneySpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.viewport, Some(Viewport { width: 390, height: 844 }));
        assert_eq!(
            spec.steps[0],
            JourneyStep::Wait {
                selector: "#payment-form".to_string(),
                timeout_ms: 5000,
                state: WaitState::Attached,
            }
        );
        assert_eq!(spec.submit.unwrap().expect, Expectation::Rejected);
    }

    #[test]
    fn test_empty_journey_is_rejected() {
        let result = JourneySpec::from_yaml("name: nothing\nsteps: []\n");
        assert!(matches!(result, Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = "name: x\nsteps:\n  - action: screenshot\n    name: y\n";
        assert!(JourneySpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_all_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: beta\ntags: [smoke]\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: alpha\nsteps:\n  - action: log\n    message: hi\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a journey").unwrap();

        let specs = JourneySpec::load_all(dir.path()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let smoke = JourneySpec::filter_by_tag(&specs, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(smoke[0].name, "beta");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["one.yaml", "two.yaml"] {
            std::fs::write(
                dir.path().join(file),
                "name: same\nsteps:\n  - action: sleep\n    ms: 1\n",
            )
            .unwrap();
        }
        assert!(matches!(
            JourneySpec::load_all(dir.path()),
            Err(E2eError::SpecParse(_))
        ));
    }
}
