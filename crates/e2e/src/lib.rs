//! Refcheck journey runner
//!
//! Drives declarative donation journeys through a real browser and, at the
//! submit action, hands the page to `refcheck-core` to race the completion
//! signals and correlate the transaction reference:
//! - Parses declarative YAML journey specs
//! - Controls Playwright through a long-lived Node driver speaking JSON lines
//! - Runs journeys concurrently, one browser each, and writes JSON results
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Journey Runner (Rust)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  JourneyRunner                                              │
//! │    ├── PlaywrightBridge::launch() -> PageSurface            │
//! │    ├── execute_step(step) -> StepResult                     │
//! │    ├── SubmissionAttempt::run(submit) -> AttemptReport      │
//! │    └── record(submit, report) -> JourneyResult              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  JourneySpec (YAML)                                         │
//! │    ├── name, description, tags, viewport?                   │
//! │    ├── steps: [Step]                                        │
//! │    │     ├── navigate { url }                               │
//! │    │     ├── click { selector, optional?, force? }          │
//! │    │     ├── fill { selector, value, frame? }               │
//! │    │     ├── select / check / uncheck / press               │
//! │    │     └── wait / sleep / log                             │
//! │    └── submit { selector, expect }                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod playwright;
pub mod runner;
pub mod spec;

pub use error::{E2eError, E2eResult};
pub use playwright::{Browser, PlaywrightBridge, PlaywrightConfig};
pub use runner::{JourneyResult, JourneyRunner, RunnerConfig, SuiteResult};
pub use spec::{Expectation, JourneySpec, JourneyStep};
