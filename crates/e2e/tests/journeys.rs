//! The shipped journeys and settings parse and line up with the runner.

use std::path::Path;

use refcheck_core::CorrelationConfig;
use refcheck_e2e::playwright::step_command;
use refcheck_e2e::spec::{Expectation, JourneySpec, JourneyStep};

fn shipped_journeys() -> Vec<JourneySpec> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("specs");
    JourneySpec::load_all(&dir).unwrap()
}

#[test]
fn shipped_journeys_load() {
    let specs = shipped_journeys();
    let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["card-donation", "form-validation"]);
    assert_eq!(JourneySpec::filter_by_tag(&specs, "smoke").len(), 2);
}

#[test]
fn card_donation_submits_and_expects_a_verified_reference() {
    let specs = shipped_journeys();
    let card = specs.iter().find(|s| s.name == "card-donation").unwrap();

    let submit = card.submit.as_ref().unwrap();
    assert_eq!(submit.expect, Expectation::Verified);
    assert!(submit.allow_ambiguous);

    let framed = card
        .steps
        .iter()
        .filter(|step| matches!(step, JourneyStep::Fill { frame: Some(_), .. }))
        .count();
    assert_eq!(framed, 3, "card number, expiry and cvv live in iframes");
}

#[test]
fn every_browser_step_translates_to_a_driver_command() {
    for spec in shipped_journeys() {
        for step in &spec.steps {
            let local = matches!(step, JourneyStep::Sleep { .. } | JourneyStep::Log { .. });
            assert_eq!(
                step_command(step, "https://app.pws.int.cruk.org").is_none(),
                local,
                "{}: {:?}",
                spec.name,
                step
            );
        }
    }
}

#[test]
fn shipped_settings_match_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("refcheck.toml");
    let loaded = CorrelationConfig::load(&path).unwrap();
    assert_eq!(loaded, CorrelationConfig::default());
}
