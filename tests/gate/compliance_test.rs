//! Tests for `src/gate/compliance.rs`.

use turnstile::gate::compliance::{is_satisfied, missing_labels, ComplianceConfig, MatchMode};

fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn head_and_hands(mode: MatchMode) -> ComplianceConfig {
    ComplianceConfig::new(["Head", "Hands"], mode)
}

#[test]
fn all_mode_needs_every_label() {
    let config = head_and_hands(MatchMode::All);
    assert!(!is_satisfied(&labels(&["head"]), &config));
    assert!(is_satisfied(&labels(&["Head", "Hands", "Gloves"]), &config));
}

#[test]
fn any_mode_needs_one_label() {
    let config = head_and_hands(MatchMode::Any);
    assert!(!is_satisfied(&labels(&["gloves"]), &config));
    assert!(is_satisfied(&labels(&["hands"]), &config));
}

#[test]
fn empty_requirement_is_vacuously_satisfied() {
    for mode in [MatchMode::All, MatchMode::Any] {
        let config = ComplianceConfig::new(Vec::<String>::new(), mode);
        assert!(is_satisfied(&[], &config));
        assert!(is_satisfied(&labels(&["Person", "Head"]), &config));
    }
}

#[test]
fn default_config_is_empty_all() {
    let config = ComplianceConfig::default();
    assert!(config.required().is_empty());
    assert_eq!(config.mode(), MatchMode::All);
}

#[test]
fn labels_are_trimmed_and_deduplicated() {
    let config = ComplianceConfig::new([" Hardhat ", "HARDHAT", "", "Vest"], MatchMode::All);
    assert_eq!(config.required(), ["Hardhat", "Vest"]);
}

#[test]
fn missing_labels_keep_configured_spelling() {
    let config = ComplianceConfig::new(["Hardhat", "Safety Vest", "Gloves"], MatchMode::All);
    let missing = missing_labels(&labels(&["hardhat", "GLOVES"]), &config);
    assert_eq!(missing, vec!["Safety Vest"]);
}

#[test]
fn config_parses_from_toml() {
    let config: ComplianceConfig =
        toml::from_str("required = [\"Head\", \"head\", \"Hands\"]\nmode = \"ANY\"\n")
            .expect("should parse");
    assert_eq!(config.required(), ["Head", "Hands"]);
    assert_eq!(config.mode(), MatchMode::Any);
}

#[test]
fn match_mode_parses_case_insensitively() {
    assert_eq!("any".parse::<MatchMode>(), Ok(MatchMode::Any));
    assert_eq!(" All ".parse::<MatchMode>(), Ok(MatchMode::All));
    assert!("most".parse::<MatchMode>().is_err());
}
