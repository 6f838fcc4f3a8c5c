use super::*;

#[test]
fn default_is_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.feastol > config.epsilon);
}

#[test]
fn parse_partial_toml_keeps_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
        max_prop_rounds = 3

        [separation]
        min_cut_violation = 1e-3
        "#,
    )
    .unwrap();
    assert_eq!(config.max_prop_rounds, 3);
    assert_eq!(config.separation.min_cut_violation, 1e-3);
    // untouched fields keep their defaults
    assert_eq!(config.feastol, 1e-6);
    assert_eq!(config.quadratic.max_eig_sweeps, 50);
}

#[test]
fn rejects_nonpositive_feastol() {
    let err = EngineConfig::from_toml_str("feastol = 0.0").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn rejects_bad_toml() {
    let err = EngineConfig::from_toml_str("feastol = [").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn missing_file_falls_back_to_default() {
    let config = EngineConfig::load("does-not-exist.toml").unwrap_or_default();
    assert_eq!(config.max_prop_rounds, 10);
}
