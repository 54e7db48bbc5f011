use ppl_core::errors::{ErrorInfo, PplError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("algorithm", "mh")
        .with_context("iteration", 3)
}

#[test]
fn numeric_error_surface() {
    let err = PplError::Numeric(sample_info("factor-nan", "factor received a NaN log weight"));
    assert_eq!(err.code(), "factor-nan");
    assert_eq!(err.info().context.get("iteration").map(String::as_str), Some("3"));
}

#[test]
fn handler_error_surface() {
    let err = PplError::Handler(sample_info("handler-nesting", "wrong handler"));
    assert_eq!(err.info().code, "handler-nesting");
    assert!(err.info().context.contains_key("algorithm"));
}

#[test]
fn resampling_error_surface() {
    let err = PplError::Resampling(
        sample_info("all-weights-neg-inf", "population exhausted").with_hint("use lenient mode"),
    );
    let rendered = err.to_string();
    assert!(rendered.starts_with("resampling error: population exhausted"));
    assert!(rendered.contains("algorithm=mh"));
    assert!(rendered.contains("hint: use lenient mode"));
}

#[test]
fn config_error_round_trips_through_json() {
    let err = PplError::Config(sample_info("config-parse", "bad yaml"));
    let json = serde_json::to_string(&err).expect("serialize");
    assert!(json.contains("\"family\":\"Config\""));
    let decoded: PplError = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded, err);
}
