//! Health label derived from reconcile results.

use std::collections::BTreeMap;

use super::types::Shoot;

/// Label carrying the coarse health of a Shoot.
pub const SHOOT_STATUS_LABEL: &str = "shoot.garden.sapcloud.io/status";

/// Annotation requesting that the Shoot be registered as a Seed.
pub const SHOOT_USE_AS_SEED_ANNOTATION: &str = "shoot.garden.sapcloud.io/use-as-seed";

/// Health label value written when a Shoot fails terminally.
pub const SHOOT_STATUS_UNHEALTHY: &str = "unhealthy";

/// The Shoot's labels with the health label set to unhealthy.
pub fn labels_marked_unhealthy(shoot: &Shoot) -> BTreeMap<String, String> {
    let mut labels = shoot.labels.clone();
    labels.insert(
        SHOOT_STATUS_LABEL.to_string(),
        SHOOT_STATUS_UNHEALTHY.to_string(),
    );
    labels
}

/// Whether the Shoot asks to be used as a Seed. Unparseable values count
/// as "no".
pub fn wants_seed_registration(shoot: &Shoot) -> bool {
    shoot
        .annotations
        .get(SHOOT_USE_AS_SEED_ANNOTATION)
        .and_then(|v| parse_bool(v))
        .unwrap_or(false)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
