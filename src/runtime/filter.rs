//! Hides the dashboard's own infrastructure from container listings.

use std::collections::BTreeMap;

const PRODUCT: &str = "terminogrid";
const SYSTEM_LABEL: &str = "grid.system";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// The fields of a listed container that decide whether it is ours.
pub struct ContainerFacts<'a> {
    pub names: &'a [String],
    pub image: &'a str,
    pub labels: &'a BTreeMap<String, String>,
}

pub fn is_system_container(facts: &ContainerFacts<'_>) -> bool {
    let label = |key: &str| {
        facts
            .labels
            .get(key)
            .map(|value| value.trim().to_lowercase())
            .unwrap_or_default()
    };

    if label(SYSTEM_LABEL) == "true" {
        return true;
    }
    if label(COMPOSE_PROJECT_LABEL).contains(PRODUCT)
        || label(COMPOSE_SERVICE_LABEL).contains(PRODUCT)
    {
        return true;
    }

    let system_name = facts.names.iter().any(|name| {
        let name = name.trim_start_matches('/').to_lowercase();
        name == PRODUCT
            || name.starts_with("terminogrid-")
            || name.starts_with("buildx_buildkit")
    });
    if system_name {
        return true;
    }

    let image = facts.image.to_lowercase();
    image.contains(PRODUCT) || image.contains("buildkit")
}
