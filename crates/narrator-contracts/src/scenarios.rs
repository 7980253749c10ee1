use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCENARIO: &str = "alien-planet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub title: String,
    pub opening: String,
}

#[derive(Debug, Default, Deserialize)]
struct ScenarioFile {
    #[serde(default, rename = "scenario")]
    scenarios: Vec<ScenarioSpec>,
}

/// Opening scenes the player can pick from, in display order.
#[derive(Debug, Clone)]
pub struct ScenarioRegistry {
    scenarios: IndexMap<String, ScenarioSpec>,
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ScenarioRegistry {
    pub fn new(scenarios: Option<IndexMap<String, ScenarioSpec>>) -> Self {
        Self {
            scenarios: scenarios.unwrap_or_else(default_scenarios),
        }
    }

    /// Built-in openings plus the `[[scenario]]` tables of a TOML file.
    /// File entries replace built-ins that share a name.
    pub fn with_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let mut registry = Self::default();
        registry
            .merge_toml(&raw)
            .with_context(|| format!("invalid scenario catalog {}", path.display()))?;
        Ok(registry)
    }

    pub fn merge_toml(&mut self, raw: &str) -> Result<usize> {
        let parsed: ScenarioFile = toml::from_str(raw)?;
        let count = parsed.scenarios.len();
        for mut scenario in parsed.scenarios {
            scenario.name = scenario.name.trim().to_ascii_lowercase();
            if scenario.name.is_empty() {
                anyhow::bail!("scenario entries need a non-empty name");
            }
            self.scenarios.insert(scenario.name.clone(), scenario);
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioSpec> {
        self.scenarios.get(name.trim().to_ascii_lowercase().as_str())
    }

    pub fn list(&self) -> impl Iterator<Item = &ScenarioSpec> {
        self.scenarios.values()
    }
}

fn default_scenarios() -> IndexMap<String, ScenarioSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, title: &str, opening: &str| {
        map.insert(
            name.to_string(),
            ScenarioSpec {
                name: name.to_string(),
                title: title.to_string(),
                opening: format!("{opening}\n\n"),
            },
        );
    };

    insert(
        DEFAULT_SCENARIO,
        "Alien planet",
        "The setting of the game is an alien planet where I've crash landed",
    );
    insert(
        "haunted-manor",
        "Haunted manor",
        "The setting of the game is a crumbling manor on a moor where I've taken shelter from a storm",
    );
    insert(
        "sunken-city",
        "Sunken city",
        "The setting of the game is a sunken city at the bottom of the sea that I'm exploring in an old diving suit",
    );
    insert(
        "space-station",
        "Derelict station",
        "The setting of the game is a derelict space station where I've woken from cryosleep alone",
    );

    map
}
