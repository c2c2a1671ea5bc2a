use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Resolution tier of the area geography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Local Authorities (coarse).
    #[serde(rename = "LA", alias = "la")]
    La,
    /// Lower Super Output Areas (fine).
    #[serde(rename = "LSOA", alias = "lsoa")]
    Lsoa,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::La, Tier::Lsoa];

    pub fn fill_layer(self) -> &'static str {
        match self {
            Tier::La => "local_authorities",
            Tier::Lsoa => "lower_super_output_areas",
        }
    }

    pub fn border_layer(self) -> &'static str {
        match self {
            Tier::La => "LA_borders",
            Tier::Lsoa => "LSOA_borders",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::La => write!(f, "LA"),
            Tier::Lsoa => write!(f, "LSOA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableClass {
    Support,
    #[serde(alias = "need")]
    Challenge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub label: String,
    pub class: VariableClass,
    /// Available at the LSOA tier as well as LA.
    #[serde(default)]
    pub lsoa: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaRecord {
    pub id: String,
    pub name: String,
    // variable name -> value, None where the source cell was empty
    pub values: HashMap<String, Option<f64>>,
}

impl AreaRecord {
    pub fn value(&self, variable: &str) -> Option<f64> {
        self.values
            .get(variable)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }
}

/// Variables plus the area records of both tiers.
#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    pub variables: Vec<VariableDescriptor>,
    pub las: Vec<AreaRecord>,
    pub lsoas: Vec<AreaRecord>,
}

impl DataBundle {
    pub fn records(&self, tier: Tier) -> &[AreaRecord] {
        match tier {
            Tier::La => &self.las,
            Tier::Lsoa => &self.lsoas,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variables_of(&self, class: VariableClass) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter().filter(move |v| v.class == class)
    }
}
