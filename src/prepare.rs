//! Builds the data bundle from per-tier CSV master tables.
//!
//! Each catalogue variable is read from its column, brought onto a percent
//! scale where its data type allows (counts as a percentage of the area
//! population, per-100k rates divided by 1000) and, when flagged, inverted so
//! that larger always reads as "more".

use crate::config::{AppConfig, DataType, InputConfig, MasterTableConfig, PrepareConfig, VariableSpec};
use crate::types::VariableDescriptor;
use anyhow::Context;
use csv::ReaderBuilder;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use thiserror::Error;
use tracing::{debug, info};

const PERCENT: f64 = 100.0;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("column '{column}' not found in {table}")]
    MissingColumn { table: String, column: String },
    #[error("row {row}: '{value}' in column '{column}' is not a number")]
    BadNumber { row: usize, column: String, value: String },
    #[error("variable '{0}' has data type density, which cannot be inverted")]
    DensityInversion(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Rescales one raw cell by data type.
pub fn transform(data_type: DataType, value: f64, population: Option<f64>) -> Option<f64> {
    match data_type {
        DataType::Percentage | DataType::Density | DataType::Rank => Some(value),
        DataType::Count => match population {
            Some(pop) if pop > 0.0 => Some(value / pop * PERCENT),
            _ => None,
        },
        DataType::Per100k => Some(value / 1000.0),
    }
}

/// Flips a transformed column in place; percent-scale types are taken from 100.
pub fn invert(name: &str, data_type: DataType, values: &mut [Option<f64>]) -> Result<(), PrepareError> {
    match data_type {
        DataType::Percentage | DataType::Count | DataType::Per100k => {
            for v in values.iter_mut().flatten() {
                *v = PERCENT - *v;
            }
        }
        DataType::Rank => {
            let max = values.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
            for v in values.iter_mut().flatten() {
                *v = (max + 1.0) - *v;
            }
        }
        DataType::Density => return Err(PrepareError::DensityInversion(name.to_string())),
    }
    Ok(())
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// The columns of one master table this run needs.
#[derive(Debug, Default)]
pub struct MasterTable {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub population: Vec<Option<f64>>,
    pub columns: HashMap<String, Vec<Option<f64>>>,
}

fn parse_cell(row: usize, column: &str, raw: &str) -> Result<Option<f64>, PrepareError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| PrepareError::BadNumber {
        row,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

pub fn read_master<R: Read>(
    reader: R,
    table: &str,
    config: &MasterTableConfig,
    wanted: &[&str],
) -> Result<MasterTable, PrepareError> {
    let mut rdr = ReaderBuilder::new().from_reader(reader);
    let headers = rdr.headers()?.clone();
    let index_of = |column: &str| {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| PrepareError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    };

    let id_idx = index_of(&config.id_column)?;
    let name_idx = index_of(&config.name_column)?;
    let pop_idx = index_of(&config.population_column)?;
    let wanted_idx = wanted
        .iter()
        .map(|c| Ok((c.to_string(), index_of(c)?)))
        .collect::<Result<Vec<_>, PrepareError>>()?;

    let mut table = MasterTable::default();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        // header is line 1
        let line = row + 2;
        table.ids.push(record.get(id_idx).unwrap_or_default().trim().to_string());
        table.names.push(record.get(name_idx).unwrap_or_default().trim().to_string());
        table
            .population
            .push(parse_cell(line, &config.population_column, record.get(pop_idx).unwrap_or_default())?);
        for (column, idx) in &wanted_idx {
            let value = parse_cell(line, column, record.get(*idx).unwrap_or_default())?;
            table.columns.entry(column.clone()).or_default().push(value);
        }
    }
    Ok(table)
}

/// Transformed, inverted and rounded area rows for one tier.
pub fn build_records(
    table: &MasterTable,
    variables: &[&VariableSpec],
    input: &InputConfig,
) -> Result<Vec<Value>, PrepareError> {
    let mut columns: Vec<(&str, Vec<Option<f64>>)> = Vec::with_capacity(variables.len());
    for spec in variables {
        let raw = table.columns.get(&spec.name).map(Vec::as_slice).unwrap_or(&[]);
        let mut values: Vec<Option<f64>> = (0..table.ids.len())
            .map(|i| {
                let v = raw.get(i).copied().flatten()?;
                transform(spec.data_type, v, table.population[i])
            })
            .collect();
        if spec.invert {
            invert(&spec.name, spec.data_type, &mut values)?;
        }
        let missing = values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            debug!(variable = %spec.name, missing, "empty cells written as null");
        }
        columns.push((spec.name.as_str(), values));
    }

    Ok((0..table.ids.len())
        .map(|i| {
            let mut row = Map::new();
            row.insert(input.id_field.clone(), Value::String(table.ids[i].clone()));
            row.insert(input.name_field.clone(), Value::String(table.names[i].clone()));
            for (name, values) in &columns {
                row.insert(name.to_string(), json!(values[i].map(round3)));
            }
            Value::Object(row)
        })
        .collect())
}

fn column_names<'a>(specs: &[&'a VariableSpec]) -> Vec<&'a str> {
    specs.iter().map(|v| v.name.as_str()).collect()
}

fn open(config: &MasterTableConfig) -> anyhow::Result<File> {
    File::open(&config.csv).with_context(|| format!("Failed to open CSV file: {:?}", config.csv))
}

/// Assembles `{ variables, LAs, LSOAs }` from the configured master tables.
pub fn build_bundle(prepare: &PrepareConfig, input: &InputConfig) -> anyhow::Result<Value> {
    let all: Vec<&VariableSpec> = prepare.variables.iter().collect();
    let fine: Vec<&VariableSpec> = prepare.variables.iter().filter(|v| v.lsoa).collect();

    let la = read_master(open(&prepare.la)?, "LA master table", &prepare.la, &column_names(&all))?;
    let lsoa = read_master(open(&prepare.lsoa)?, "LSOA master table", &prepare.lsoa, &column_names(&fine))?;
    info!(las = la.ids.len(), lsoas = lsoa.ids.len(), variables = all.len(), "master tables read");

    let descriptors: Vec<VariableDescriptor> = prepare
        .variables
        .iter()
        .map(|v| VariableDescriptor {
            name: v.name.clone(),
            label: v.label.clone(),
            class: v.class,
            lsoa: v.lsoa,
        })
        .collect();

    Ok(json!({
        "variables": descriptors,
        "LAs": build_records(&la, &all, input)?,
        "LSOAs": build_records(&lsoa, &fine, input)?,
    }))
}

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let prepare = config
        .prepare
        .as_ref()
        .context("No [prepare] section in config")?;
    let bundle = build_bundle(prepare, &config.input)?;
    let path = &config.input.bundle;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    fs::write(path, serde_json::to_string(&bundle)?).with_context(|| format!("Failed to write bundle {:?}", path))?;
    info!(path = ?path, "bundle written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use crate::data::parse_bundle;
    use crate::types::{Tier, VariableClass};

    const LA_CSV: &str = "code,name,population,unemployed,no_internet,imd_rank,density,groups\n\
        W06000001,Isle of Anglesey,70000,3.5,10.0,2,50.5,7\n\
        W06000002,Gwynedd,125000,,12.5,1,60.0,25\n\
        W06000003,Conwy,0,4.0,8.0,3,70.0,10\n";

    const LSOA_CSV: &str = "code,name,population,unemployed\n\
        W01000001,Anglesey 001A,1500,2.25\n";

    fn master(path: &str) -> MasterTableConfig {
        MasterTableConfig {
            csv: path.into(),
            id_column: "code".to_string(),
            name_column: "name".to_string(),
            population_column: "population".to_string(),
        }
    }

    fn spec(name: &str, data_type: DataType, invert: bool, lsoa: bool) -> VariableSpec {
        VariableSpec {
            name: name.to_string(),
            label: name.to_string(),
            class: VariableClass::Challenge,
            data_type,
            invert,
            lsoa,
        }
    }

    #[test]
    fn transforms_by_data_type() {
        assert_eq!(transform(DataType::Percentage, 3.5, None), Some(3.5));
        assert_eq!(transform(DataType::Count, 50.0, Some(200.0)), Some(25.0));
        assert_eq!(transform(DataType::Count, 7.0, Some(0.0)), None);
        assert_eq!(transform(DataType::Count, 7.0, None), None);
        assert_eq!(transform(DataType::Density, 50.5, None), Some(50.5));
        assert_eq!(transform(DataType::Rank, 2.0, None), Some(2.0));
        assert_eq!(transform(DataType::Per100k, 12.0, None), Some(0.012));
    }

    #[test]
    fn inversion_rules() {
        let mut pct = vec![Some(10.0), None];
        invert("no_internet", DataType::Percentage, &mut pct).unwrap();
        assert_eq!(pct, vec![Some(90.0), None]);

        let mut rate = vec![Some(0.25)];
        invert("crime", DataType::Per100k, &mut rate).unwrap();
        assert_eq!(rate, vec![Some(99.75)]);

        let mut rank = vec![Some(2.0), Some(1.0), Some(3.0)];
        invert("imd_rank", DataType::Rank, &mut rank).unwrap();
        assert_eq!(rank, vec![Some(2.0), Some(3.0), Some(1.0)]);

        let mut density = vec![Some(1.0)];
        assert!(matches!(
            invert("density", DataType::Density, &mut density),
            Err(PrepareError::DensityInversion(name)) if name == "density"
        ));
    }

    #[test]
    fn reads_master_table_with_blanks() {
        let table = read_master(LA_CSV.as_bytes(), "LA", &master("la.csv"), &["unemployed"]).unwrap();
        assert_eq!(table.ids, vec!["W06000001", "W06000002", "W06000003"]);
        assert_eq!(table.columns["unemployed"], vec![Some(3.5), None, Some(4.0)]);
        assert_eq!(table.population[2], Some(0.0));
    }

    #[test]
    fn missing_column_and_bad_number_are_reported() {
        let err = read_master(LA_CSV.as_bytes(), "LA", &master("la.csv"), &["nope"]).unwrap_err();
        assert!(err.to_string().contains("'nope'"));

        let bad = "code,name,population,x\nW1,A,10,abc\n";
        let err = read_master(bad.as_bytes(), "LA", &master("la.csv"), &["x"]).unwrap_err();
        assert!(matches!(err, PrepareError::BadNumber { row: 2, .. }));
    }

    #[test]
    fn records_apply_transform_invert_and_rounding() {
        let input = AppConfig::from_toml(MINIMAL).unwrap().input;
        let specs = [
            spec("no_internet", DataType::Percentage, true, false),
            spec("groups", DataType::Count, false, false),
        ];
        let refs: Vec<&VariableSpec> = specs.iter().collect();
        let table =
            read_master(LA_CSV.as_bytes(), "LA", &master("la.csv"), &["no_internet", "groups"]).unwrap();
        let rows = build_records(&table, &refs, &input).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["area_code"], "W06000001");
        assert_eq!(rows[0]["no_internet"], 90.0);
        // 7 groups over 70000 people is 0.01 percent
        assert_eq!(rows[0]["groups"], 0.01);
        assert_eq!(rows[1]["groups"], 0.02);
        // zero population leaves the count empty
        assert!(rows[2]["groups"].is_null());
    }

    #[test]
    fn bundle_round_trips_through_the_loader() {
        let dir = tempfile::tempdir().unwrap();
        let la_path = dir.path().join("la.csv");
        let lsoa_path = dir.path().join("lsoa.csv");
        fs::write(&la_path, LA_CSV).unwrap();
        fs::write(&lsoa_path, LSOA_CSV).unwrap();

        let mut la = master("la.csv");
        la.csv = la_path;
        let mut lsoa = master("lsoa.csv");
        lsoa.csv = lsoa_path;
        let prepare = PrepareConfig {
            la,
            lsoa,
            variables: vec![
                spec("unemployed", DataType::Percentage, false, true),
                spec("imd_rank", DataType::Rank, true, false),
            ],
        };

        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        config.input.bundle = dir.path().join("out").join("data.json");
        config.prepare = Some(prepare);
        run(&config).unwrap();

        let text = fs::read_to_string(&config.input.bundle).unwrap();
        let bundle = parse_bundle(&text, &config.input).unwrap();
        assert_eq!(bundle.variables.len(), 2);
        assert!(bundle.variable("unemployed").unwrap().lsoa);
        assert_eq!(bundle.records(Tier::La).len(), 3);
        assert_eq!(bundle.las[0].value("unemployed"), Some(3.5));
        assert_eq!(bundle.las[1].value("unemployed"), None);
        assert_eq!(bundle.las[1].value("imd_rank"), Some(3.0));
        assert_eq!(bundle.lsoas[0].value("unemployed"), Some(2.25));
        assert_eq!(bundle.lsoas[0].value("imd_rank"), None);
    }

    #[test]
    fn density_inversion_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let la_path = dir.path().join("la.csv");
        fs::write(&la_path, LA_CSV).unwrap();
        let mut la = master("la.csv");
        la.csv = la_path.clone();
        let mut lsoa = master("lsoa.csv");
        lsoa.csv = la_path;
        let prepare = PrepareConfig {
            la,
            lsoa,
            variables: vec![spec("density", DataType::Density, true, false)],
        };
        let input = AppConfig::from_toml(MINIMAL).unwrap().input;
        let err = build_bundle(&prepare, &input).unwrap_err();
        assert!(err.to_string().contains("cannot be inverted"));
    }
}
