use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chronology::{EngineConfig, EreFormat, SchemaRegistry};

use crate::Args;

/// Run configuration: optional JSON file, then environment, then flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub schemas: SchemaRegistry,
    pub requests_per_second: Option<u32>,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self> {
        let mut engine = match &args.config {
            Some(path) => {
                let raw = read(path)?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid engine config in {}", path.display()))?
            }
            None => EngineConfig::default(),
        };

        if let Ok(model) = env::var("CHRONOLOGY_MODEL") {
            engine.model.model = model;
        }
        if let Ok(max) = env::var("CHRONOLOGY_MAX_CONCURRENT") {
            let max: usize = max
                .parse()
                .context("CHRONOLOGY_MAX_CONCURRENT must be a valid number")?;
            engine.parallel = engine.parallel.with_max_concurrent(max);
        }

        if let Some(model) = &args.model {
            engine.model.model = model.clone();
        }
        if let Some(max) = args.max_concurrent {
            engine.parallel = engine.parallel.with_max_concurrent(max);
        }
        if let Some(format) = &args.format {
            engine.parallel = engine.parallel.with_format(parse_format(format)?);
        }
        if let Some(secs) = args.timeout_secs {
            engine.timeout = Some(Duration::from_secs(secs));
        }
        if args.no_sort {
            engine.sort_by_date = false;
        } else if args.config.is_none() {
            engine.sort_by_date = true;
        }

        let schemas = match &args.schemas {
            Some(path) => SchemaRegistry::from_json(&read(path)?)
                .with_context(|| format!("invalid visit schemas in {}", path.display()))?,
            None => SchemaRegistry::builtin(),
        };

        Ok(Self {
            engine,
            schemas,
            requests_per_second: args.requests_per_second,
        })
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse_format(format: &str) -> Result<EreFormat> {
    serde_json::from_value(serde_json::Value::String(format.to_lowercase()))
        .with_context(|| {
            format!(
                "unknown format '{}' (expected raw_ssa, processed, court_transcript or unknown)",
                format
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("court_transcript").unwrap(), EreFormat::CourtTranscript);
        assert_eq!(parse_format("RAW_SSA").unwrap(), EreFormat::RawSsa);
        assert!(parse_format("pdf").is_err());
    }
}
