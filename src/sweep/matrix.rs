//! Matrix generation
//!
//! Turns the parameter-space section of a sweep configuration into the
//! ordered list of concrete assignments, one per job.

use crate::config::{BenchmarkEntries, SweepConfig, SweepMode};
use crate::error::{Result, SkyTrackError};
use crate::sweep::{OrderedMap, ParamValue, ParameterAssignment};

/// Cartesian product of all candidate values
///
/// The first key varies slowest, so `{a:[1,2], b:[x,y]}` yields
/// `a=1,b=x`, `a=1,b=y`, `a=2,b=x`, `a=2,b=y`. An empty space, or any key
/// with no candidates, yields no assignments.
pub fn expand_grid(params: &OrderedMap<Vec<ParamValue>>) -> Vec<ParameterAssignment> {
    if params.is_empty() || params.iter().any(|(_, values)| values.is_empty()) {
        return Vec::new();
    }

    let mut combos: Vec<OrderedMap<ParamValue>> = vec![OrderedMap::new()];
    for (key, values) in params.iter() {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut c = combo.clone();
                c.insert(key, value.clone());
                next.push(c);
            }
        }
        combos = next;
    }

    combos.into_iter().map(ParameterAssignment::grid).collect()
}

/// One assignment per model, each carrying the shared script reference
pub fn expand_benchmark(script: &str, models: &[String]) -> Vec<ParameterAssignment> {
    models
        .iter()
        .map(|model| ParameterAssignment::benchmark(model.as_str(), script))
        .collect()
}

/// Wrap literal commands as single-field assignments
pub fn expand_commands(commands: &[String]) -> Vec<ParameterAssignment> {
    commands
        .iter()
        .map(|cmd| ParameterAssignment::literal(cmd.as_str()))
        .collect()
}

/// One assignment per explicit parameter set
pub fn expand_param_sets(sets: &[OrderedMap<ParamValue>]) -> Vec<ParameterAssignment> {
    sets.iter()
        .cloned()
        .map(ParameterAssignment::parameter_set)
        .collect()
}

/// Build the job matrix described by a configuration
pub fn generate(config: &SweepConfig) -> Result<Vec<ParameterAssignment>> {
    match config.mode()? {
        SweepMode::Grid => {
            let params = config
                .params
                .as_ref()
                .ok_or_else(|| SkyTrackError::config("mode 'grid' requires a 'params' section"))?;
            Ok(expand_grid(params))
        }
        SweepMode::Benchmark => match (&config.benchmark, &config.benchmarks) {
            (Some(bench), _) => Ok(expand_benchmark(&bench.script, &bench.models)),
            (None, Some(BenchmarkEntries::Commands(commands))) => Ok(expand_commands(commands)),
            (None, Some(BenchmarkEntries::ParamSets(sets))) => Ok(expand_param_sets(sets)),
            (None, None) => Err(SkyTrackError::config(
                "mode 'benchmark' requires a 'benchmark' section or a 'benchmarks' list",
            )),
        },
        SweepMode::Commands => {
            let commands = config.commands.as_ref().ok_or_else(|| {
                SkyTrackError::config("mode 'commands' requires a 'commands' list")
            })?;
            Ok(expand_commands(commands))
        }
    }
}
