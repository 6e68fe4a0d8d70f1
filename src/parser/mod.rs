//! CSV input for models and initial populations.
//!
//! Two headerless files describe a model. Lines starting with `#` are
//! comments and fields are trimmed.
//!
//! The population file registers the groups, in order, with their initial
//! populations:
//!
//! ```text
//! S,990
//! I,10
//! R,0
//! ```
//!
//! The transition file lists one edge per line as
//! `source,dest,coefficient,mode,involved...`, where `mode` is `N` for a
//! density dependent rate law and empty or `-` otherwise:
//!
//! ```text
//! S,I,0.35,N,S,I
//! I,R,0.035,,I
//! ```

use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;

use crate::model::{rate_law::RateLaw, snapshot::Snapshot, TransitionGraph};
use crate::{Error, Result};

fn reader<R: io::Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(input)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn field<'r>(record: &'r StringRecord, i: usize, what: &str) -> Result<&'r str> {
    match record.get(i) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::InvalidRecord {
            line: line_of(record),
            reason: format!("missing {}", what),
        }),
    }
}

fn number(record: &StringRecord, i: usize, what: &str) -> Result<f64> {
    let text = field(record, i, what)?;
    text.parse::<f64>().map_err(|e| Error::InvalidRecord {
        line: line_of(record),
        reason: format!("{} \"{}\" is not a number: {}", what, text, e),
    })
}

/// Reads `group,population` records. Groups are registered in file order.
pub fn read_groups<R: io::Read>(input: R) -> Result<(TransitionGraph, Snapshot)> {
    let mut graph = TransitionGraph::default();
    let mut snapshot = Snapshot::new();

    for record in reader(input).records() {
        let record = record?;
        let name = field(&record, 0, "group name")?;
        let population = number(&record, 1, "population")?;

        graph.add_group(name)?;
        snapshot.insert(name, population);
    }

    debug!("read {} groups", graph.groups().len());
    Ok((graph, snapshot))
}

/// Reads transition records into `graph` and returns how many were read.
pub fn read_transitions<R: io::Read>(input: R, graph: &mut TransitionGraph) -> Result<usize> {
    let mut count = 0;

    for record in reader(input).records() {
        let record = record?;
        let source = field(&record, 0, "source group")?;
        let dest = field(&record, 1, "destination group")?;
        let coefficient = number(&record, 2, "coefficient")?;
        let density_dependent = match record.get(3).unwrap_or("") {
            "N" | "n" => true,
            "" | "-" => false,
            other => {
                return Err(Error::InvalidRecord {
                    line: line_of(&record),
                    reason: format!("unknown rate mode \"{}\", expected N or -", other),
                })
            }
        };
        let involved = record.iter().skip(4).filter(|name| !name.is_empty());

        let rate_law = RateLaw::new(coefficient, involved, density_dependent)?;
        graph.set_transition(source, dest, rate_law)?;
        count += 1;
    }

    debug!("read {} transitions", count);
    Ok(count)
}

/// Builds a model from a transition file and a population file.
pub fn load<M: io::Read, I: io::Read>(model: M, init: I) -> Result<(TransitionGraph, Snapshot)> {
    let (mut graph, snapshot) = read_groups(init)?;
    read_transitions(model, &mut graph)?;
    Ok((graph, snapshot))
}

/// [`load`] from file paths.
pub fn load_files(model_path: impl AsRef<Path>, init_path: impl AsRef<Path>) -> Result<(TransitionGraph, Snapshot)> {
    let model = File::open(model_path)?;
    let init = File::open(init_path)?;
    load(model, init)
}
