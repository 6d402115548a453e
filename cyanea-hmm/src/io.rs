//! Text persistence for models and sequences.
//!
//! Both formats are a count header followed by whitespace-separated records
//! of `key: value` fields:
//!
//! ```text
//! num_models: 1
//!
//! model_id: 0
//! num_states: 2
//! num_symbols: 2
//! prior: 0.00000000000000000E0
//! initial: 5.00000000000000000E-1 5.00000000000000000E-1
//! transition: ...
//! emission: ...
//! ```
//!
//! ```text
//! num_sequences: 1
//!
//! seq_id: 0
//! length: 4
//! cardinality: 2
//! sequence: 0 1 1 0
//! ```
//!
//! Floats are written with 17 digits after the point so they read back
//! exactly. Line breaks are not significant when reading.
//!
//! Raw arrays (scaling factors, decoded paths, tables) use a bare format:
//! whitespace-separated values, a fixed number per line, no header.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use cyanea_core::{CyaneaError, Result};

use crate::model::{HmmModel, SymbolSequence};

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Whitespace token stream that understands `key:` and `key: value` fields.
struct Fields<'a> {
    tokens: std::str::SplitWhitespace<'a>,
    pending: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            tokens: input.split_whitespace(),
            pending: None,
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.pending.take().or_else(|| self.tokens.next())
    }

    /// Consume the label `key:`. A value glued to the colon is kept for the
    /// next read.
    fn key(&mut self, key: &str) -> Result<()> {
        let token = self
            .next_token()
            .ok_or_else(|| CyaneaError::Parse(format!("expected '{key}:', found end of input")))?;
        let rest = token
            .strip_prefix(key)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| CyaneaError::Parse(format!("expected '{key}:', found '{token}'")))?;
        if !rest.is_empty() {
            self.pending = Some(rest);
        }
        Ok(())
    }

    fn value<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let token = self
            .next_token()
            .ok_or_else(|| CyaneaError::Parse(format!("expected {what}, found end of input")))?;
        token
            .parse()
            .map_err(|_| CyaneaError::Parse(format!("invalid {what}: '{token}'")))
    }

    fn field<T: FromStr>(&mut self, key: &str) -> Result<T> {
        self.key(key)?;
        self.value(key)
    }

    fn list<T: FromStr>(&mut self, key: &str, len: usize) -> Result<Vec<T>> {
        self.key(key)?;
        (0..len).map(|_| self.value(key)).collect()
    }
}

/// Upper bound on records reserved up front from an untrusted header.
const PREALLOCATE_LIMIT: usize = 1024;

fn record_count(declared: usize, max: Option<usize>) -> usize {
    match max {
        Some(limit) => declared.min(limit),
        None => declared,
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| {
        CyaneaError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    Ok(BufWriter::new(file))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CyaneaError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

fn write_floats<W: Write>(writer: &mut W, key: &str, values: &[f64]) -> Result<()> {
    write!(writer, "{key}:")?;
    for v in values {
        write!(writer, " {v:.17E}")?;
    }
    writeln!(writer)?;
    Ok(())
}

/// Write `models` in the model text format.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the writer fails.
pub fn write_models<W: Write>(writer: &mut W, models: &[HmmModel]) -> Result<()> {
    writeln!(writer, "num_models: {}", models.len())?;
    for model in models {
        writeln!(writer)?;
        writeln!(writer, "model_id: {}", model.id())?;
        writeln!(writer, "num_states: {}", model.n_states())?;
        writeln!(writer, "num_symbols: {}", model.n_symbols())?;
        writeln!(writer, "prior: {:.17E}", model.prior())?;
        write_floats(writer, "initial", model.initial())?;
        let transition: Vec<f64> = model.transition().iter_rows().flatten().copied().collect();
        write_floats(writer, "transition", &transition)?;
        let emission: Vec<f64> = model.emission().iter_rows().flatten().copied().collect();
        write_floats(writer, "emission", &emission)?;
    }
    Ok(())
}

/// Parse models from text, keeping at most `max` of them.
///
/// Every model is validated as by [`HmmModel::new`].
///
/// # Errors
///
/// Returns [`CyaneaError::Parse`] for missing fields, malformed numbers,
/// fewer records than declared, or parameters that do not form a valid
/// model.
///
/// # Examples
///
/// ```
/// # use cyanea_hmm::io::parse_models;
/// let text = "num_models: 1\n\nmodel_id: 3\nnum_states: 1\nnum_symbols: 2\n\
///             prior: 0\ninitial: 1\ntransition: 1\nemission: 0.25 0.75\n";
/// let models = parse_models(text, None).unwrap();
/// assert_eq!(models[0].id(), 3);
/// assert_eq!(models[0].emission().get(0, 1), 0.75);
/// ```
pub fn parse_models(input: &str, max: Option<usize>) -> Result<Vec<HmmModel>> {
    let mut fields = Fields::new(input);
    let declared: usize = fields.field("num_models")?;
    let count = record_count(declared, max);

    let mut models = Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
    for index in 0..count {
        let id: u64 = fields.field("model_id")?;
        let n: usize = fields.field("num_states")?;
        let k: usize = fields.field("num_symbols")?;
        let prior: f64 = fields.field("prior")?;
        let n_trans = n
            .checked_mul(n)
            .ok_or_else(|| CyaneaError::Parse(format!("model {id}: num_states {n} too large")))?;
        let n_emit = n.checked_mul(k).ok_or_else(|| {
            CyaneaError::Parse(format!("model {id}: {n} states x {k} symbols too large"))
        })?;
        let initial = fields.list("initial", n)?;
        let transition = fields.list("transition", n_trans)?;
        let emission = fields.list("emission", n_emit)?;
        let model = HmmModel::new(n, k, initial, transition, emission)
            .map_err(|e| CyaneaError::Parse(format!("model record {index} (id {id}): {e}")))?;
        models.push(model.with_id(id).with_prior(prior));
    }
    Ok(models)
}

/// Write `models` to a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be created or written.
pub fn save_models(path: impl AsRef<Path>, models: &[HmmModel]) -> Result<()> {
    let mut writer = create(path.as_ref())?;
    write_models(&mut writer, models)?;
    writer.flush()?;
    Ok(())
}

/// Read at most `max` models from a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be read, otherwise as
/// [`parse_models`].
pub fn load_models(path: impl AsRef<Path>, max: Option<usize>) -> Result<Vec<HmmModel>> {
    parse_models(&read(path.as_ref())?, max)
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Write `sequences` in the sequence text format.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the writer fails.
pub fn write_sequences<W: Write>(writer: &mut W, sequences: &[SymbolSequence]) -> Result<()> {
    writeln!(writer, "num_sequences: {}", sequences.len())?;
    for seq in sequences {
        writeln!(writer)?;
        writeln!(writer, "seq_id: {}", seq.id())?;
        writeln!(writer, "length: {}", seq.len())?;
        writeln!(writer, "cardinality: {}", seq.cardinality())?;
        write!(writer, "sequence:")?;
        for s in seq.symbols() {
            write!(writer, " {s}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Parse sequences from text, keeping at most `max` of them.
///
/// # Errors
///
/// Returns [`CyaneaError::Parse`] for missing fields, malformed numbers,
/// fewer records than declared, empty sequences, or symbols outside the
/// declared cardinality.
pub fn parse_sequences(input: &str, max: Option<usize>) -> Result<Vec<SymbolSequence>> {
    let mut fields = Fields::new(input);
    let declared: usize = fields.field("num_sequences")?;
    let count = record_count(declared, max);

    let mut sequences = Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
    for index in 0..count {
        let id: u64 = fields.field("seq_id")?;
        let len: usize = fields.field("length")?;
        let cardinality: usize = fields.field("cardinality")?;
        let symbols = fields.list("sequence", len)?;
        let seq = SymbolSequence::new(id, cardinality, symbols)
            .map_err(|e| CyaneaError::Parse(format!("sequence record {index}: {e}")))?;
        sequences.push(seq);
    }
    Ok(sequences)
}

/// Write `sequences` to a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be created or written.
pub fn save_sequences(path: impl AsRef<Path>, sequences: &[SymbolSequence]) -> Result<()> {
    let mut writer = create(path.as_ref())?;
    write_sequences(&mut writer, sequences)?;
    writer.flush()?;
    Ok(())
}

/// Read at most `max` sequences from a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be read, otherwise as
/// [`parse_sequences`].
pub fn load_sequences(path: impl AsRef<Path>, max: Option<usize>) -> Result<Vec<SymbolSequence>> {
    parse_sequences(&read(path.as_ref())?, max)
}

// ---------------------------------------------------------------------------
// Raw arrays
// ---------------------------------------------------------------------------

fn check_per_line(per_line: usize) -> Result<()> {
    if per_line == 0 {
        return Err(CyaneaError::InvalidInput(
            "values per line must be > 0".into(),
        ));
    }
    Ok(())
}

fn parse_values<T: FromStr>(input: &str, max: Option<usize>, what: &str) -> Result<Vec<T>> {
    input
        .split_whitespace()
        .take(max.unwrap_or(usize::MAX))
        .map(|token| {
            token
                .parse()
                .map_err(|_| CyaneaError::Parse(format!("invalid {what}: '{token}'")))
        })
        .collect()
}

/// Write `values` as floats, `per_line` to a line.
///
/// # Errors
///
/// Returns [`CyaneaError::InvalidInput`] if `per_line` is zero, or
/// [`CyaneaError::Io`] if the writer fails.
pub fn write_reals<W: Write>(writer: &mut W, values: &[f64], per_line: usize) -> Result<()> {
    check_per_line(per_line)?;
    for line in values.chunks(per_line) {
        let text: Vec<String> = line.iter().map(|v| format!("{v:.17E}")).collect();
        writeln!(writer, "{}", text.join(" "))?;
    }
    Ok(())
}

/// Parse at most `max` whitespace-separated floats.
///
/// # Errors
///
/// Returns [`CyaneaError::Parse`] for a token that is not a float.
pub fn parse_reals(input: &str, max: Option<usize>) -> Result<Vec<f64>> {
    parse_values(input, max, "real")
}

/// Write `values` to a file at `path`, `per_line` to a line.
///
/// # Errors
///
/// See [`write_reals`]; file errors are [`CyaneaError::Io`].
pub fn save_reals(path: impl AsRef<Path>, values: &[f64], per_line: usize) -> Result<()> {
    check_per_line(per_line)?;
    let mut writer = create(path.as_ref())?;
    write_reals(&mut writer, values, per_line)?;
    writer.flush()?;
    Ok(())
}

/// Read at most `max` floats from a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be read, otherwise as
/// [`parse_reals`].
pub fn load_reals(path: impl AsRef<Path>, max: Option<usize>) -> Result<Vec<f64>> {
    parse_reals(&read(path.as_ref())?, max)
}

/// Write `values` as unsigned integers, `per_line` to a line.
///
/// # Errors
///
/// Returns [`CyaneaError::InvalidInput`] if `per_line` is zero, or
/// [`CyaneaError::Io`] if the writer fails.
pub fn write_indices<W: Write>(writer: &mut W, values: &[usize], per_line: usize) -> Result<()> {
    check_per_line(per_line)?;
    for line in values.chunks(per_line) {
        let text: Vec<String> = line.iter().map(usize::to_string).collect();
        writeln!(writer, "{}", text.join(" "))?;
    }
    Ok(())
}

/// Parse at most `max` whitespace-separated unsigned integers.
///
/// # Errors
///
/// Returns [`CyaneaError::Parse`] for a token that is not an unsigned
/// integer.
pub fn parse_indices(input: &str, max: Option<usize>) -> Result<Vec<usize>> {
    parse_values(input, max, "index")
}

/// Write `values` to a file at `path`, `per_line` to a line.
///
/// # Errors
///
/// See [`write_indices`]; file errors are [`CyaneaError::Io`].
pub fn save_indices(path: impl AsRef<Path>, values: &[usize], per_line: usize) -> Result<()> {
    check_per_line(per_line)?;
    let mut writer = create(path.as_ref())?;
    write_indices(&mut writer, values, per_line)?;
    writer.flush()?;
    Ok(())
}

/// Read at most `max` unsigned integers from a file at `path`.
///
/// # Errors
///
/// Returns [`CyaneaError::Io`] if the file cannot be read, otherwise as
/// [`parse_indices`].
pub fn load_indices(path: impl AsRef<Path>, max: Option<usize>) -> Result<Vec<usize>> {
    parse_indices(&read(path.as_ref())?, max)
}
