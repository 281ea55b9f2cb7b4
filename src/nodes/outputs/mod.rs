//! Built-in output formats
//!
//! | id       | hook            | output                                  |
//! |----------|-----------------|-----------------------------------------|
//! | `bits`   | logic data      | one row of 0/1 per probe                |
//! | `hex`    | logic data      | one row of hex bytes per probe          |
//! | `binary` | logic data      | packed samples, unchanged               |
//! | `analog` | analog data     | one text line per sample                |
//! | `vcd`    | every packet    | value change dump                       |

pub mod analog;
pub mod binary;
pub mod bits;
pub mod hex;
pub mod vcd;

use crate::runtime::output::{OutputDescriptor, OutputRegistry};

lazy_static::lazy_static! {
    static ref BUILTIN_OUTPUTS: Vec<OutputDescriptor> = vec![
        bits::DESCRIPTOR,
        hex::DESCRIPTOR,
        binary::DESCRIPTOR,
        analog::DESCRIPTOR,
        vcd::DESCRIPTOR,
    ];
}

impl OutputRegistry {
    /// Registry holding every built-in format
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in BUILTIN_OUTPUTS.iter() {
            registry.register(*descriptor);
        }
        registry
    }
}

/// Rows of sample characters, one per enabled probe, flushed every `width`
/// samples. Shared by the `bits` and `hex` formats.
pub(crate) struct ProbeRows {
    names: Vec<String>,
    rows: Vec<String>,
    name_width: usize,
}

impl ProbeRows {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let name_width = names.iter().map(String::len).max().unwrap_or(0);
        Self {
            rows: vec![String::new(); names.len()],
            names,
            name_width,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn row_mut(&mut self, index: usize) -> &mut String {
        &mut self.rows[index]
    }

    pub(crate) fn name_width(&self) -> usize {
        self.name_width
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.iter().all(String::is_empty)
    }

    /// Emit `name:row` for every probe and clear the rows
    pub(crate) fn flush(&mut self, out: &mut String) {
        if self.is_empty() {
            return;
        }
        for (name, row) in self.names.iter().zip(self.rows.iter_mut()) {
            out.push_str(&format!("{:>width$}:{}\n", name, row.trim_end(), width = self.name_width));
            row.clear();
        }
    }
}
