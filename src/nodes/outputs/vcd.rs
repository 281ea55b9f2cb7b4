//! `vcd`: value change dump, built from raw packets through the generic hook
//!
//! The header is written on the first MetaLogic. Each Logic packet is read
//! in the source layout, so probe indices refer to source bits.

use crate::runtime::output::{FeedEvent, OutputContext, OutputDescriptor, OutputFormat};
use crate::runtime::packet::{LogicPayload, Packet};
use std::fmt::Write as _;

pub const DESCRIPTOR: OutputDescriptor = OutputDescriptor {
    id: "vcd",
    description: "Value Change Dump",
    factory: create,
};

fn create() -> Box<dyn OutputFormat> {
    Box::new(Vcd::default())
}

/// Printable identifier for variable `index`: `!`, `"`, ... then two chars
fn identifier(mut index: usize) -> String {
    const FIRST: u8 = b'!';
    const RANGE: usize = (b'~' - b'!' + 1) as usize;
    let mut id = String::new();
    loop {
        id.push((FIRST + (index % RANGE) as u8) as char);
        index /= RANGE;
        if index == 0 {
            return id;
        }
        index -= 1;
    }
}

/// Timescale unit and ticks per sample for `sample_rate`
fn timescale(sample_rate: u64) -> (&'static str, u64) {
    if sample_rate == 0 {
        return ("us", 1);
    }
    let period_ps = (1_000_000_000_000 / sample_rate).max(1);
    for (unit, ps) in [
        ("s", 1_000_000_000_000),
        ("ms", 1_000_000_000),
        ("us", 1_000_000),
        ("ns", 1_000),
    ] {
        if period_ps % ps == 0 {
            return (unit, period_ps / ps);
        }
    }
    ("ps", period_ps)
}

#[derive(Default)]
pub struct Vcd {
    probes: Vec<(usize, String)>,
    ids: Vec<String>,
    ticks_per_sample: u64,
    header_done: bool,
    last: Option<Vec<bool>>,
    position: u64,
}

impl Vcd {
    fn header(&mut self, sample_rate: u64) -> String {
        let (unit, ticks) = timescale(sample_rate);
        self.ticks_per_sample = ticks;
        self.header_done = true;

        let mut out = String::new();
        let _ = writeln!(out, "$version {} {} $end", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "$timescale 1 {} $end", unit);
        out.push_str("$scope module capture $end\n");
        for ((_, name), id) in self.probes.iter().zip(&self.ids) {
            let _ = writeln!(out, "$var wire 1 {} {} $end", id, name);
        }
        out.push_str("$upscope $end\n$enddefinitions $end\n");
        out
    }

    fn changes(&mut self, payload: &LogicPayload) -> String {
        let mut out = String::new();
        if payload.unit_size == 0 {
            return out;
        }
        for sample in 0..payload.num_samples() as usize {
            let values: Vec<bool> = self
                .probes
                .iter()
                .map(|(index, _)| payload.get_bit(sample, *index))
                .collect();

            let changed: Vec<usize> = match &self.last {
                Some(last) => (0..values.len()).filter(|&i| last[i] != values[i]).collect(),
                None => (0..values.len()).collect(),
            };
            if !changed.is_empty() {
                let _ = writeln!(out, "#{}", self.position * self.ticks_per_sample);
                for i in changed {
                    let _ = writeln!(out, "{}{}", values[i] as u8, self.ids[i]);
                }
            }
            self.last = Some(values);
            self.position += 1;
        }
        out
    }
}

impl OutputFormat for Vcd {
    fn init(&mut self, ctx: &OutputContext) -> Result<(), String> {
        if ctx.probes.is_empty() {
            return Err("no enabled probes".to_string());
        }
        self.probes = ctx.probes.clone();
        self.ids = (0..self.probes.len()).map(identifier).collect();
        Ok(())
    }

    fn receives_packets(&self) -> bool {
        true
    }

    fn receive(&mut self, packet: &Packet) -> Vec<u8> {
        let mut out = String::new();
        match packet {
            Packet::MetaLogic { sample_rate, .. } if !self.header_done => {
                out = self.header(*sample_rate);
            }
            Packet::Logic(payload) => {
                if !self.header_done {
                    out = self.header(0);
                }
                out.push_str(&self.changes(payload));
            }
            _ => {}
        }
        out.into_bytes()
    }

    fn handle_event(&mut self, event: FeedEvent) -> Vec<u8> {
        if event == FeedEvent::End && self.header_done && self.position > 0 {
            return format!("#{}\n", self.position * self.ticks_per_sample).into_bytes();
        }
        Vec::new()
    }
}
