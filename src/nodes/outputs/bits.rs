//! `bits`: one row of `0`/`1` characters per probe
//!
//! Option `width` (default 64) sets the samples per row. Samples are
//! grouped by eight. A trigger is marked with `T:` and a caret under the
//! sample it precedes.

use super::ProbeRows;
use crate::runtime::decoder::lane_bit;
use crate::runtime::output::{DataPayload, FeedEvent, OutputContext, OutputDescriptor, OutputFormat};
use crate::runtime::packet::PacketKind;

pub const DESCRIPTOR: OutputDescriptor = OutputDescriptor {
    id: "bits",
    description: "Bits",
    factory: create,
};

const DEFAULT_WIDTH: usize = 64;

fn create() -> Box<dyn OutputFormat> {
    Box::new(Bits::default())
}

pub struct Bits {
    rows: ProbeRows,
    width: usize,
    column: usize,
    samples: u64,
    /// (character column, sample number) of a pending trigger marker
    trigger: Option<(usize, u64)>,
}

impl Default for Bits {
    fn default() -> Self {
        Self {
            rows: ProbeRows::new(Vec::new()),
            width: DEFAULT_WIDTH,
            column: 0,
            samples: 0,
            trigger: None,
        }
    }
}

impl Bits {
    fn flush(&mut self, out: &mut String) {
        self.rows.flush(out);
        if let Some((column, sample)) = self.trigger.take() {
            out.push_str(&format!(
                "{:>width$}:{}^ {}\n",
                "T",
                " ".repeat(column),
                sample,
                width = self.rows.name_width()
            ));
        }
        self.column = 0;
    }
}

impl OutputFormat for Bits {
    fn init(&mut self, ctx: &OutputContext) -> Result<(), String> {
        self.width = ctx.option_usize("width", DEFAULT_WIDTH)?;
        if self.width == 0 {
            return Err("width must be at least 1".to_string());
        }
        if ctx.probes.is_empty() {
            return Err("no enabled probes".to_string());
        }
        self.rows = ProbeRows::new(ctx.probes.iter().map(|(_, name)| name.clone()).collect());
        Ok(())
    }

    fn accepts(&self) -> Option<PacketKind> {
        Some(PacketKind::Logic)
    }

    fn convert_data(&mut self, payload: DataPayload<'_>) -> Vec<u8> {
        let DataPayload::Logic { data, unit_size } = payload else {
            return Vec::new();
        };

        let mut out = String::new();
        for sample in data.chunks_exact(unit_size) {
            for lane in 0..self.rows.len() {
                let c = if lane_bit(sample, lane) { '1' } else { '0' };
                self.rows.row_mut(lane).push(c);
            }
            self.column += 1;
            self.samples += 1;
            if self.column % 8 == 0 {
                for lane in 0..self.rows.len() {
                    self.rows.row_mut(lane).push(' ');
                }
            }
            if self.column >= self.width {
                self.flush(&mut out);
            }
        }
        out.into_bytes()
    }

    fn handle_event(&mut self, event: FeedEvent) -> Vec<u8> {
        match event {
            FeedEvent::Trigger => {
                self.trigger = Some((self.column + self.column / 8, self.samples));
                Vec::new()
            }
            FeedEvent::End => {
                let mut out = String::new();
                self.flush(&mut out);
                out.into_bytes()
            }
            FeedEvent::FrameBegin | FeedEvent::FrameEnd => Vec::new(),
        }
    }
}
