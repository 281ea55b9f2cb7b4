//! `hex`: one row of hex bytes per probe, eight samples per byte
//!
//! The first sample of a group is the most significant bit. Option `width`
//! (default 192) sets the samples per row.

use super::ProbeRows;
use crate::runtime::decoder::lane_bit;
use crate::runtime::output::{DataPayload, FeedEvent, OutputContext, OutputDescriptor, OutputFormat};
use crate::runtime::packet::PacketKind;

pub const DESCRIPTOR: OutputDescriptor = OutputDescriptor {
    id: "hex",
    description: "Hexadecimal",
    factory: create,
};

const DEFAULT_WIDTH: usize = 192;

fn create() -> Box<dyn OutputFormat> {
    Box::new(Hex::default())
}

pub struct Hex {
    rows: ProbeRows,
    width: usize,
    /// Bits collected per probe for the current byte
    pending: Vec<u8>,
    pending_bits: u32,
    column: usize,
}

impl Default for Hex {
    fn default() -> Self {
        Self {
            rows: ProbeRows::new(Vec::new()),
            width: DEFAULT_WIDTH,
            pending: Vec::new(),
            pending_bits: 0,
            column: 0,
        }
    }
}

impl Hex {
    /// Move the collected bits into the rows, left-aligned
    fn push_pending(&mut self) {
        if self.pending_bits == 0 {
            return;
        }
        let shift = 8 - self.pending_bits;
        for lane in 0..self.rows.len() {
            let byte = self.pending[lane] << shift;
            self.rows.row_mut(lane).push_str(&format!("{:02x} ", byte));
            self.pending[lane] = 0;
        }
        self.pending_bits = 0;
    }
}

impl OutputFormat for Hex {
    fn init(&mut self, ctx: &OutputContext) -> Result<(), String> {
        self.width = ctx.option_usize("width", DEFAULT_WIDTH)?;
        if self.width == 0 {
            return Err("width must be at least 1".to_string());
        }
        if ctx.probes.is_empty() {
            return Err("no enabled probes".to_string());
        }
        self.rows = ProbeRows::new(ctx.probes.iter().map(|(_, name)| name.clone()).collect());
        self.pending = vec![0; ctx.probes.len()];
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
                self.pending[lane] = (self.pending[lane] << 1) | lane_bit(sample, lane) as u8;
            }
            self.pending_bits += 1;
            self.column += 1;
            if self.pending_bits == 8 {
                self.push_pending();
            }
            if self.column >= self.width {
                self.push_pending();
                self.rows.flush(&mut out);
                self.column = 0;
            }
        }
        out.into_bytes()
    }

    fn handle_event(&mut self, event: FeedEvent) -> Vec<u8> {
        if event != FeedEvent::End {
            return Vec::new();
        }
        let mut out = String::new();
        self.push_pending();
        self.rows.flush(&mut out);
        out.into_bytes()
    }
}
