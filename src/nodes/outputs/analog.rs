//! `analog`: one text line per analog sample, `name: value` per probe

use crate::runtime::output::{DataPayload, OutputContext, OutputDescriptor, OutputFormat};
use crate::runtime::packet::PacketKind;
use std::fmt::Write as _;

pub const DESCRIPTOR: OutputDescriptor = OutputDescriptor {
    id: "analog",
    description: "Analog values",
    factory: create,
};

const DEFAULT_DIGITS: usize = 6;

fn create() -> Box<dyn OutputFormat> {
    Box::new(Analog::default())
}

#[derive(Default)]
pub struct Analog {
    names: Vec<String>,
    digits: usize,
}

impl OutputFormat for Analog {
    fn init(&mut self, ctx: &OutputContext) -> Result<(), String> {
        self.names = ctx.probes.iter().map(|(_, name)| name.clone()).collect();
        self.digits = ctx.option_usize("digits", DEFAULT_DIGITS)?;
        Ok(())
    }

    fn accepts(&self) -> Option<PacketKind> {
        Some(PacketKind::Analog)
    }

    fn convert_data(&mut self, payload: DataPayload<'_>) -> Vec<u8> {
        let DataPayload::Analog { data, num_samples } = payload else {
            return Vec::new();
        };
        if num_samples == 0 {
            return Vec::new();
        }

        let per_sample = data.len() / num_samples;
        let mut out = String::new();
        for row in data.chunks_exact(per_sample.max(1)).take(num_samples) {
            for (i, value) in row.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let name = self.names.get(i).map(String::as_str).unwrap_or("?");
                let _ = write!(out, "{}: {:.*}", name, self.digits, value);
            }
            out.push('\n');
        }
        out.into_bytes()
    }
}
