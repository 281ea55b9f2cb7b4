//! `binary`: packed samples written unchanged

use crate::runtime::output::{DataPayload, OutputContext, OutputDescriptor, OutputFormat};
use crate::runtime::packet::PacketKind;

pub const DESCRIPTOR: OutputDescriptor = OutputDescriptor {
    id: "binary",
    description: "Raw binary",
    factory: create,
};

fn create() -> Box<dyn OutputFormat> {
    Box::new(Binary)
}

pub struct Binary;

impl OutputFormat for Binary {
    fn init(&mut self, _ctx: &OutputContext) -> Result<(), String> {
        Ok(())
    }

    fn accepts(&self) -> Option<PacketKind> {
        Some(PacketKind::Logic)
    }

    fn convert_data(&mut self, payload: DataPayload<'_>) -> Vec<u8> {
        match payload {
            DataPayload::Logic { data, .. } => data.to_vec(),
            DataPayload::Analog { .. } => Vec::new(),
        }
    }
}
