//! ASCII decoder: renders words from the decoder below as characters
//!
//! Only useful stacked on a word-producing decoder; raw samples are ignored.

use crate::runtime::decoder::{
    Annotation, AnnotationClass, DataKind, DecoderConfig, DecoderDescriptor, DecoderOutput, ProtoData,
    ProtoPacket, ProtocolDecoder, SessionParams,
};
use crate::runtime::errors::DecodeResult;

const ANNOTATIONS: &[AnnotationClass] = &[AnnotationClass {
    id: "text",
    description: "Characters",
}];

pub const DESCRIPTOR: DecoderDescriptor = DecoderDescriptor {
    id: "ascii",
    name: "ASCII",
    description: "Words as ASCII characters",
    required_probes: &[],
    optional_probes: &[],
    options: &[],
    annotations: ANNOTATIONS,
    input: DataKind::Word,
    output: None,
    factory: create,
};

fn create(_config: &DecoderConfig) -> DecodeResult<Box<dyn ProtocolDecoder>> {
    Ok(Box::new(AsciiDecoder))
}

pub struct AsciiDecoder;

/// Printable characters as themselves, anything else as `[XX]`
fn render(value: u64) -> String {
    match u8::try_from(value) {
        Ok(byte) if byte.is_ascii_graphic() || byte == b' ' => (byte as char).to_string(),
        _ => format!("[{:02X}]", value),
    }
}

impl ProtocolDecoder for AsciiDecoder {
    fn start(&mut self, _params: &SessionParams) -> DecodeResult {
        Ok(())
    }

    fn decode(&mut self, _offset: u64, _packed: &[u8], _unit_size: usize, _out: &mut Vec<DecoderOutput>) -> DecodeResult {
        Ok(())
    }

    fn decode_upstream(&mut self, proto: &ProtoPacket, out: &mut Vec<DecoderOutput>) -> DecodeResult {
        let ProtoData::Word { value, .. } = proto.data;
        out.push(DecoderOutput::Annotation(Annotation {
            start: proto.start,
            end: proto.end,
            class: 0,
            texts: vec![render(value)],
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(render(0x41), "A");
        assert_eq!(render(0x20), " ");
        assert_eq!(render(0x0A), "[0A]");
        assert_eq!(render(0x1FF), "[1FF]");
    }

    #[test]
    fn test_upstream_word() {
        let mut ascii = AsciiDecoder;
        let mut out = Vec::new();
        ascii
            .decode_upstream(
                &ProtoPacket {
                    start: 3,
                    end: 17,
                    data: ProtoData::Word { value: 0x6B, bits: 8 },
                },
                &mut out,
            )
            .unwrap();
        assert_eq!(
            out,
            vec![DecoderOutput::Annotation(Annotation {
                start: 3,
                end: 17,
                class: 0,
                texts: vec!["k".into()],
            })]
        );

        ascii.decode(0, &[0xFF; 4], 1, &mut out).unwrap();
        assert_eq!(out.len(), 1);
    }
}
