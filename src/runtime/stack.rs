//! Decoder stack: an arena of decoder instances linked by `feeds` edges
//!
//! Directives look like `spi:sck=3:sdata=4,spi:sck=3:sdata=5`. Each directive
//! creates one instance (`spi`, then `spi.2`, ...). Instances are chained
//! either by an explicit stack string (`spi,ascii`) or, under
//! [`StackingPolicy::Chain`], in declaration order.

use super::annotations::{AnnotationEvent, AnnotationVisibility};
use super::decoder::{
    DataKind, DecoderConfig, DecoderDescriptor, DecoderOutput, DecoderRegistry, ProtocolDecoder,
    SessionParams,
};
use super::errors::DecodeError;
use crate::config::StackingPolicy;
use crate::{FeedError, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Stable handle of an instance in a [`DecoderStack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(usize);

impl InstanceHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct DecoderInstance {
    id: String,
    descriptor: DecoderDescriptor,
    config: DecoderConfig,
    decoder: Box<dyn ProtocolDecoder>,
    feeds: Option<usize>,
    fed_by: Option<usize>,
}

/// All decoder instances of a session
pub struct DecoderStack {
    instances: Vec<DecoderInstance>,
    visibility: AnnotationVisibility,
    explicit_annotations: bool,
    params: Option<SessionParams>,
}

impl Default for DecoderStack {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderStack {
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            visibility: AnnotationVisibility::new(),
            explicit_annotations: false,
            params: None,
        }
    }

    /// Register directives, stack them and apply the annotation selection.
    ///
    /// Any error discards every instance created so far.
    pub fn build(
        registry: &DecoderRegistry,
        directives: &str,
        stack: Option<&str>,
        annotations: Option<&str>,
        policy: StackingPolicy,
    ) -> Result<Self> {
        let mut decoders = Self::new();
        decoders.explicit_annotations = annotations.is_some();
        decoders.register(registry, directives)?;

        match stack {
            Some(stack) => decoders.apply_stack(stack)?,
            None if policy == StackingPolicy::Chain && decoders.len() > 1 => {
                let handles: Vec<_> = (0..decoders.len()).map(InstanceHandle).collect();
                decoders.chain(&handles)?;
            }
            None => {}
        }

        if let Some(annotations) = annotations {
            decoders.select_annotations(annotations)?;
        }

        info!(
            "Protocol decoders: {} instance(s), visible: {:?}",
            decoders.len(),
            decoders.visibility.instances().collect::<Vec<_>>()
        );
        Ok(decoders)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn visibility(&self) -> &AnnotationVisibility {
        &self.visibility
    }

    pub fn find(&self, instance_id: &str) -> Option<InstanceHandle> {
        self.instances
            .iter()
            .position(|inst| inst.id == instance_id)
            .map(InstanceHandle)
    }

    pub fn instance_id(&self, handle: InstanceHandle) -> Option<&str> {
        self.instances.get(handle.0).map(|inst| inst.id.as_str())
    }

    /// Instance ids in creation order
    pub fn instance_ids(&self) -> Vec<&str> {
        self.instances.iter().map(|inst| inst.id.as_str()).collect()
    }

    /// The instance `handle` feeds, if any
    pub fn feeds(&self, handle: InstanceHandle) -> Option<InstanceHandle> {
        self.instances
            .get(handle.0)
            .and_then(|inst| inst.feeds)
            .map(InstanceHandle)
    }

    /// Instantiate every directive in `directives`. All or nothing.
    pub fn register(&mut self, registry: &DecoderRegistry, directives: &str) -> Result<Vec<InstanceHandle>> {
        let mut created: Vec<DecoderInstance> = Vec::new();

        for directive in directives.split(',') {
            let (decoder_id, args) = parse_directive(directive)?;
            let descriptor = *registry.get(decoder_id)?;
            let config = resolve_config(&descriptor, &args)?;
            let decoder = (descriptor.factory)(&config)
                .map_err(|e| FeedError::InvalidDirective(format!("{}: {}", decoder_id, e)))?;

            let id = self.next_instance_id(decoder_id, &created);
            debug!("Created protocol decoder instance '{}'", id);
            created.push(DecoderInstance {
                id,
                descriptor,
                config,
                decoder,
                feeds: None,
                fed_by: None,
            });
        }

        let first = self.instances.len();
        for inst in created {
            if !self.explicit_annotations {
                self.visibility.show_all(&inst.id);
            }
            self.instances.push(inst);
        }
        Ok((first..self.instances.len()).map(InstanceHandle).collect())
    }

    fn next_instance_id(&self, decoder_id: &str, pending: &[DecoderInstance]) -> String {
        let existing = self
            .instances
            .iter()
            .chain(pending)
            .filter(|inst| inst.descriptor.id == decoder_id)
            .count();
        if existing == 0 {
            decoder_id.to_string()
        } else {
            format!("{}.{}", decoder_id, existing + 1)
        }
    }

    /// Chain instances named in `stack` (`a,b[,c...]`), bottom first
    pub fn apply_stack(&mut self, stack: &str) -> Result<()> {
        let entries: Vec<&str> = stack.split(',').map(str::trim).collect();
        if entries.len() < 2 {
            return Err(FeedError::InvalidStack(
                "specify at least two protocol decoders to stack".to_string(),
            ));
        }

        let handles = entries
            .iter()
            .map(|entry| {
                let id = entry.split(':').next().unwrap_or_default();
                self.find(id)
                    .ok_or_else(|| FeedError::InstanceNotFound(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.chain(&handles)
    }

    fn chain(&mut self, handles: &[InstanceHandle]) -> Result<()> {
        for pair in handles.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Make `lower` feed `upper`. Unless annotations were selected
    /// explicitly, `lower` stops being visible.
    pub fn link(&mut self, lower: InstanceHandle, upper: InstanceHandle) -> Result<()> {
        if lower.0 >= self.instances.len() || upper.0 >= self.instances.len() {
            return Err(FeedError::InvalidStack("instance handle out of range".to_string()));
        }
        if lower == upper {
            return Err(FeedError::InvalidStack(format!(
                "cannot stack '{}' on itself",
                self.instances[lower.0].id
            )));
        }
        if let Some(existing) = self.instances[lower.0].feeds {
            return Err(FeedError::InvalidStack(format!(
                "'{}' already feeds '{}'",
                self.instances[lower.0].id, self.instances[existing].id
            )));
        }
        if let Some(existing) = self.instances[upper.0].fed_by {
            return Err(FeedError::InvalidStack(format!(
                "'{}' is already fed by '{}'",
                self.instances[upper.0].id, self.instances[existing].id
            )));
        }
        // Reject cycles: `upper` must not already reach `lower`
        let mut cursor = Some(upper.0);
        while let Some(index) = cursor {
            if index == lower.0 {
                return Err(FeedError::InvalidStack(format!(
                    "stacking '{}' on '{}' would create a cycle",
                    self.instances[upper.0].id, self.instances[lower.0].id
                )));
            }
            cursor = self.instances[index].feeds;
        }

        let produced = self.instances[lower.0].descriptor.output;
        let consumed = self.instances[upper.0].descriptor.input;
        if produced != Some(consumed) {
            warn!(
                "Stacking '{}' ({:?} output) on '{}' ({:?} input): data kinds do not match",
                self.instances[upper.0].id, produced, self.instances[lower.0].id, consumed
            );
        }

        self.instances[lower.0].feeds = Some(upper.0);
        self.instances[upper.0].fed_by = Some(lower.0);
        if !self.explicit_annotations {
            let hidden = self.instances[lower.0].id.clone();
            self.visibility.hide(&hidden);
        }
        debug!(
            "Stacked '{}' on top of '{}'",
            self.instances[upper.0].id, self.instances[lower.0].id
        );
        Ok(())
    }

    /// Replace visibility with `instance[=annotation]` entries
    pub fn select_annotations(&mut self, selection: &str) -> Result<()> {
        let mut visibility = AnnotationVisibility::new();

        for entry in selection.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (instance, annotation) = match entry.split_once('=') {
                Some((instance, annotation)) => (instance.trim(), Some(annotation.trim())),
                None => (entry, None),
            };
            let handle = self
                .find(instance)
                .ok_or_else(|| FeedError::InstanceNotFound(instance.to_string()))?;
            let descriptor = &self.instances[handle.0].descriptor;

            match annotation {
                None => visibility.show_all(instance),
                Some(name) => {
                    let class = descriptor.annotation_index(name).ok_or_else(|| {
                        FeedError::AnnotationNotFound {
                            instance: instance.to_string(),
                            annotation: name.to_string(),
                        }
                    })?;
                    debug!("Showing annotation {} ({}) of '{}'", class, name, instance);
                    visibility.show_class(instance, class);
                }
            }
        }

        self.explicit_annotations = true;
        self.visibility = visibility;
        Ok(())
    }

    /// Start every instance for a new stream
    pub fn start_session(&mut self, params: SessionParams) -> Result<()> {
        for inst in &mut self.instances {
            for (probe, &lane) in &inst.config.probes {
                if lane >= params.lane_count {
                    return Err(FeedError::DecoderStart {
                        instance: inst.id.clone(),
                        source: DecodeError::ProbeOutOfRange {
                            probe: probe.clone(),
                            lane,
                            available: params.lane_count,
                        },
                    });
                }
            }
            if inst.fed_by.is_none() && inst.descriptor.input != DataKind::Logic {
                return Err(FeedError::DecoderStart {
                    instance: inst.id.clone(),
                    source: DecodeError::Failed(format!(
                        "'{}' only decodes the output of another decoder",
                        inst.descriptor.id
                    )),
                });
            }
            inst.decoder
                .start(&params)
                .map_err(|source| FeedError::DecoderStart {
                    instance: inst.id.clone(),
                    source,
                })?;
        }

        debug!(
            "Decoder session started: {} lanes, unit size {}, {} Hz",
            params.lane_count, params.unit_size, params.sample_rate
        );
        self.params = Some(params);
        Ok(())
    }

    /// Feed packed samples to every bottom instance and route the results.
    ///
    /// Annotations reach `on_annotation` in exactly the order decoders
    /// produce them; protocol data is passed depth-first to the instance it
    /// feeds before the next output is looked at.
    pub fn feed_samples(
        &mut self,
        offset: u64,
        packed: &[u8],
        on_annotation: &mut dyn FnMut(AnnotationEvent<'_>) -> Result<()>,
    ) -> Result<()> {
        let Some(params) = self.params else {
            let instance = self
                .instances
                .first()
                .map(|inst| inst.id.clone())
                .unwrap_or_default();
            return Err(FeedError::DecoderFeed {
                instance,
                source: DecodeError::NotStarted,
            });
        };

        for index in 0..self.instances.len() {
            if self.instances[index].fed_by.is_some() {
                continue;
            }
            let mut produced = Vec::new();
            let inst = &mut self.instances[index];
            inst.decoder
                .decode(offset, packed, params.unit_size, &mut produced)
                .map_err(|source| FeedError::DecoderFeed {
                    instance: inst.id.clone(),
                    source,
                })?;
            self.dispatch(index, produced, on_annotation)?;
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        from: usize,
        produced: Vec<DecoderOutput>,
        on_annotation: &mut dyn FnMut(AnnotationEvent<'_>) -> Result<()>,
    ) -> Result<()> {
        for output in produced {
            match output {
                DecoderOutput::Annotation(annotation) => {
                    let inst = &self.instances[from];
                    on_annotation(AnnotationEvent {
                        instance_id: &inst.id,
                        decoder_id: inst.descriptor.id,
                        annotation: &annotation,
                    })?;
                }
                DecoderOutput::Proto(proto) => {
                    let Some(next) = self.instances[from].feeds else {
                        continue;
                    };
                    let mut upstream = Vec::new();
                    let inst = &mut self.instances[next];
                    inst.decoder
                        .decode_upstream(&proto, &mut upstream)
                        .map_err(|source| FeedError::DecoderFeed {
                            instance: inst.id.clone(),
                            source,
                        })?;
                    self.dispatch(next, upstream, on_annotation)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DecoderStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let edges: Vec<(String, Option<String>)> = self
            .instances
            .iter()
            .map(|inst| {
                (
                    inst.id.clone(),
                    inst.feeds.map(|next| self.instances[next].id.clone()),
                )
            })
            .collect();
        f.debug_struct("DecoderStack")
            .field("instances", &edges)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// Split `id[:key=value]*` into the decoder id and its arguments
fn parse_directive(directive: &str) -> Result<(&str, BTreeMap<&str, &str>)> {
    let mut parts = directive.trim().split(':');
    let decoder_id = parts.next().unwrap_or_default().trim();
    if decoder_id.is_empty() {
        return Err(FeedError::InvalidDirective(format!(
            "missing decoder name in '{}'",
            directive
        )));
    }

    let mut args = BTreeMap::new();
    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            return Err(FeedError::InvalidDirective(format!(
                "expected key=value, got '{}' in '{}'",
                part, directive
            )));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(FeedError::InvalidDirective(format!(
                "empty key or value in '{}'",
                directive
            )));
        }
        if args.insert(key, value).is_some() {
            return Err(FeedError::InvalidDirective(format!(
                "'{}' given twice in '{}'",
                key, directive
            )));
        }
    }
    Ok((decoder_id, args))
}

/// Map directive arguments onto probe lanes and declared options
fn resolve_config(descriptor: &DecoderDescriptor, args: &BTreeMap<&str, &str>) -> Result<DecoderConfig> {
    let mut config = DecoderConfig::default();
    for option in descriptor.options {
        config
            .options
            .insert(option.id.to_string(), option.default.to_string());
    }

    for (&key, &value) in args {
        if descriptor.has_probe(key) {
            let lane = value.parse::<usize>().map_err(|_| {
                FeedError::InvalidDirective(format!(
                    "{}: probe '{}' needs a lane number, got '{}'",
                    descriptor.id, key, value
                ))
            })?;
            config.probes.insert(key.to_string(), lane);
        } else if descriptor.option_spec(key).is_some() {
            config.options.insert(key.to_string(), value.to_string());
        } else {
            return Err(FeedError::InvalidDirective(format!(
                "{}: unknown probe or option '{}'",
                descriptor.id, key
            )));
        }
    }

    if let Some(missing) = descriptor
        .required_probes
        .iter()
        .find(|p| !config.probes.contains_key(p.id))
    {
        return Err(FeedError::InvalidDirective(format!(
            "{}: required probe '{}' not assigned",
            descriptor.id, missing.id
        )));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::decoder::{Annotation, AnnotationClass, ProbeSpec, ProtoData, ProtoPacket};
    use crate::runtime::errors::DecodeResult;

    /// Emits one annotation per nonzero sample byte, plus a word
    struct Echo;

    impl ProtocolDecoder for Echo {
        fn start(&mut self, _params: &SessionParams) -> DecodeResult {
            Ok(())
        }

        fn decode(
            &mut self,
            offset: u64,
            packed: &[u8],
            _unit_size: usize,
            out: &mut Vec<DecoderOutput>,
        ) -> DecodeResult {
            for (i, &byte) in packed.iter().enumerate() {
                if byte == 0 {
                    continue;
                }
                let at = offset + i as u64;
                out.push(DecoderOutput::Annotation(Annotation {
                    start: at,
                    end: at,
                    class: 0,
                    texts: vec![format!("echo {}", byte)],
                }));
                out.push(DecoderOutput::Proto(ProtoPacket {
                    start: at,
                    end: at,
                    data: ProtoData::Word {
                        value: byte as u64,
                        bits: 8,
                    },
                }));
            }
            Ok(())
        }

        fn decode_upstream(&mut self, proto: &ProtoPacket, out: &mut Vec<DecoderOutput>) -> DecodeResult {
            let ProtoData::Word { value, .. } = proto.data;
            out.push(DecoderOutput::Annotation(Annotation {
                start: proto.start,
                end: proto.end,
                class: 0,
                texts: vec![format!("upper {}", value)],
            }));
            Ok(())
        }
    }

    const ECHO_PROBES: &[ProbeSpec] = &[ProbeSpec {
        id: "data",
        description: "data line",
    }];
    const ECHO_ANNOTATIONS: &[AnnotationClass] = &[AnnotationClass {
        id: "text",
        description: "echoed byte",
    }];

    fn registry() -> DecoderRegistry {
        let mut registry = DecoderRegistry::new();
        registry.register(DecoderDescriptor {
            id: "echo",
            name: "Echo",
            description: "test decoder",
            required_probes: ECHO_PROBES,
            optional_probes: &[],
            options: &[],
            annotations: ECHO_ANNOTATIONS,
            input: DataKind::Logic,
            output: Some(DataKind::Word),
            factory: |_| Ok(Box::new(Echo)),
        });
        registry
    }

    fn params() -> SessionParams {
        SessionParams {
            lane_count: 8,
            unit_size: 1,
            sample_rate: 1_000,
        }
    }

    fn collect(stack: &mut DecoderStack, packed: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        stack
            .feed_samples(0, packed, &mut |ev| {
                lines.push(format!("{}:{}", ev.instance_id, ev.annotation.texts[0]));
                Ok(())
            })
            .unwrap();
        lines
    }

    #[test]
    fn test_instance_ids() {
        let stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1,echo:data=2",
            None,
            None,
            StackingPolicy::Independent,
        )
        .unwrap();
        assert_eq!(stack.instance_ids(), vec!["echo", "echo.2", "echo.3"]);
        assert_eq!(stack.visibility().len(), 3);
    }

    #[test]
    fn test_chain_policy_narrows_visibility() {
        let stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1",
            None,
            None,
            StackingPolicy::Chain,
        )
        .unwrap();
        let bottom = stack.find("echo").unwrap();
        assert_eq!(stack.feeds(bottom), stack.find("echo.2"));
        assert!(!stack.visibility().contains("echo"));
        assert!(stack.visibility().contains("echo.2"));
    }

    #[test]
    fn test_explicit_annotations_survive_stacking() {
        let stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1",
            Some("echo,echo.2"),
            Some("echo=text"),
            StackingPolicy::Independent,
        )
        .unwrap();
        assert_eq!(stack.visibility().get("echo"), Some(Some(0)));
        assert!(!stack.visibility().contains("echo.2"));
    }

    #[test]
    fn test_directive_errors() {
        let reg = registry();
        let cases = [
            "nope:data=1",
            "echo",
            "echo:data=1:bogus=2",
            "echo:data",
            "echo:data=x",
            "echo:data=1,,echo:data=2",
        ];
        for directive in cases {
            let err = DecoderStack::build(&reg, directive, None, None, StackingPolicy::Chain)
                .unwrap_err();
            assert!(
                matches!(err, FeedError::DecoderNotFound(_) | FeedError::InvalidDirective(_)),
                "{} -> {:?}",
                directive,
                err
            );
        }
    }

    #[test]
    fn test_registration_is_all_or_nothing() {
        let reg = registry();
        let mut stack = DecoderStack::new();
        assert!(stack.register(&reg, "echo:data=0,echo:oops=1").is_err());
        assert!(stack.is_empty());
        assert!(stack.visibility().is_empty());
    }

    #[test]
    fn test_stack_errors() {
        let reg = registry();
        let short = DecoderStack::build(&reg, "echo:data=0,echo:data=1", Some("echo"), None, StackingPolicy::Chain);
        assert!(matches!(short, Err(FeedError::InvalidStack(_))));

        let unknown = DecoderStack::build(&reg, "echo:data=0,echo:data=1", Some("echo,uart"), None, StackingPolicy::Chain);
        assert!(matches!(unknown, Err(FeedError::InstanceNotFound(id)) if id == "uart"));

        let twice = DecoderStack::build(&reg, "echo:data=0", Some("echo,echo"), None, StackingPolicy::Chain);
        assert!(matches!(twice, Err(FeedError::InvalidStack(_))));
    }

    #[test]
    fn test_stack_entries_may_carry_options() {
        let stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1",
            Some("echo:data=0,echo.2:data=1"),
            None,
            StackingPolicy::Independent,
        )
        .unwrap();
        assert_eq!(stack.feeds(stack.find("echo").unwrap()), stack.find("echo.2"));
    }

    #[test]
    fn test_annotation_selection_errors() {
        let reg = registry();
        let missing = DecoderStack::build(&reg, "echo:data=0", None, Some("uart"), StackingPolicy::Chain);
        assert!(matches!(missing, Err(FeedError::InstanceNotFound(_))));

        let bad_class = DecoderStack::build(&reg, "echo:data=0", None, Some("echo=bits"), StackingPolicy::Chain);
        assert!(matches!(
            bad_class,
            Err(FeedError::AnnotationNotFound { annotation, .. }) if annotation == "bits"
        ));
    }

    #[test]
    fn test_feed_before_start_fails() {
        let mut stack =
            DecoderStack::build(&registry(), "echo:data=0", None, None, StackingPolicy::Chain).unwrap();
        let result = stack.feed_samples(0, &[1], &mut |_| Ok(()));
        assert!(matches!(
            result,
            Err(FeedError::DecoderFeed { source: DecodeError::NotStarted, .. })
        ));
    }

    #[test]
    fn test_start_checks_lanes() {
        let mut stack =
            DecoderStack::build(&registry(), "echo:data=9", None, None, StackingPolicy::Chain).unwrap();
        assert!(matches!(
            stack.start_session(params()),
            Err(FeedError::DecoderStart { .. })
        ));
    }

    #[test]
    fn test_outputs_routed_in_production_order() {
        let mut stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1",
            None,
            None,
            StackingPolicy::Chain,
        )
        .unwrap();
        stack.start_session(params()).unwrap();

        let lines = collect(&mut stack, &[5, 0, 7]);
        assert_eq!(
            lines,
            vec![
                "echo:echo 5",
                "echo.2:upper 5",
                "echo:echo 7",
                "echo.2:upper 7",
            ]
        );
    }

    #[test]
    fn test_independent_instances_all_decode() {
        let mut stack = DecoderStack::build(
            &registry(),
            "echo:data=0,echo:data=1",
            None,
            None,
            StackingPolicy::Independent,
        )
        .unwrap();
        stack.start_session(params()).unwrap();

        let lines = collect(&mut stack, &[3]);
        assert_eq!(lines, vec!["echo:echo 3", "echo.2:echo 3"]);
    }
}
