//! Annotation visibility and rendering

use super::decoder::Annotation;
use super::sink::Destination;
use crate::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Which decoder instances' annotations are shown
///
/// An absent instance is hidden. A present instance shows either every
/// annotation class (`None`) or exactly one (`Some(index)`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationVisibility {
    entries: BTreeMap<String, Option<usize>>,
}

impl AnnotationVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_all(&mut self, instance: &str) {
        self.entries.insert(instance.to_string(), None);
    }

    pub fn show_class(&mut self, instance: &str, class: usize) {
        self.entries.insert(instance.to_string(), Some(class));
    }

    pub fn hide(&mut self, instance: &str) {
        self.entries.remove(instance);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, instance: &str) -> bool {
        self.entries.contains_key(instance)
    }

    /// Selected class for `instance`: `None` if hidden, `Some(None)` for all
    pub fn get(&self, instance: &str) -> Option<Option<usize>> {
        self.entries.get(instance).copied()
    }

    pub fn is_visible(&self, instance: &str, class: usize) -> bool {
        match self.entries.get(instance) {
            Some(None) => true,
            Some(Some(selected)) => *selected == class,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// One annotation as delivered by the decoder stack
#[derive(Debug, Clone, Copy)]
pub struct AnnotationEvent<'a> {
    pub instance_id: &'a str,
    pub decoder_id: &'a str,
    pub annotation: &'a Annotation,
}

/// Filters annotation events and writes them out in delivery order
#[derive(Debug, Clone)]
pub struct AnnotationEmitter {
    visibility: AnnotationVisibility,
    show_ranges: bool,
    emitted: u64,
    suppressed: u64,
}

impl AnnotationEmitter {
    /// Sample ranges are printed when `loglevel` is above warn (2)
    pub fn new(visibility: AnnotationVisibility, loglevel: u8) -> Self {
        Self {
            visibility,
            show_ranges: loglevel > 2,
            emitted: 0,
            suppressed: 0,
        }
    }

    pub fn visibility(&self) -> &AnnotationVisibility {
        &self.visibility
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// `[start-end ]decoder: "text" "text"`
    pub fn render(&self, event: &AnnotationEvent<'_>) -> String {
        let mut line = String::new();
        if self.show_ranges {
            let _ = write!(line, "{}-{} ", event.annotation.start, event.annotation.end);
        }
        line.push_str(event.decoder_id);
        line.push(':');
        for text in &event.annotation.texts {
            let _ = write!(line, " \"{}\"", text);
        }
        line.push('\n');
        line
    }

    /// Write `event` if visible. Returns whether it was written.
    pub fn emit(&mut self, event: AnnotationEvent<'_>, dest: &mut Destination) -> Result<bool> {
        if !self
            .visibility
            .is_visible(event.instance_id, event.annotation.class)
        {
            self.suppressed += 1;
            return Ok(false);
        }
        dest.write(self.render(&event).as_bytes())?;
        self.emitted += 1;
        Ok(true)
    }
}
