use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{SampleDescriptor, SampleName};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleFailure {
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub descriptor: SampleDescriptor,
    pub failure: Option<SampleFailure>,
}

impl RegistryEntry {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Samples of one run in insertion order, keyed by name.
///
/// Samples are never removed; a failed sample keeps its descriptor and the
/// reason it was excluded.
#[derive(Debug, Clone, Default)]
pub struct SampleRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<SampleName, usize>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: SampleDescriptor) -> Result<(), KiraError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(KiraError::DuplicateSample(descriptor.name.to_string()));
        }
        self.index
            .insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(RegistryEntry {
            descriptor,
            failure: None,
        });
        Ok(())
    }

    pub fn get(&self, name: &SampleName) -> Option<&RegistryEntry> {
        self.index
            .get(name)
            .and_then(|position| self.entries.get(*position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Replaces the descriptor of a live sample. Failed samples are left alone.
    pub fn update(&mut self, descriptor: SampleDescriptor) -> Result<(), KiraError> {
        let entry = self.entry_mut(&descriptor.name)?;
        if entry.is_failed() {
            return Ok(());
        }
        entry.descriptor = descriptor;
        Ok(())
    }

    /// Flags a sample as excluded from the run. The first recorded failure is kept.
    pub fn mark_failed(
        &mut self,
        name: &SampleName,
        stage: &str,
        reason: &str,
    ) -> Result<(), KiraError> {
        let entry = self.entry_mut(name)?;
        if entry.failure.is_none() {
            tracing::warn!(sample = %name, stage, reason, "sample excluded");
            entry.failure = Some(SampleFailure {
                stage: stage.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    pub fn successful(&self) -> impl Iterator<Item = &SampleDescriptor> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_failed())
            .map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &SampleName) -> Result<&mut RegistryEntry, KiraError> {
        let position = *self
            .index
            .get(name)
            .ok_or_else(|| KiraError::InvalidSampleName(format!("{name} is not registered")))?;
        Ok(&mut self.entries[position])
    }
}
