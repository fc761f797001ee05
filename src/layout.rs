// src/layout.rs
//! Pipeline layout derived from the resource slots of a shader set.

use std::collections::BTreeMap;

use crate::shader::{ResourceKind, ShaderSet, StageFlags};

/// One merged binding in a [`PipelineLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub slot: u32,
    pub kind: ResourceKind,
    /// Every stage that reads the slot.
    pub stages: StageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayout {
    bindings: Vec<LayoutBinding>,
}

impl PipelineLayout {
    /// Merges the slots of all present stages. Slots are keyed by
    /// `(slot, kind)`; a slot shared between stages gets the union of their flags.
    pub fn from_shaders(shaders: &ShaderSet) -> Self {
        let mut merged: BTreeMap<(u32, ResourceKind), StageFlags> = BTreeMap::new();

        for (stage, shader) in shaders.iter() {
            for slot in &shader.interface().resource_slots {
                *merged.entry((slot.slot, slot.kind)).or_default() |= stage.flag();
            }
        }

        Self {
            bindings: merged
                .into_iter()
                .map(|((slot, kind), stages)| LayoutBinding { slot, kind, stages })
                .collect(),
        }
    }

    /// Sorted by slot, then kind.
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
