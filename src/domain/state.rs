//! Pipeline state threaded through the stages.
//!
//! Stages never mutate state in place: each returns a [`StateDelta`] and
//! [`PipelineState::apply`] produces the next snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EffectiveConfig;

use super::content::{BranchDelta, DraftSections, FinalDraft, PublishReceipt, ResearchRecord};
use super::report::ComplianceReport;
use super::tenant::VoiceProfile;

/// Accumulated state of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Effective config per chain, resolved once at CONFIG
    #[serde(default)]
    pub configs: BTreeMap<String, EffectiveConfig>,

    #[serde(default)]
    pub voice: VoiceProfile,

    pub research: Option<ResearchRecord>,

    pub draft: Option<DraftSections>,

    /// Raw branch outputs, keyed by branch name
    #[serde(default)]
    pub branches: BTreeMap<String, BranchDelta>,

    /// Union of all branch outputs after MERGE
    #[serde(default)]
    pub assets: Map<String, Value>,

    pub report: Option<ComplianceReport>,

    pub receipt: Option<PublishReceipt>,
}

/// The output of one stage
#[derive(Debug, Clone)]
pub enum StateDelta {
    Configs {
        configs: BTreeMap<String, EffectiveConfig>,
        voice: VoiceProfile,
    },
    Research(ResearchRecord),
    Draft(DraftSections),
    Branch {
        name: String,
        delta: BranchDelta,
    },
    Merged(Map<String, Value>),
    Report(ComplianceReport),
    Published(PublishReceipt),
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the state with `delta` applied
    pub fn apply(&self, delta: StateDelta) -> Self {
        let mut next = self.clone();
        match delta {
            StateDelta::Configs { configs, voice } => {
                next.configs = configs;
                next.voice = voice;
            }
            StateDelta::Research(record) => next.research = Some(record),
            StateDelta::Draft(draft) => next.draft = Some(draft),
            StateDelta::Branch { name, delta } => {
                next.branches.insert(name, delta);
            }
            StateDelta::Merged(assets) => next.assets = assets,
            StateDelta::Report(report) => next.report = Some(report),
            StateDelta::Published(receipt) => next.receipt = Some(receipt),
        }
        next
    }

    /// Effective config for a chain; an empty config if it was never resolved
    pub fn config(&self, chain: &str) -> EffectiveConfig {
        self.configs
            .get(chain)
            .cloned()
            .unwrap_or_else(|| EffectiveConfig::empty(chain))
    }

    pub fn final_draft(&self) -> FinalDraft {
        FinalDraft {
            sections: self.draft.clone().unwrap_or_default(),
            assets: self.assets.clone(),
        }
    }
}
