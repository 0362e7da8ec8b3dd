//! Model catalog: known models and memory-fit heuristics.
//!
//! The registry is static. Fit checks keep a 30% headroom: a model is only
//! considered when its weights fit in 70% of the available memory.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sysinfo::System;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Fraction of available memory a model may occupy, as `NUM / DEN`.
const SAFE_MEMORY_NUM: u128 = 7;
const SAFE_MEMORY_DEN: u128 = 10;

/// Recommendation tiers, checked top-down against safe memory.
const TIERS: [(u64, &str); 3] = [
    (50 * GIB, "llama3.1:70b"),
    (8 * GIB, "llama3.1:8b"),
    (4 * GIB, "mistral:7b"),
];
const SMALLEST_MODEL: &str = "phi3:mini";

/// A known model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub quantization_tag: Option<String>,
    pub capabilities: BTreeSet<String>,
}

impl ModelDescriptor {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// `(id, display name, size, quantization, capabilities)`
type CatalogEntry = (&'static str, &'static str, u64, Option<&'static str>, &'static [&'static str]);

const BUILTIN_MODELS: &[CatalogEntry] = &[
    ("phi3:mini", "Phi-3 Mini 3.8B", 2_176_178_913, Some("Q4_0"), &["chat"]),
    ("gemma2:2b", "Gemma 2 2B", 1_629_518_495, Some("Q4_0"), &["chat"]),
    ("mistral:7b", "Mistral 7B", 4_113_301_824, Some("Q4_0"), &["chat", "tools"]),
    ("codellama:7b", "Code Llama 7B", 3_825_819_519, Some("Q4_0"), &["chat", "code"]),
    ("qwen2.5:7b", "Qwen 2.5 7B", 4_683_087_332, Some("Q4_K_M"), &["chat", "code", "tools"]),
    ("llama3.1:8b", "Llama 3.1 8B", 4_920_753_328, Some("Q4_K_M"), &["chat", "tools"]),
    ("llama3.1:70b", "Llama 3.1 70B", 42_520_413_916, Some("Q4_K_M"), &["chat", "tools"]),
];

/// Registry of known models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let models = BUILTIN_MODELS
            .iter()
            .map(|&(id, display_name, size_bytes, quant, caps)| ModelDescriptor {
                id: id.to_string(),
                display_name: display_name.to_string(),
                size_bytes,
                quantization_tag: quant.map(str::to_string),
                capabilities: caps.iter().map(|c| c.to_string()).collect(),
            })
            .collect();
        Self { models }
    }

    pub fn get_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn models_with_capability<'a>(
        &'a self,
        capability: &'a str,
    ) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        self.models.iter().filter(move |m| m.has_capability(capability))
    }

    /// `true` iff `id` is registered and fits in 70% of `available_memory_bytes`.
    pub fn is_suitable(&self, id: &str, available_memory_bytes: u64) -> bool {
        self.get_model(id)
            .is_some_and(|m| fits_safe_memory(m.size_bytes, available_memory_bytes))
    }

    /// Pick the model tier for `available_memory_bytes`. A value exactly at
    /// a tier threshold selects that tier.
    pub fn recommend(&self, available_memory_bytes: u64) -> &'static str {
        TIERS
            .iter()
            .find(|(threshold, _)| fits_safe_memory(*threshold, available_memory_bytes))
            .map(|(_, id)| *id)
            .unwrap_or(SMALLEST_MODEL)
    }

    /// [`recommend`](Self::recommend) for the memory currently available on
    /// this machine.
    pub fn recommend_for_host(&self) -> &'static str {
        let available = detect_available_memory();
        let id = self.recommend(available);
        tracing::info!(
            available = %format_size(available),
            model = id,
            "recommended model for host"
        );
        id
    }
}

/// `size ≤ available × 0.7`, computed without floating point.
fn fits_safe_memory(size_bytes: u64, available_memory_bytes: u64) -> bool {
    size_bytes as u128 * SAFE_MEMORY_DEN <= available_memory_bytes as u128 * SAFE_MEMORY_NUM
}

/// Available system memory in bytes.
pub fn detect_available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// Render a byte count: whole megabytes below 1 GiB, otherwise gibibytes
/// with one decimal.
pub fn format_size(bytes: u64) -> String {
    // Both branches round half up.
    if bytes < GIB {
        format!("{} MB", (bytes + MIB / 2) / MIB)
    } else {
        let tenths = (u128::from(bytes) * 10 + u128::from(GIB) / 2) / u128::from(GIB);
        format!("{}.{} GB", tenths / 10, tenths % 10)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
