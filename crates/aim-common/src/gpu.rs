//! AMD GPU catalogue
//!
//! Maps the marketing names users put in templates ("MI300X", "AMD Instinct
//! MI-300X") to a canonical model, and canonical models to the PCI device IDs
//! the AMD node labeller publishes as `amd.com/gpu.device-id`.

use std::collections::{BTreeMap, BTreeSet};

/// Node label carrying the GPU product name
pub const LABEL_GPU_PRODUCT: &str = "amd.com/gpu.product";

/// Node label carrying the GPU family
pub const LABEL_GPU_FAMILY: &str = "amd.com/gpu.family";

/// Node label carrying the GPU PCI device ID
pub const LABEL_GPU_DEVICE_ID: &str = "amd.com/gpu.device-id";

/// Default extended resource name for AMD GPUs
pub const DEFAULT_GPU_RESOURCE: &str = "amd.com/gpu";

const DEVICE_IDS: &[(&str, &str)] = &[
    ("738c", "MI100"),
    ("738e", "MI100"),
    ("7408", "MI250X"),
    ("740c", "MI250X"),
    ("740f", "MI210"),
    ("7410", "MI210"),
    ("74a0", "MI300A"),
    ("74a1", "MI300X"),
    ("74a9", "MI300X"),
    ("74b5", "MI300X"),
    ("74bd", "MI300X"),
    ("74a2", "MI308X"),
    ("74a8", "MI308X"),
    ("74b6", "MI308X"),
    ("74a5", "MI325X"),
    ("74b9", "MI325X"),
    ("75a0", "MI350X"),
    ("75b0", "MI350X"),
    ("75a3", "MI355X"),
    ("75b3", "MI355X"),
];

/// Canonical form of a GPU model name.
///
/// Uppercases, strips vendor prefixes and separators, and folds known
/// aliases. Unknown models come back uppercased.
pub fn normalize_model(model: &str) -> String {
    let upper = model.trim().to_uppercase();
    let stripped = upper
        .trim_start_matches("AMD")
        .trim_start()
        .trim_start_matches("INSTINCT")
        .trim_start();
    let compact: String = stripped
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect();
    match compact.as_str() {
        "MI300X" | "MI300" => "MI300X".to_string(),
        "MI325X" | "MI325" => "MI325X".to_string(),
        "MI250X" | "MI250" => "MI250X".to_string(),
        "MI210" => "MI210".to_string(),
        "" => upper,
        _ => compact,
    }
}

/// Model for a PCI device ID, if known
pub fn model_for_device_id(device_id: &str) -> Option<&'static str> {
    let id = device_id.trim().to_lowercase();
    let id = id.trim_start_matches("0x");
    DEVICE_IDS
        .iter()
        .find(|(dev, _)| *dev == id)
        .map(|(_, model)| *model)
}

/// Sorted device IDs for a model; empty when the model is unknown
pub fn device_ids_for_model(model: &str) -> Vec<&'static str> {
    let model = normalize_model(model);
    let mut ids: Vec<&'static str> = DEVICE_IDS
        .iter()
        .filter(|(_, m)| *m == model)
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();
    ids
}

/// GPU model advertised by a node's labels.
///
/// The device ID is authoritative; product and family labels are fallbacks.
pub fn model_from_node_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    if let Some(model) = labels
        .get(LABEL_GPU_DEVICE_ID)
        .and_then(|id| model_for_device_id(id))
    {
        return Some(model.to_string());
    }
    [LABEL_GPU_PRODUCT, LABEL_GPU_FAMILY]
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|v| !v.trim().is_empty())
        .map(|v| normalize_model(v))
}

/// Set of canonical GPU models present across a set of nodes
pub fn models_in_cluster<'a, I>(nodes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    nodes
        .into_iter()
        .filter_map(model_from_node_labels)
        .collect()
}
