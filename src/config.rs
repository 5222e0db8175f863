//! Tunables for reading and laying out containers.

use serde::{Deserialize, Serialize};

/// Largest number of records an index-addressed DEX section can hold.
pub const MAX_ID_COUNT: usize = 0xFFFF;

/// Section placement strategies applied by [`crate::dex::DexLayout::sort_sections`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOrder {
    /// Keep the current order. Creating a missing section re-sorts the list in R8 order.
    #[default]
    Default,
    R8,
    Dexlib2,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Refresh passes allowed before the layout is declared divergent.
    pub max_refresh_trials: usize,
    pub id_capacity: usize,
    /// Free id slots a merge must leave behind in every id section.
    pub id_headroom: usize,
    pub section_order: SectionOrder,
    pub sort_after_merge: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            max_refresh_trials: 10,
            id_capacity: MAX_ID_COUNT,
            id_headroom: 0,
            section_order: SectionOrder::Default,
            sort_after_merge: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Reject unknown chunk types inside containers instead of keeping them verbatim.
    pub strict_chunk_types: bool,
    /// Compare the DEX header checksum against the input bytes.
    pub verify_checksum: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: LayoutConfig =
            serde_json::from_str(r#"{"id_headroom": 200, "section_order": "r8"}"#).unwrap();
        assert_eq!(config.id_headroom, 200);
        assert_eq!(config.section_order, SectionOrder::R8);
        assert_eq!(config.max_refresh_trials, 10);
        assert_eq!(config.id_capacity, MAX_ID_COUNT);

        let text = serde_json::to_string(&ReadOptions { strict_chunk_types: true, ..Default::default() }).unwrap();
        let back: ReadOptions = serde_json::from_str(&text).unwrap();
        assert!(back.strict_chunk_types && !back.verify_checksum);
    }
}
