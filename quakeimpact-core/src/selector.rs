//! Damage state selection
//!
//! Picks the representative damage state from a per-state EP mapping.
//!
//! Global invariants enforced:
//! - The crossing scan runs in ascending EP order, ties in insertion order
//! - The no-crossing fallback reports the first-inserted EP, not the lowest
//! - EP strings are passed through untouched

use serde::{Deserialize, Serialize};

/// EP threshold a state must reach to be selected
pub const SELECTION_THRESHOLD: f64 = 0.5;

/// Damage state reported when no state reaches the threshold
pub const NO_DAMAGE_STATE: &str = "None";

/// One evaluated damage state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProbability {
    pub state: String,
    pub ep: String,
}

/// Ordered mapping of damage state name to EP string.
///
/// Inserting an existing name replaces its EP but keeps its original
/// position, so ordering always reflects first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DamageStateMap {
    entries: Vec<StateProbability>,
}

impl DamageStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: impl Into<String>, ep: impl Into<String>) {
        let state = state.into();
        let ep = ep.into();
        match self.entries.iter_mut().find(|e| e.state == state) {
            Some(existing) => existing.ep = ep,
            None => self.entries.push(StateProbability { state, ep }),
        }
    }

    pub fn get(&self, state: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.state == state)
            .map(|e| e.ep.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &StateProbability> {
        self.entries.iter()
    }

    pub fn states(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.state.as_str()).collect()
    }
}

/// Outcome of [`select_state`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedState {
    pub state: String,
    /// None only when the map was empty
    pub ep: Option<String>,
}

impl SelectedState {
    pub fn is_damaged(&self) -> bool {
        self.state != NO_DAMAGE_STATE
    }
}

/// Parse an EP string the way the reference data encodes it.
///
/// Unparseable text is treated as NaN, which never reaches the threshold.
pub fn parse_ep(ep: &str) -> f64 {
    ep.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Select the representative damage state.
///
/// Returns the entry with the smallest EP that is still >= 0.5; equal EPs
/// resolve to the earlier-inserted state. When nothing crosses, returns
/// `"None"` with the EP of the first-inserted entry regardless of its rank.
pub fn select_state(map: &DamageStateMap) -> SelectedState {
    let mut ranked: Vec<(f64, &StateProbability)> =
        map.iter().map(|e| (parse_ep(&e.ep), e)).collect();
    // stable sort keeps insertion order among equal EPs
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    if let Some((_, entry)) = ranked
        .into_iter()
        .find(|(ep, _)| *ep >= SELECTION_THRESHOLD)
    {
        return SelectedState {
            state: entry.state.clone(),
            ep: Some(entry.ep.clone()),
        };
    }

    SelectedState {
        state: NO_DAMAGE_STATE.to_string(),
        ep: map.iter().next().map(|e| e.ep.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> DamageStateMap {
        let mut m = DamageStateMap::new();
        for (state, ep) in entries {
            m.insert(*state, *ep);
        }
        m
    }

    #[test]
    fn test_selects_lowest_crossing_state() {
        let m = map(&[
            ("Slight", "0.95"),
            ("Moderate", "0.72"),
            ("Extensive", "0.41"),
            ("Complete", "0.1"),
        ]);
        let selected = select_state(&m);
        assert_eq!(selected.state, "Moderate");
        assert_eq!(selected.ep.as_deref(), Some("0.72"));
    }

    #[test]
    fn test_exact_threshold_counts() {
        let m = map(&[("Slight", "0.5"), ("Moderate", "0.2")]);
        assert_eq!(select_state(&m).state, "Slight");
    }

    #[test]
    fn test_tie_resolves_to_first_inserted() {
        let m = map(&[("Slight", "0.7"), ("Moderate", "0.7"), ("Extensive", "0.3")]);
        assert_eq!(select_state(&m).state, "Slight");
    }

    #[test]
    fn test_numeric_not_lexical_order() {
        // lexically "10.0" < "2.0"; numerically 2.0 is the smaller crossing
        let m = map(&[("A", "10.0"), ("B", "2.0")]);
        assert_eq!(select_state(&m).state, "B");
    }

    #[test]
    fn test_fallback_reports_first_inserted_ep_not_lowest() {
        // Documented quirk: the fallback EP comes from insertion order,
        // even though the crossing scan is done in sorted order.
        let m = map(&[("Slight", "0.3"), ("Moderate", "0.1"), ("Extensive", "0.05")]);
        let selected = select_state(&m);
        assert_eq!(selected.state, NO_DAMAGE_STATE);
        assert_eq!(selected.ep.as_deref(), Some("0.3"));
        assert!(!selected.is_damaged());
    }

    #[test]
    fn test_nan_never_selected() {
        let m = map(&[("Slight", "nan"), ("Moderate", "0.6")]);
        assert_eq!(select_state(&m).state, "Moderate");

        let m = map(&[("Slight", "nan")]);
        let selected = select_state(&m);
        assert_eq!(selected.state, NO_DAMAGE_STATE);
        assert_eq!(selected.ep.as_deref(), Some("nan"));
    }

    #[test]
    fn test_empty_map() {
        let selected = select_state(&DamageStateMap::new());
        assert_eq!(selected.state, NO_DAMAGE_STATE);
        assert_eq!(selected.ep, None);
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let mut m = map(&[("Slight", "0.2"), ("Moderate", "0.1")]);
        m.insert("Slight", "0.4");
        assert_eq!(m.len(), 2);
        assert_eq!(m.states(), vec!["Slight", "Moderate"]);
        assert_eq!(m.get("Slight"), Some("0.4"));
    }

    #[test]
    fn test_parse_ep() {
        assert_eq!(parse_ep("1e-05"), 1e-5);
        assert_eq!(parse_ep(" 0.5 "), 0.5);
        assert!(parse_ep("not a number").is_nan());
    }
}
